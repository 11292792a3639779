use std::collections::HashMap;

use tokio::sync::Mutex;

/// Who is typing in which conversation.
///
/// Scripted identities may have several replies composing at once in one
/// conversation, so each (conversation, user) pair is reference counted.
/// Every reply still announces its own start and stop; the count only decides
/// when the user drops out of [`typing_in`](Self::typing_in).
#[derive(Default)]
pub struct TypingTracker {
    typing: Mutex<HashMap<String, HashMap<String, usize>>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many replies `user_id` is now composing.
    pub async fn start(&self, conversation_id: &str, user_id: &str) -> usize {
        let mut typing = self.typing.lock().await;
        let count = typing
            .entry(conversation_id.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_insert(0);
        *count += 1;
        *count
    }

    /// Returns how many replies `user_id` is still composing.
    pub async fn stop(&self, conversation_id: &str, user_id: &str) -> usize {
        let mut typing = self.typing.lock().await;
        let Some(users) = typing.get_mut(conversation_id) else {
            return 0;
        };
        let Some(count) = users.get_mut(user_id) else {
            return 0;
        };
        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            users.remove(user_id);
            if users.is_empty() {
                typing.remove(conversation_id);
            }
        }
        remaining
    }

    /// Absolute form used for humans, whose clients report state rather than edges.
    pub async fn set(&self, conversation_id: &str, user_id: &str, is_typing: bool) -> bool {
        if is_typing {
            let mut typing = self.typing.lock().await;
            let users = typing.entry(conversation_id.to_string()).or_default();
            if users.contains_key(user_id) {
                return false;
            }
            users.insert(user_id.to_string(), 1);
            true
        } else {
            let mut typing = self.typing.lock().await;
            let Some(users) = typing.get_mut(conversation_id) else {
                return false;
            };
            let changed = users.remove(user_id).is_some();
            if users.is_empty() {
                typing.remove(conversation_id);
            }
            changed
        }
    }

    pub async fn typing_in(&self, conversation_id: &str) -> Vec<String> {
        let typing = self.typing.lock().await;
        let mut users: Vec<String> = typing
            .get(conversation_id)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }
}
