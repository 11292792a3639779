use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kindred_schema::{ContextTurn, PersonalityTag, Speaker};
use tokio::sync::{Mutex, RwLock};

use crate::{ConversationMemory, MemoryConfig, MemoryEntry, MemoryStats};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("no conversation memory for {0}")]
    NotFound(String),
}

type Slot = Arc<Mutex<ConversationMemory>>;

/// In-memory transcripts keyed by conversation id.
///
/// The outer map lock is only held to find or insert a slot; each conversation
/// is mutated behind its own mutex, so appends to one conversation are
/// serialized without stalling the others.
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, Slot>>,
    config: MemoryConfig,
}

impl ConversationStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    async fn slot(&self, conversation_id: &str) -> Option<Slot> {
        self.conversations.read().await.get(conversation_id).cloned()
    }

    pub async fn contains(&self, conversation_id: &str) -> bool {
        self.conversations.read().await.contains_key(conversation_id)
    }

    pub async fn get(&self, conversation_id: &str) -> Option<ConversationMemory> {
        let slot = self.slot(conversation_id).await?;
        let memory = slot.lock().await;
        Some(memory.clone())
    }

    pub async fn get_or_create(
        &self,
        conversation_id: &str,
        scripted_id: &str,
        human_id: &str,
        personality: PersonalityTag,
    ) -> ConversationMemory {
        self.get_or_create_at(conversation_id, scripted_id, human_id, personality, Utc::now())
            .await
    }

    /// Returns the existing record untouched when one is already present.
    pub async fn get_or_create_at(
        &self,
        conversation_id: &str,
        scripted_id: &str,
        human_id: &str,
        personality: PersonalityTag,
        started_at: DateTime<Utc>,
    ) -> ConversationMemory {
        let slot = {
            let mut conversations = self.conversations.write().await;
            conversations
                .entry(conversation_id.to_string())
                .or_insert_with(|| {
                    tracing::debug!(conversation_id, scripted_id, "conversation memory created");
                    Arc::new(Mutex::new(ConversationMemory::new(
                        conversation_id,
                        scripted_id,
                        human_id,
                        personality,
                        started_at,
                    )))
                })
                .clone()
        };
        let memory = slot.lock().await;
        memory.clone()
    }

    pub async fn append(
        &self,
        conversation_id: &str,
        speaker: Speaker,
        text: &str,
    ) -> Result<u64, MemoryError> {
        self.append_at(conversation_id, speaker, text, Utc::now())
            .await
    }

    /// Appends in arrival order and returns the updated message counter.
    pub async fn append_at(
        &self,
        conversation_id: &str,
        speaker: Speaker,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, MemoryError> {
        let slot = self
            .slot(conversation_id)
            .await
            .ok_or_else(|| MemoryError::NotFound(conversation_id.to_string()))?;
        let mut memory = slot.lock().await;
        let count = memory.push(
            MemoryEntry {
                speaker,
                text: text.to_string(),
                at,
            },
            self.config.history_limit,
        );
        Ok(count)
    }

    /// The last `context_window` entries, oldest first.
    pub async fn recent(&self, conversation_id: &str) -> Option<Vec<ContextTurn>> {
        let slot = self.slot(conversation_id).await?;
        let memory = slot.lock().await;
        Some(memory.recent(self.config.context_window))
    }

    pub async fn clear(&self, conversation_id: &str) -> bool {
        let removed = self
            .conversations
            .write()
            .await
            .remove(conversation_id)
            .is_some();
        if removed {
            tracing::info!(conversation_id, "conversation memory cleared");
        }
        removed
    }

    /// Drops every conversation owned by `scripted_id`; returns their ids.
    pub async fn clear_for_identity(&self, scripted_id: &str) -> Vec<String> {
        let mut conversations = self.conversations.write().await;
        let mut owned = Vec::new();
        for (conversation_id, slot) in conversations.iter() {
            if slot.lock().await.scripted_id == scripted_id {
                owned.push(conversation_id.clone());
            }
        }
        for conversation_id in &owned {
            conversations.remove(conversation_id);
        }
        owned
    }

    pub async fn snapshot(&self) -> Vec<ConversationMemory> {
        let slots: Vec<Slot> = self.conversations.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.lock().await.clone());
        }
        out
    }

    pub async fn stats(&self) -> MemoryStats {
        let slots: Vec<Slot> = self.conversations.read().await.values().cloned().collect();
        let mut stats = MemoryStats {
            conversations: slots.len(),
            messages: 0,
        };
        for slot in slots {
            stats.messages += slot.lock().await.message_count;
        }
        stats
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}
