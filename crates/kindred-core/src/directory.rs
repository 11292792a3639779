//! Collaborators the session layer reads from and writes to.
//!
//! Profiles, matches and messages live in an external store; the session layer
//! only sees these traits. `InMemoryDirectory` backs all three for tests and
//! the demo binary.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kindred_schema::{ConversationRef, IdentityProfile, NewMessage, StoredMessage};
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_identity(&self, id: &str) -> Result<Option<IdentityProfile>>;
    async fn scripted_identities(&self) -> Result<Vec<IdentityProfile>>;
    async fn set_presence(&self, id: &str, online: bool, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn find_conversation(&self, conversation_id: &str) -> Result<Option<ConversationRef>>;
    /// Active conversations where any of `scripted_ids` takes part.
    async fn active_conversations(&self, scripted_ids: &[String]) -> Result<Vec<ConversationRef>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: NewMessage) -> Result<StoredMessage>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    identities: RwLock<HashMap<String, IdentityProfile>>,
    conversations: RwLock<HashMap<String, ConversationRef>>,
    messages: RwLock<Vec<StoredMessage>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_identity(&self, profile: IdentityProfile) {
        self.identities
            .write()
            .await
            .insert(profile.id.clone(), profile);
    }

    pub async fn put_conversation(&self, conversation: ConversationRef) {
        self.conversations
            .write()
            .await
            .insert(conversation.conversation_id.clone(), conversation);
    }

    pub async fn identity(&self, id: &str) -> Option<IdentityProfile> {
        self.identities.read().await.get(id).cloned()
    }

    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.messages.read().await.clone()
    }

    pub async fn messages_in(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl IdentityStore for InMemoryDirectory {
    async fn find_identity(&self, id: &str) -> Result<Option<IdentityProfile>> {
        Ok(self.identity(id).await)
    }

    async fn scripted_identities(&self) -> Result<Vec<IdentityProfile>> {
        let mut scripted: Vec<_> = self
            .identities
            .read()
            .await
            .values()
            .filter(|p| p.scripted)
            .cloned()
            .collect();
        scripted.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(scripted)
    }

    async fn set_presence(&self, id: &str, online: bool, at: DateTime<Utc>) -> Result<()> {
        let mut identities = self.identities.write().await;
        let profile = identities
            .get_mut(id)
            .ok_or_else(|| anyhow!("identity not found: {id}"))?;
        profile.online = online;
        profile.last_active = Some(at);
        Ok(())
    }
}

#[async_trait]
impl MatchStore for InMemoryDirectory {
    async fn find_conversation(&self, conversation_id: &str) -> Result<Option<ConversationRef>> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }

    async fn active_conversations(&self, scripted_ids: &[String]) -> Result<Vec<ConversationRef>> {
        Ok(self
            .conversations
            .read()
            .await
            .values()
            .filter(|c| c.active && scripted_ids.contains(&c.scripted_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageStore for InMemoryDirectory {
    async fn append(&self, message: NewMessage) -> Result<StoredMessage> {
        let stored = StoredMessage {
            id: Uuid::new_v4(),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            conversation_id: message.conversation_id,
            text: message.text,
            kind: message.kind,
            is_scripted: message.is_scripted,
            created_at: message.at,
        };
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }
}
