use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kindred_bus::Transport;
use kindred_memory::{ConversationMemory, ConversationStore};
use kindred_schema::{
    ChatEvent, ContextTurn, IdentityProfile, InboundChat, MessageKind, NewMessage,
    PersonalityTag, Speaker, StoredMessage,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::SessionConfig;
use super::directory::{IdentityStore, MatchStore, MessageStore};
use super::error::{SessionError, SessionResult};
use super::responder::{ReplyRequest, ReplySource, Responder};
use super::typing::TypingTracker;

/// Runtime state of an activated scripted identity.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptedIdentity {
    pub profile: IdentityProfile,
    pub personality: PersonalityTag,
    pub online: bool,
    pub last_active: DateTime<Utc>,
    pub interactions: u64,
    #[serde(skip)]
    cancel: CancellationToken,
}

impl ScriptedIdentity {
    pub fn id(&self) -> &str {
        &self.profile.id
    }
}

/// Outcome of one inbound message or initiative.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Not ours to answer: inactive receiver, unmatched pair or missing memory.
    Ignored,
    Replied(StoredMessage),
    /// Identity deactivated or conversation cleared while the reply was pending.
    Cancelled,
}

impl Disposition {
    pub fn is_handled(&self) -> bool {
        !matches!(self, Disposition::Ignored)
    }

    pub fn message(&self) -> Option<&StoredMessage> {
        match self {
            Disposition::Replied(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub identities: usize,
    pub online: usize,
    pub conversations: usize,
    pub messages: u64,
    pub personalities: BTreeMap<PersonalityTag, usize>,
}

/// Snapshot of what a pending reply needs from its identity.
struct Speaking {
    profile: IdentityProfile,
    personality: PersonalityTag,
    cancel: CancellationToken,
}

pub struct SessionManager {
    config: SessionConfig,
    identities: RwLock<HashMap<String, ScriptedIdentity>>,
    memory: ConversationStore,
    typing: TypingTracker,
    conversation_tokens: Mutex<HashMap<String, CancellationToken>>,
    /// Serializes the publish steps of replies composing in one conversation.
    delivery_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    identity_store: Arc<dyn IdentityStore>,
    matches: Arc<dyn MatchStore>,
    messages: Arc<dyn MessageStore>,
    transport: Arc<dyn Transport>,
    replies: Arc<dyn ReplySource>,
    rng: std::sync::Mutex<StdRng>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        identity_store: Arc<dyn IdentityStore>,
        matches: Arc<dyn MatchStore>,
        messages: Arc<dyn MessageStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            memory: ConversationStore::new(config.memory.clone()),
            config,
            identities: RwLock::new(HashMap::new()),
            typing: TypingTracker::new(),
            conversation_tokens: Mutex::new(HashMap::new()),
            delivery_locks: Mutex::new(HashMap::new()),
            identity_store,
            matches,
            messages,
            transport,
            replies: Arc::new(Responder::default()),
            rng: std::sync::Mutex::new(rng),
        }
    }

    pub fn with_reply_source(mut self, replies: Arc<dyn ReplySource>) -> Self {
        self.replies = replies;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn memory(&self) -> &ConversationStore {
        &self.memory
    }

    // ---- lifecycle ----

    /// Registers `identity_id` as active. Re-activating refreshes the profile
    /// and personality but keeps interaction counters and pending work.
    pub async fn activate(&self, identity_id: &str, personality: Option<PersonalityTag>) -> bool {
        let profile = match self.identity_store.find_identity(identity_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::warn!(identity_id, "cannot activate unknown identity");
                return false;
            }
            Err(e) => {
                tracing::warn!(identity_id, "identity lookup failed: {e}");
                return false;
            }
        };

        let now = Utc::now();
        if let Err(e) = self.identity_store.set_presence(identity_id, true, now).await {
            tracing::warn!(identity_id, "failed to mark identity online: {e}");
            return false;
        }

        let personality = personality.unwrap_or(profile.personality);
        let mut identities = self.identities.write().await;
        match identities.get_mut(identity_id) {
            Some(existing) => {
                existing.profile = profile;
                existing.personality = personality;
                existing.online = true;
                existing.last_active = now;
            }
            None => {
                identities.insert(
                    identity_id.to_string(),
                    ScriptedIdentity {
                        profile,
                        personality,
                        online: true,
                        last_active: now,
                        interactions: 0,
                        cancel: CancellationToken::new(),
                    },
                );
            }
        }
        tracing::info!(identity_id, personality = %personality, "scripted identity activated");
        true
    }

    /// Activates every scripted identity the store knows about.
    pub async fn activate_all(&self) -> SessionResult<usize> {
        let profiles = self
            .identity_store
            .scripted_identities()
            .await
            .map_err(|e| SessionError::Identity(e.to_string()))?;
        let mut activated = 0;
        for profile in profiles {
            if self.activate(&profile.id, None).await {
                activated += 1;
            }
        }
        tracing::info!("activated {activated} scripted identities");
        Ok(activated)
    }

    /// Removes `identity_id` from the active set, cancels its pending replies
    /// and drops its conversation memory.
    pub async fn deactivate(&self, identity_id: &str) -> bool {
        if let Some(identity) = self.identities.write().await.remove(identity_id) {
            identity.cancel.cancel();
        }

        let cleared = self.memory.clear_for_identity(identity_id).await;
        {
            let mut tokens = self.conversation_tokens.lock().await;
            let mut locks = self.delivery_locks.lock().await;
            for conversation_id in &cleared {
                tokens.remove(conversation_id);
                locks.remove(conversation_id);
            }
        }

        match self
            .identity_store
            .set_presence(identity_id, false, Utc::now())
            .await
        {
            Ok(()) => {
                tracing::info!(
                    identity_id,
                    conversations = cleared.len(),
                    "scripted identity deactivated"
                );
                true
            }
            Err(e) => {
                tracing::warn!(identity_id, "failed to mark identity offline: {e}");
                false
            }
        }
    }

    // ---- conversation flow ----

    /// Runs the full reply pipeline for one inbound message and waits for it,
    /// typing delay included.
    pub async fn handle_incoming(&self, msg: &InboundChat) -> SessionResult<Disposition> {
        let Some(speaking) = self.speaking(&msg.receiver_id).await else {
            tracing::debug!(
                receiver_id = %msg.receiver_id,
                "receiver is not an active scripted identity"
            );
            return Ok(Disposition::Ignored);
        };

        let conversation = self
            .matches
            .find_conversation(&msg.conversation_id)
            .await
            .map_err(|e| SessionError::Match(e.to_string()))?;
        match conversation {
            Some(c) if c.active && c.pairs(&msg.sender_id, &msg.receiver_id) => {}
            _ => {
                tracing::debug!(
                    conversation_id = %msg.conversation_id,
                    sender_id = %msg.sender_id,
                    "no active match for message"
                );
                return Ok(Disposition::Ignored);
            }
        }

        self.memory
            .get_or_create(
                &msg.conversation_id,
                &msg.receiver_id,
                &msg.sender_id,
                speaking.personality,
            )
            .await;
        self.memory
            .append(&msg.conversation_id, Speaker::Human, &msg.text)
            .await?;
        self.touch(&msg.receiver_id).await;

        let context = self
            .memory
            .recent(&msg.conversation_id)
            .await
            .unwrap_or_default();
        let text = self.compose_reply(&msg.text, &speaking, &context);

        let cancel = self
            .conversation_token(&msg.conversation_id, &speaking.cancel)
            .await;
        self.deliver(&speaking.profile, &msg.sender_id, &msg.conversation_id, text, cancel)
            .await
    }

    /// Fire-and-forget form of [`handle_incoming`](Self::handle_incoming).
    pub fn spawn_incoming(
        self: &Arc<Self>,
        msg: InboundChat,
    ) -> JoinHandle<SessionResult<Disposition>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let result = manager.handle_incoming(&msg).await;
            if let Err(e) = &result {
                tracing::warn!(conversation_id = %msg.conversation_id, "reply failed: {e}");
            }
            result
        })
    }

    /// Sends an opening line into an existing conversation.
    pub async fn initiate(&self, conversation_id: &str) -> SessionResult<Disposition> {
        let Some(memory) = self.memory.get(conversation_id).await else {
            tracing::warn!(conversation_id, "no conversation memory, skipping initiative");
            return Ok(Disposition::Ignored);
        };
        let Some(speaking) = self.speaking(&memory.scripted_id).await else {
            tracing::warn!(
                conversation_id,
                scripted_id = %memory.scripted_id,
                "identity is not active, skipping initiative"
            );
            return Ok(Disposition::Ignored);
        };

        let text = {
            let mut rng = self.rng();
            self.replies.initiative(speaking.personality, &mut *rng)
        };
        let text = match text {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!(conversation_id, "empty initiative text, skipping");
                return Ok(Disposition::Ignored);
            }
            Err(e) => {
                tracing::warn!(conversation_id, "failed to generate initiative: {e}");
                return Ok(Disposition::Ignored);
            }
        };

        let cancel = self.conversation_token(conversation_id, &speaking.cancel).await;
        let disposition = self
            .deliver(&speaking.profile, &memory.human_id, conversation_id, text, cancel)
            .await?;
        if disposition.is_handled() {
            tracing::info!(conversation_id, scripted_id = %memory.scripted_id, "initiative sent");
        }
        Ok(disposition)
    }

    /// Relays a human's typing state to the conversation.
    pub async fn note_typing(
        &self,
        user_id: &str,
        conversation_id: &str,
        is_typing: bool,
    ) -> SessionResult<()> {
        self.typing.set(conversation_id, user_id, is_typing).await;
        self.transport
            .publish(
                conversation_id,
                ChatEvent::Typing {
                    identity_id: user_id.to_string(),
                    conversation_id: conversation_id.to_string(),
                    is_typing,
                },
            )
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    pub async fn typing_in(&self, conversation_id: &str) -> Vec<String> {
        self.typing.typing_in(conversation_id).await
    }

    /// Forgets a conversation. Replies still pending in it are cancelled.
    pub async fn clear_conversation(&self, conversation_id: &str) -> bool {
        if let Some(token) = self.conversation_tokens.lock().await.remove(conversation_id) {
            token.cancel();
        }
        self.delivery_locks.lock().await.remove(conversation_id);
        self.memory.clear(conversation_id).await
    }

    // ---- views ----

    pub async fn conversation(&self, conversation_id: &str) -> Option<ConversationMemory> {
        self.memory.get(conversation_id).await
    }

    pub async fn active_identities(&self) -> Vec<ScriptedIdentity> {
        let mut identities: Vec<_> = self.identities.read().await.values().cloned().collect();
        identities.sort_by(|a, b| a.profile.id.cmp(&b.profile.id));
        identities
    }

    pub async fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.identities.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_scripted(&self, identity_id: &str) -> bool {
        self.identities.read().await.contains_key(identity_id)
    }

    pub async fn personality_of(&self, identity_id: &str) -> Option<PersonalityTag> {
        self.identities
            .read()
            .await
            .get(identity_id)
            .map(|identity| identity.personality)
    }

    /// Conversations eligible for an initiative: matched, active and
    /// remembered, whatever their idle time.
    pub async fn initiative_candidates(&self) -> SessionResult<Vec<ConversationMemory>> {
        let ids = self.active_ids().await;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conversations = self
            .matches
            .active_conversations(&ids)
            .await
            .map_err(|e| SessionError::Match(e.to_string()))?;
        let mut candidates = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            if let Some(memory) = self.memory.get(&conversation.conversation_id).await {
                candidates.push(memory);
            }
        }
        candidates.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        Ok(candidates)
    }

    pub async fn stats(&self) -> SessionStats {
        let memory = self.memory.stats().await;
        let identities = self.identities.read().await;
        let mut personalities = BTreeMap::new();
        for identity in identities.values() {
            *personalities.entry(identity.personality).or_insert(0) += 1;
        }
        SessionStats {
            identities: identities.len(),
            online: identities.values().filter(|i| i.online).count(),
            conversations: memory.conversations,
            messages: memory.messages,
            personalities,
        }
    }

    // ---- internals ----

    async fn speaking(&self, identity_id: &str) -> Option<Speaking> {
        let identities = self.identities.read().await;
        let identity = identities.get(identity_id)?;
        Some(Speaking {
            profile: identity.profile.clone(),
            personality: identity.personality,
            cancel: identity.cancel.clone(),
        })
    }

    async fn touch(&self, identity_id: &str) {
        if let Some(identity) = self.identities.write().await.get_mut(identity_id) {
            identity.interactions += 1;
            identity.last_active = Utc::now();
        }
    }

    fn rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn compose_reply(&self, text: &str, speaking: &Speaking, context: &[ContextTurn]) -> String {
        let request = ReplyRequest {
            text,
            personality: speaking.personality,
            context,
            profile: &speaking.profile,
        };
        let reply = {
            let mut rng = self.rng();
            self.replies.reply(&request, &mut *rng)
        };
        match reply {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                tracing::warn!(identity_id = %speaking.profile.id, "responder returned empty text");
                self.config.fallback_reply.clone()
            }
            Err(e) => {
                tracing::warn!(identity_id = %speaking.profile.id, "responder failed: {e}");
                self.config.fallback_reply.clone()
            }
        }
    }

    async fn conversation_token(
        &self,
        conversation_id: &str,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let mut tokens = self.conversation_tokens.lock().await;
        let token = tokens
            .entry(conversation_id.to_string())
            .or_insert_with(|| parent.child_token());
        if token.is_cancelled() {
            *token = parent.child_token();
        }
        token.clone()
    }

    async fn delivery_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.delivery_locks.lock().await;
        Arc::clone(locks.entry(conversation_id.to_string()).or_default())
    }

    async fn announce_typing(&self, conversation_id: &str, identity_id: &str, is_typing: bool) {
        let composing = if is_typing {
            self.typing.start(conversation_id, identity_id).await
        } else {
            self.typing.stop(conversation_id, identity_id).await
        };
        tracing::trace!(conversation_id, identity_id, is_typing, composing, "typing indicator");
        let event = ChatEvent::Typing {
            identity_id: identity_id.to_string(),
            conversation_id: conversation_id.to_string(),
            is_typing,
        };
        if let Err(e) = self.transport.publish(conversation_id, event).await {
            tracing::warn!(conversation_id, "failed to publish typing indicator: {e}");
        }
    }

    /// Typing delay, persistence and publication shared by replies and
    /// initiatives.
    ///
    /// Each call publishes its own typing start and stop. The conversation's
    /// delivery lock keeps another reply's events from landing between this
    /// reply's typing stop and its message.
    async fn deliver(
        &self,
        scripted: &IdentityProfile,
        human_id: &str,
        conversation_id: &str,
        text: String,
        cancel: CancellationToken,
    ) -> SessionResult<Disposition> {
        if cancel.is_cancelled() {
            return Ok(Disposition::Cancelled);
        }

        let delay = {
            let mut rng = self.rng();
            self.config.typing.sample(Some(text.chars().count()), &mut *rng)
        };
        tracing::debug!(conversation_id, delay_ms = delay.as_millis() as u64, "composing reply");

        let lock = self.delivery_lock(conversation_id).await;
        {
            let _delivering = lock.lock().await;
            self.announce_typing(conversation_id, &scripted.id, true).await;
        }
        let cancelled = tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        };
        let _delivering = lock.lock().await;
        self.announce_typing(conversation_id, &scripted.id, false).await;

        if cancelled
            || !self.memory.contains(conversation_id).await
            || !self.is_scripted(&scripted.id).await
        {
            tracing::info!(conversation_id, identity_id = %scripted.id, "pending reply cancelled");
            return Ok(Disposition::Cancelled);
        }

        let stored = self
            .messages
            .append(NewMessage {
                sender_id: scripted.id.clone(),
                receiver_id: human_id.to_string(),
                conversation_id: conversation_id.to_string(),
                text,
                kind: MessageKind::Text,
                is_scripted: true,
                at: Utc::now(),
            })
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;

        if cancel.is_cancelled() {
            tracing::warn!(
                conversation_id,
                message_id = %stored.id,
                "reply stored after cancellation, not publishing"
            );
            return Ok(Disposition::Cancelled);
        }
        if let Err(e) = self
            .memory
            .append(conversation_id, Speaker::Script, &stored.text)
            .await
        {
            tracing::warn!(
                conversation_id,
                message_id = %stored.id,
                "conversation cleared before publish: {e}"
            );
            return Ok(Disposition::Cancelled);
        }

        self.transport
            .publish(
                conversation_id,
                ChatEvent::MessageDelivered {
                    message: stored.clone(),
                    sender_name: scripted.display_name.clone(),
                    is_scripted: true,
                },
            )
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        tracing::info!(
            conversation_id,
            identity_id = %scripted.id,
            message_id = %stored.id,
            "scripted reply delivered"
        );
        Ok(Disposition::Replied(stored))
    }
}
