use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use kindred_bus::{EventBus, Transport};
use kindred_core::*;
use kindred_schema::{
    ChatEvent, ConversationRef, IdentityProfile, InboundChat, NewMessage, PersonalityTag,
    Speaker, StoredMessage,
};
use rand::RngCore;
use tokio::sync::{mpsc, Notify};

struct FailingReplies;

impl ReplySource for FailingReplies {
    fn reply(&self, _request: &ReplyRequest<'_>, _rng: &mut dyn RngCore) -> anyhow::Result<String> {
        Err(anyhow!("forced failure"))
    }

    fn initiative(&self, _p: PersonalityTag, _rng: &mut dyn RngCore) -> anyhow::Result<String> {
        Err(anyhow!("forced failure"))
    }
}

#[derive(Default)]
struct RecordingReplies {
    contexts: Mutex<Vec<Vec<String>>>,
}

impl ReplySource for RecordingReplies {
    fn reply(&self, request: &ReplyRequest<'_>, _rng: &mut dyn RngCore) -> anyhow::Result<String> {
        self.contexts
            .lock()
            .unwrap()
            .push(request.context.iter().map(|t| t.text.clone()).collect());
        Ok(format!("echo: {}", request.text))
    }

    fn initiative(&self, _p: PersonalityTag, _rng: &mut dyn RngCore) -> anyhow::Result<String> {
        Ok("ping".into())
    }
}

struct FailingMessages;

#[async_trait]
impl MessageStore for FailingMessages {
    async fn append(&self, _message: NewMessage) -> anyhow::Result<StoredMessage> {
        Err(anyhow!("disk full"))
    }
}

/// Holds every write until the test releases it.
struct GatedMessages {
    inner: Arc<InMemoryDirectory>,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl MessageStore for GatedMessages {
    async fn append(&self, message: NewMessage) -> anyhow::Result<StoredMessage> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.append(message).await
    }
}

struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn publish(&self, _conversation_id: &str, _event: ChatEvent) -> anyhow::Result<()> {
        Err(anyhow!("socket closed"))
    }
}

struct Harness {
    dir: Arc<InMemoryDirectory>,
    bus: Arc<EventBus>,
    manager: Arc<SessionManager>,
}

async fn directory(personality: PersonalityTag, interests: &[&str]) -> Arc<InMemoryDirectory> {
    let dir = Arc::new(InMemoryDirectory::new());
    dir.put_identity(IdentityProfile {
        id: "emma".into(),
        display_name: "Emma".into(),
        personality,
        scripted: true,
        interests: interests.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    })
    .await;
    dir.put_identity(IdentityProfile {
        id: "sam".into(),
        display_name: "Sam".into(),
        ..Default::default()
    })
    .await;
    for id in ["c1", "c2"] {
        dir.put_conversation(ConversationRef {
            conversation_id: id.into(),
            human_id: "sam".into(),
            scripted_id: "emma".into(),
            active: true,
        })
        .await;
    }
    dir.put_conversation(ConversationRef {
        conversation_id: "closed".into(),
        human_id: "sam".into(),
        scripted_id: "emma".into(),
        active: false,
    })
    .await;
    dir
}

fn config() -> SessionConfig {
    SessionConfig {
        rng_seed: Some(42),
        ..Default::default()
    }
}

async fn harness(personality: PersonalityTag) -> Harness {
    let dir = directory(personality, &[]).await;
    let bus = Arc::new(EventBus::new(64));
    let manager = SessionManager::new(config(), dir.clone(), dir.clone(), dir.clone(), bus.clone());
    Harness {
        dir,
        bus,
        manager: Arc::new(manager),
    }
}

fn chat(conversation_id: &str, text: &str) -> InboundChat {
    InboundChat {
        sender_id: "sam".into(),
        receiver_id: "emma".into(),
        conversation_id: conversation_id.into(),
        text: text.into(),
        at: Utc::now(),
    }
}

fn drain(rx: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn shape(events: &[ChatEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| match event {
            ChatEvent::Typing { is_typing, .. } => format!("typing:{is_typing}"),
            ChatEvent::MessageDelivered { .. } => "delivered".to_string(),
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn greeting_gets_friendly_template() {
    let h = harness(PersonalityTag::Friendly).await;
    let mut rx = h.bus.subscribe_room("c1").await;
    assert!(h.manager.activate("emma", None).await);

    let disposition = h.manager.handle_incoming(&chat("c1", "Hi there!")).await.unwrap();
    assert!(disposition.is_handled());

    let reply = disposition.message().unwrap();
    let expected = Responder::default()
        .templates()
        .lookup(Category::Greeting, PersonalityTag::Friendly)
        .to_string();
    assert_eq!(reply.text, expected);
    assert_eq!(reply.sender_id, "emma");
    assert_eq!(reply.receiver_id, "sam");
    assert!(reply.is_scripted);

    let memory = h.manager.conversation("c1").await.unwrap();
    assert_eq!(memory.entries.len(), 2);
    assert_eq!(memory.message_count, 2);
    assert_eq!(memory.entries[0].speaker, Speaker::Human);
    assert_eq!(memory.entries[1].speaker, Speaker::Script);
    assert_eq!(memory.entries[1].text, expected);

    assert_eq!(
        shape(&drain(&mut rx)),
        vec!["typing:true", "typing:false", "delivered"]
    );
    assert_eq!(h.dir.messages_in("c1").await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn question_beats_greeting_keywords() {
    let h = harness(PersonalityTag::Intellectual).await;
    h.manager.activate("emma", None).await;

    let disposition = h
        .manager
        .handle_incoming(&chat("c1", "What do you like to do?"))
        .await
        .unwrap();
    let expected = Responder::default()
        .templates()
        .lookup(Category::Question, PersonalityTag::Intellectual)
        .to_string();
    assert_eq!(disposition.message().unwrap().text, expected);
}

#[tokio::test(start_paused = true)]
async fn interest_line_may_follow_the_template() {
    let dir = directory(PersonalityTag::Friendly, &["salsa dancing"]).await;
    let bus = Arc::new(EventBus::new(64));
    let manager = SessionManager::new(config(), dir.clone(), dir.clone(), dir.clone(), bus);
    manager.activate("emma", None).await;

    let disposition = manager.handle_incoming(&chat("c1", "Hi there!")).await.unwrap();
    let text = &disposition.message().unwrap().text;
    let greeting = Responder::default()
        .templates()
        .lookup(Category::Greeting, PersonalityTag::Friendly)
        .to_string();
    assert!(text.starts_with(&greeting));
    assert!(text.ends_with(
        "By the way, I love salsa dancing! We should definitely talk about that sometime! 💫"
    ));
}

#[tokio::test(start_paused = true)]
async fn inactive_receiver_is_ignored_silently() {
    let h = harness(PersonalityTag::Casual).await;
    let mut rx = h.bus.subscribe(kindred_bus::Topic::All).await;

    let disposition = h.manager.handle_incoming(&chat("c1", "hello?")).await.unwrap();
    assert_eq!(disposition, Disposition::Ignored);
    assert!(drain(&mut rx).is_empty());
    assert!(h.dir.messages().await.is_empty());
    assert!(h.manager.conversation("c1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn unmatched_or_closed_conversation_is_ignored() {
    let h = harness(PersonalityTag::Casual).await;
    let mut rx = h.bus.subscribe(kindred_bus::Topic::All).await;
    h.manager.activate("emma", None).await;

    let mut stranger = chat("c1", "hey");
    stranger.sender_id = "mallory".into();
    for msg in [stranger, chat("closed", "hey"), chat("nowhere", "hey")] {
        let disposition = h.manager.handle_incoming(&msg).await.unwrap();
        assert_eq!(disposition, Disposition::Ignored);
    }
    assert!(drain(&mut rx).is_empty());
    assert!(h.dir.messages().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn generation_failure_uses_fallback_in_order() {
    let dir = directory(PersonalityTag::Flirty, &[]).await;
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe_room("c1").await;
    let manager = SessionManager::new(config(), dir.clone(), dir.clone(), dir.clone(), bus)
        .with_reply_source(Arc::new(FailingReplies));
    manager.activate("emma", None).await;

    let disposition = manager.handle_incoming(&chat("c1", "Hi there!")).await.unwrap();
    assert_eq!(disposition.message().unwrap().text, DEFAULT_FALLBACK_REPLY);

    let events = drain(&mut rx);
    assert_eq!(shape(&events), vec!["typing:true", "typing:false", "delivered"]);
    match &events[2] {
        ChatEvent::MessageDelivered {
            message,
            sender_name,
            is_scripted,
        } => {
            assert_eq!(message.text, DEFAULT_FALLBACK_REPLY);
            assert_eq!(sender_name, "Emma");
            assert!(is_scripted);
        }
        other => panic!("unexpected event {other:?}"),
    }
    let memory = manager.conversation("c1").await.unwrap();
    assert_eq!(memory.entries[1].text, DEFAULT_FALLBACK_REPLY);
}

#[tokio::test(start_paused = true)]
async fn store_failure_leaves_memory_without_reply() {
    let dir = directory(PersonalityTag::Casual, &[]).await;
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe_room("c1").await;
    let manager = SessionManager::new(
        config(),
        dir.clone(),
        dir.clone(),
        Arc::new(FailingMessages),
        bus,
    );
    manager.activate("emma", None).await;

    let result = manager.handle_incoming(&chat("c1", "hi")).await;
    assert!(matches!(result, Err(SessionError::Store(_))));

    let memory = manager.conversation("c1").await.unwrap();
    assert_eq!(memory.entries.len(), 1);
    assert_eq!(memory.entries[0].speaker, Speaker::Human);
    assert_eq!(shape(&drain(&mut rx)), vec!["typing:true", "typing:false"]);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_reported() {
    let dir = directory(PersonalityTag::Casual, &[]).await;
    let manager = SessionManager::new(
        config(),
        dir.clone(),
        dir.clone(),
        dir.clone(),
        Arc::new(FailingTransport),
    );
    manager.activate("emma", None).await;

    let result = manager.handle_incoming(&chat("c1", "hi")).await;
    assert!(matches!(result, Err(SessionError::Transport(_))));
    assert_eq!(dir.messages_in("c1").await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn deactivation_cancels_pending_reply() {
    let h = harness(PersonalityTag::Casual).await;
    let mut rx = h.bus.subscribe_room("c1").await;
    h.manager.activate("emma", None).await;

    let pending = h.manager.spawn_incoming(chat("c1", "hi"));
    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shape(&[first]), vec!["typing:true"]);

    assert!(h.manager.deactivate("emma").await);
    let disposition = pending.await.unwrap().unwrap();
    assert_eq!(disposition, Disposition::Cancelled);

    assert_eq!(shape(&drain(&mut rx)), vec!["typing:false"]);
    assert!(h.dir.messages().await.is_empty());
    assert!(h.manager.conversation("c1").await.is_none());
    assert!(!h.dir.identity("emma").await.unwrap().online);
    assert!(!h.manager.is_scripted("emma").await);
}

#[tokio::test(start_paused = true)]
async fn cleared_conversation_gets_no_reply() {
    let h = harness(PersonalityTag::Casual).await;
    let mut rx = h.bus.subscribe_room("c1").await;
    h.manager.activate("emma", None).await;

    let pending = h.manager.spawn_incoming(chat("c1", "hi"));
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(h.manager.clear_conversation("c1").await);

    assert_eq!(pending.await.unwrap().unwrap(), Disposition::Cancelled);
    assert!(h.dir.messages().await.is_empty());

    // The identity itself stays active and answers the next message.
    let disposition = h.manager.handle_incoming(&chat("c1", "still there?")).await.unwrap();
    assert!(disposition.message().is_some());
}

#[tokio::test(start_paused = true)]
async fn overlapping_replies_each_stop_typing_before_delivery() {
    let h = harness(PersonalityTag::Casual).await;
    let mut rx = h.bus.subscribe_room("c1").await;
    h.manager.activate("emma", None).await;

    let a = h.manager.spawn_incoming(chat("c1", "one"));
    let b = h.manager.spawn_incoming(chat("c1", "two"));
    assert!(a.await.unwrap().unwrap().is_handled());
    assert!(b.await.unwrap().unwrap().is_handled());

    let shapes = shape(&drain(&mut rx));
    assert_eq!(shapes.iter().filter(|s| *s == "typing:true").count(), 2);
    assert_eq!(shapes.iter().filter(|s| *s == "typing:false").count(), 2);
    assert_eq!(shapes.iter().filter(|s| *s == "delivered").count(), 2);
    assert_eq!(shapes.first().map(String::as_str), Some("typing:true"));
    for (i, s) in shapes.iter().enumerate() {
        if s == "delivered" {
            assert_eq!(shapes[i - 1], "typing:false", "{shapes:?}");
        }
    }
    assert!(h.manager.typing_in("c1").await.is_empty());

    let memory = h.manager.conversation("c1").await.unwrap();
    assert_eq!(memory.message_count, 4);
}

#[tokio::test(start_paused = true)]
async fn deactivation_during_store_write_is_not_published() {
    let dir = directory(PersonalityTag::Casual, &[]).await;
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe_room("c1").await;
    let gate = Arc::new(GatedMessages {
        inner: dir.clone(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let manager = Arc::new(SessionManager::new(
        config(),
        dir.clone(),
        dir.clone(),
        gate.clone(),
        bus,
    ));
    manager.activate("emma", None).await;

    let pending = manager.spawn_incoming(chat("c1", "hi"));
    gate.entered.notified().await;
    assert!(manager.deactivate("emma").await);
    gate.release.notify_one();

    assert_eq!(pending.await.unwrap().unwrap(), Disposition::Cancelled);
    assert_eq!(dir.messages_in("c1").await.len(), 1);
    assert_eq!(shape(&drain(&mut rx)), vec!["typing:true", "typing:false"]);
    assert!(manager.conversation("c1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn context_window_is_bounded() {
    let dir = directory(PersonalityTag::Casual, &[]).await;
    let replies = Arc::new(RecordingReplies::default());
    let mut config = config();
    config.memory.context_window = 3;
    config.typing = TypingDelayConfig::instant();
    let manager = SessionManager::new(
        config,
        dir.clone(),
        dir.clone(),
        dir.clone(),
        Arc::new(EventBus::new(64)),
    )
    .with_reply_source(replies.clone());
    manager.activate("emma", None).await;

    for text in ["one", "two", "three"] {
        manager.handle_incoming(&chat("c1", text)).await.unwrap();
    }

    let contexts = replies.contexts.lock().unwrap().clone();
    assert_eq!(contexts[0], vec!["one"]);
    assert_eq!(contexts[1], vec!["one", "echo: one", "two"]);
    assert_eq!(contexts[2], vec!["two", "echo: two", "three"]);
}

#[tokio::test(start_paused = true)]
async fn initiative_requires_memory() {
    let h = harness(PersonalityTag::Casual).await;
    h.manager.activate("emma", None).await;
    assert_eq!(h.manager.initiate("c2").await.unwrap(), Disposition::Ignored);

    h.manager.handle_incoming(&chat("c2", "hi")).await.unwrap();
    let disposition = h.manager.initiate("c2").await.unwrap();
    let text = disposition.message().unwrap().text.clone();
    assert!(Responder::default()
        .initiative_lines()
        .iter()
        .any(|line| *line == text));
    assert_eq!(h.manager.conversation("c2").await.unwrap().message_count, 3);
}

#[tokio::test(start_paused = true)]
async fn human_typing_is_relayed() {
    let h = harness(PersonalityTag::Casual).await;
    let mut rx = h.bus.subscribe_room("c1").await;

    h.manager.note_typing("sam", "c1", true).await.unwrap();
    assert_eq!(h.manager.typing_in("c1").await, vec!["sam"]);
    h.manager.note_typing("sam", "c1", false).await.unwrap();
    assert!(h.manager.typing_in("c1").await.is_empty());

    let events = drain(&mut rx);
    assert_eq!(shape(&events), vec!["typing:true", "typing:false"]);
    assert_eq!(events[0].event_name(), "user_typing");
}

#[tokio::test(start_paused = true)]
async fn activate_all_picks_up_scripted_identities() {
    let h = harness(PersonalityTag::Casual).await;
    h.dir
        .put_identity(IdentityProfile {
            id: "liam".into(),
            display_name: "Liam".into(),
            personality: PersonalityTag::Flirty,
            scripted: true,
            ..Default::default()
        })
        .await;

    assert_eq!(h.manager.activate_all().await.unwrap(), 2);
    assert_eq!(h.manager.active_ids().await, vec!["emma", "liam"]);
    assert!(!h.manager.is_scripted("sam").await);

    let stats = h.manager.stats().await;
    assert_eq!(stats.identities, 2);
    assert_eq!(stats.personalities.get(&PersonalityTag::Flirty), Some(&1));
}
