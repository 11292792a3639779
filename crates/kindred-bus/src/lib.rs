use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kindred_schema::ChatEvent;
use tokio::sync::{mpsc, RwLock};

/// Where a subscriber listens: one conversation room, or every room.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum Topic {
    Room(String),
    All,
}

impl Topic {
    pub fn room(conversation_id: impl Into<String>) -> Self {
        Topic::Room(conversation_id.into())
    }
}

/// Publish side of the real-time layer. Delivery is at-most-once.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, conversation_id: &str, event: ChatEvent) -> Result<()>;
}

type Subscriber = mpsc::Sender<ChatEvent>;
type SubscriberMap = Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>;

pub struct EventBus {
    subscribers: SubscriberMap,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(topic).or_default().push(tx);
        rx
    }

    pub async fn subscribe_room(&self, conversation_id: &str) -> mpsc::Receiver<ChatEvent> {
        self.subscribe(Topic::room(conversation_id)).await
    }

    pub async fn publish(&self, conversation_id: &str, event: ChatEvent) -> Result<()> {
        self.publisher().publish(conversation_id, event).await
    }

    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        let subs = self.subscribers.read().await;
        subs.get(topic).map(Vec::len).unwrap_or(0)
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BusPublisher {
    subscribers: SubscriberMap,
}

impl BusPublisher {
    pub async fn publish(&self, conversation_id: &str, event: ChatEvent) -> Result<()> {
        let room = Topic::room(conversation_id);
        let mut stale = false;
        {
            let subs = self.subscribers.read().await;
            for topic in [&room, &Topic::All] {
                let Some(subscribers) = subs.get(topic) else {
                    continue;
                };
                for tx in subscribers {
                    if tx.is_closed() {
                        stale = true;
                        continue;
                    }
                    if tx.try_send(event.clone()).is_err() {
                        tracing::debug!(
                            conversation_id,
                            event = event.event_name(),
                            "subscriber lagging, event dropped"
                        );
                    }
                }
            }
        }

        if stale {
            let mut subs = self.subscribers.write().await;
            subs.retain(|_, subscribers| {
                subscribers.retain(|tx| !tx.is_closed());
                !subscribers.is_empty()
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for BusPublisher {
    async fn publish(&self, conversation_id: &str, event: ChatEvent) -> Result<()> {
        BusPublisher::publish(self, conversation_id, event).await
    }
}

#[async_trait]
impl Transport for EventBus {
    async fn publish(&self, conversation_id: &str, event: ChatEvent) -> Result<()> {
        EventBus::publish(self, conversation_id, event).await
    }
}
