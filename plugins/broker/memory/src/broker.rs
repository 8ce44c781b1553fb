use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bridge_api::{
    BridgeError, BrokerPublisher, BrokerSubscriber, ChannelProvider, DeliveryToken, Message,
    PublishHandle, PublisherSettings, ReceivedMessage, now_ms,
};

use crate::lock;

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
struct Stored {
    message: Message,
    publish_time_ms: i64,
}

#[derive(Default)]
struct SubscriptionState {
    backlog: VecDeque<Stored>,
    /// Доставлены, но ещё не подтверждены.
    outstanding: HashMap<DeliveryToken, Stored>,
    acknowledged: usize,
}

#[derive(Default)]
struct BrokerState {
    /// topic → subscriptions attached to it
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, SubscriptionState>,
    published: HashMap<String, Vec<Message>>,
    next_ack: u64,
    next_message_id: u64,
    fail_acks: usize,
    fail_publishes: usize,
    ack_requests: usize,
}

/// Pull broker with at-least-once semantics: a delivery stays outstanding
/// until acknowledged and can be redelivered under a fresh ack id.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_topic(&self, topic: &str) {
        let mut state = lock(&self.state, "broker");
        state.topics.entry(topic.to_string()).or_default();
    }

    /// Привязать подписку к топику; топик создаётся при необходимости.
    pub fn create_subscription(&self, topic: &str, subscription: &str) {
        let mut state = lock(&self.state, "broker");
        let subs = state.topics.entry(topic.to_string()).or_default();
        if !subs.iter().any(|s| s == subscription) {
            subs.push(subscription.to_string());
        }
        state.subscriptions.entry(subscription.to_string()).or_default();
    }

    /// Publish into every subscription of `topic`. Returns the message id.
    pub fn publish_message(&self, topic: &str, message: Message) -> Result<String, BridgeError> {
        let mut state = lock(&self.state, "broker");
        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            return Err(BridgeError::io(format!("publish to {topic} rejected")));
        }
        let Some(subs) = state.topics.get(topic).cloned() else {
            return Err(BridgeError::config(format!("topic {topic} not found")));
        };

        let stored = Stored { message: message.clone(), publish_time_ms: now_ms() };
        for sub in subs {
            if let Some(s) = state.subscriptions.get_mut(&sub) {
                s.backlog.push_back(stored.clone());
            }
        }
        state.published.entry(topic.to_string()).or_default().push(message);
        state.next_message_id += 1;
        Ok(state.next_message_id.to_string())
    }

    pub fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>, BridgeError> {
        let mut guard = lock(&self.state, "broker");
        let state = &mut *guard;
        let Some(sub) = state.subscriptions.get_mut(subscription) else {
            return Err(BridgeError::config(format!("subscription {subscription} not found")));
        };

        let mut out = Vec::new();
        while out.len() < max_messages {
            let Some(stored) = sub.backlog.pop_front() else {
                break;
            };
            state.next_ack += 1;
            let ack_id = DeliveryToken::new(format!("ack-{}", state.next_ack));
            out.push(ReceivedMessage::new(
                ack_id.clone(),
                stored.message.clone(),
                stored.publish_time_ms,
            ));
            sub.outstanding.insert(ack_id, stored);
        }
        Ok(out)
    }

    /// Неизвестные ack id игнорируются, как просроченный дедлайн у настоящего брокера.
    pub fn acknowledge(&self, subscription: &str, ack_ids: &[DeliveryToken]) -> Result<(), BridgeError> {
        let mut state = lock(&self.state, "broker");
        state.ack_requests += 1;
        if state.fail_acks > 0 {
            state.fail_acks -= 1;
            return Err(BridgeError::io("acknowledge rejected"));
        }
        let Some(sub) = state.subscriptions.get_mut(subscription) else {
            return Err(BridgeError::config(format!("subscription {subscription} not found")));
        };
        for id in ack_ids {
            if sub.outstanding.remove(id).is_some() {
                sub.acknowledged += 1;
            }
        }
        Ok(())
    }

    pub fn has_subscription(&self, subscription: &str) -> bool {
        lock(&self.state, "broker").subscriptions.contains_key(subscription)
    }

    /// Просрочить все неподтверждённые доставки: они возвращаются в начало
    /// backlog и на следующем pull получают новые ack id.
    pub fn redeliver_outstanding(&self, subscription: &str) -> usize {
        let mut state = lock(&self.state, "broker");
        let Some(sub) = state.subscriptions.get_mut(subscription) else {
            return 0;
        };
        let mut expired: Vec<(DeliveryToken, Stored)> = sub.outstanding.drain().collect();
        expired.sort_by(|a, b| a.0.cmp(&b.0));
        let count = expired.len();
        for (_, stored) in expired.into_iter().rev() {
            sub.backlog.push_front(stored);
        }
        count
    }

    pub fn fail_next_acks(&self, n: usize) {
        lock(&self.state, "broker").fail_acks = n;
    }

    pub fn fail_next_publishes(&self, n: usize) {
        lock(&self.state, "broker").fail_publishes = n;
    }

    pub fn backlog(&self, subscription: &str) -> usize {
        let state = lock(&self.state, "broker");
        state.subscriptions.get(subscription).map_or(0, |s| s.backlog.len())
    }

    pub fn outstanding(&self, subscription: &str) -> usize {
        let state = lock(&self.state, "broker");
        state.subscriptions.get(subscription).map_or(0, |s| s.outstanding.len())
    }

    pub fn acknowledged(&self, subscription: &str) -> usize {
        let state = lock(&self.state, "broker");
        state.subscriptions.get(subscription).map_or(0, |s| s.acknowledged)
    }

    pub fn ack_requests(&self) -> usize {
        lock(&self.state, "broker").ack_requests
    }

    pub fn published(&self, topic: &str) -> Vec<Message> {
        let state = lock(&self.state, "broker");
        state.published.get(topic).cloned().unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Stubs
// ═══════════════════════════════════════════════════════════════

pub struct MemorySubscriber {
    broker: MemoryBroker,
}

impl BrokerSubscriber for MemorySubscriber {
    fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReceivedMessage>, BridgeError>> + Send + '_>> {
        let result = self.broker.pull(subscription, max_messages);
        Box::pin(async move { result })
    }

    fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: Vec<DeliveryToken>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        let result = self.broker.acknowledge(subscription, &ack_ids);
        Box::pin(async move { result })
    }

    fn get_subscription(
        &self,
        subscription: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        let result = if self.broker.has_subscription(subscription) {
            Ok(())
        } else {
            Err(BridgeError::config(format!("subscription {subscription} not found")))
        };
        Box::pin(async move { result })
    }
}

pub struct MemoryPublisher {
    broker: MemoryBroker,
    topic: String,
}

impl BrokerPublisher for MemoryPublisher {
    fn publish(&self, message: Message) -> PublishHandle {
        let result = self.broker.publish_message(&self.topic, message);
        Box::pin(async move { result })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryChannelProvider
// ═══════════════════════════════════════════════════════════════

/// Hands out stubs bound to one `MemoryBroker`, counting connects.
pub struct MemoryChannelProvider {
    broker: MemoryBroker,
    connects: AtomicUsize,
    fail: AtomicBool,
    last_settings: Mutex<Option<PublisherSettings>>,
}

impl MemoryChannelProvider {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            connects: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            last_settings: Mutex::new(None),
        }
    }

    /// Сколько было успешных подключений.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn last_publisher_settings(&self) -> Option<PublisherSettings> {
        lock(&self.last_settings, "provider settings").clone()
    }

    fn connect(&self) -> Result<(), BridgeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::io("channel unavailable"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ChannelProvider for MemoryChannelProvider {
    fn subscriber(&self) -> Result<Arc<dyn BrokerSubscriber>, BridgeError> {
        self.connect()?;
        Ok(Arc::new(MemorySubscriber { broker: self.broker.clone() }))
    }

    fn publisher(
        &self,
        topic: &str,
        settings: &PublisherSettings,
    ) -> Result<Arc<dyn BrokerPublisher>, BridgeError> {
        self.connect()?;
        *lock(&self.last_settings, "provider settings") = Some(settings.clone());
        Ok(Arc::new(MemoryPublisher {
            broker: self.broker.clone(),
            topic: topic.to_string(),
        }))
    }
}
