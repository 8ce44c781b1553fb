use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BridgeError;
use crate::message::{DeliveryToken, Message, ReceivedMessage};

// ════════════════════════════════════════════════════════════════
//  Subscriber side
// ════════════════════════════════════════════════════════════════

/// Pull/acknowledge stub of the broker.
///
/// Two families of implementations: a direct stub bound to one transport
/// channel, and `SubscriberPool` which spreads calls over several of them.
pub trait BrokerSubscriber: Send + Sync {
    /// Blocking pull: waits until at least one message is available or the
    /// broker gives up. Returns at most `max_messages` entries in broker order.
    fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReceivedMessage>, BridgeError>> + Send + '_>>;

    /// Acknowledge a batch of deliveries in one request.
    fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: Vec<DeliveryToken>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;

    /// Check that the subscription exists and is reachable.
    fn get_subscription(
        &self,
        subscription: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;
}

// ════════════════════════════════════════════════════════════════
//  Publisher side
// ════════════════════════════════════════════════════════════════

/// Completion of one publish: server-assigned message id or the failure.
///
/// Owns everything it needs, so it can outlive the publisher call and be
/// awaited later by the flush barrier.
pub type PublishHandle = Pin<Box<dyn Future<Output = Result<String, BridgeError>> + Send + 'static>>;

/// Publisher bound to one broker topic.
pub trait BrokerPublisher: Send + Sync {
    /// Hand the message to the transport. Submission order is the send
    /// order; completion order is not guaranteed.
    fn publish(&self, message: Message) -> PublishHandle;
}

/// Client-side batching thresholds of the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchingSettings {
    pub element_count_threshold: u64,
    pub request_byte_threshold: u64,
    pub delay_threshold: Duration,
}

/// Retry policy of the publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub total_timeout: Duration,
    pub max_rpc_timeout: Duration,
    pub initial_retry_delay: Duration,
    pub retry_delay_multiplier: f64,
    pub initial_rpc_timeout: Duration,
    pub rpc_timeout_multiplier: f64,
}

impl RetrySettings {
    /// Library defaults for everything except the two configurable timeouts.
    pub fn with_timeouts(total_timeout: Duration, max_rpc_timeout: Duration) -> Self {
        Self {
            total_timeout,
            max_rpc_timeout,
            initial_retry_delay: Duration::from_millis(5),
            retry_delay_multiplier: 2.0,
            initial_rpc_timeout: Duration::from_secs(10),
            rpc_timeout_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublisherSettings {
    pub batching: BatchingSettings,
    pub retry: RetrySettings,
}

// ════════════════════════════════════════════════════════════════
//  Channel provider
// ════════════════════════════════════════════════════════════════

/// Builds authenticated transport-backed stubs to the broker endpoint.
///
/// Credential caching and TLS setup live behind this trait. Every call is
/// expected to open a fresh channel; callers decide when to rotate.
pub trait ChannelProvider: Send + Sync {
    fn subscriber(&self) -> Result<Arc<dyn BrokerSubscriber>, BridgeError>;

    fn publisher(
        &self,
        topic: &str,
        settings: &PublisherSettings,
    ) -> Result<Arc<dyn BrokerPublisher>, BridgeError>;
}
