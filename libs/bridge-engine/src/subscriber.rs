use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_api::{BridgeError, BrokerSubscriber, ChannelProvider, DeliveryToken, ReceivedMessage};
use rand::Rng;
use tokio::time::Instant;

pub const DEFAULT_SUBSCRIBER_POOL_SIZE: usize = 10;

// ════════════════════════════════════════════════════════════════
//  Rotation window
// ════════════════════════════════════════════════════════════════

/// Время жизни одного stub: `min + uniform(0..=jitter)`.
///
/// Соединения обновляются раньше, чем брокер закроет их сам, и в случайные
/// моменты, чтобы пул не переподключался целиком.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationWindow {
    pub min: Duration,
    pub jitter: Duration,
}

impl Default for RotationWindow {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(25 * 60),
            jitter: Duration::from_secs(10 * 60),
        }
    }
}

impl RotationWindow {
    fn next_lifetime(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.min + Duration::from_millis(extra)
    }
}

// ════════════════════════════════════════════════════════════════
//  RotatingSubscriber
// ════════════════════════════════════════════════════════════════

struct Stub {
    stub: Arc<dyn BrokerSubscriber>,
    next_reset: Instant,
}

/// One channel to the broker, created on first use and rebuilt once its
/// deadline has passed. The check-and-rebuild runs under the slot lock.
pub struct RotatingSubscriber {
    provider: Arc<dyn ChannelProvider>,
    window: RotationWindow,
    slot: Mutex<Option<Stub>>,
}

impl RotatingSubscriber {
    pub fn new(provider: Arc<dyn ChannelProvider>, window: RotationWindow) -> Self {
        Self { provider, window, slot: Mutex::new(None) }
    }

    /// Живой stub для очередного вызова; пересоздаётся после дедлайна.
    fn current(&self) -> Result<Arc<dyn BrokerSubscriber>, BridgeError> {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("subscriber slot lock poisoned, recovering");
            poisoned.into_inner()
        });
        let now = Instant::now();

        if let Some(current) = slot.as_ref() {
            if now <= current.next_reset {
                return Ok(current.stub.clone());
            }
            tracing::debug!("subscriber stub expired, reconnecting");
        }

        // старый stub не переиспользуется даже если переподключение упадёт
        *slot = None;
        let stub = self
            .provider
            .subscriber()
            .map_err(|e| e.with_context("connect subscriber"))?;
        *slot = Some(Stub {
            stub: stub.clone(),
            next_reset: now + self.window.next_lifetime(),
        });
        Ok(stub)
    }
}

impl BrokerSubscriber for RotatingSubscriber {
    fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReceivedMessage>, BridgeError>> + Send + '_>> {
        let subscription = subscription.to_string();
        Box::pin(async move {
            let stub = self.current()?;
            stub.pull(&subscription, max_messages).await
        })
    }

    fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: Vec<DeliveryToken>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        let subscription = subscription.to_string();
        Box::pin(async move {
            let stub = self.current()?;
            stub.acknowledge(&subscription, ack_ids).await
        })
    }

    fn get_subscription(
        &self,
        subscription: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        let subscription = subscription.to_string();
        Box::pin(async move {
            let stub = self.current()?;
            stub.get_subscription(&subscription).await
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  SubscriberPool
// ════════════════════════════════════════════════════════════════

/// Фиксированный набор ротируемых subscriber. Каждый вызов (pull или
/// acknowledge) уходит в следующий handle по кругу.
pub struct SubscriberPool {
    handles: Vec<RotatingSubscriber>,
    cursor: AtomicUsize,
}

impl SubscriberPool {
    pub fn new(provider: Arc<dyn ChannelProvider>, size: usize) -> Self {
        Self::with_window(provider, size, RotationWindow::default())
    }

    pub fn with_window(provider: Arc<dyn ChannelProvider>, size: usize, window: RotationWindow) -> Self {
        let size = size.max(1);
        let handles = (0..size)
            .map(|_| RotatingSubscriber::new(provider.clone(), window))
            .collect();
        Self {
            handles,
            cursor: AtomicUsize::new(size - 1),
        }
    }

    fn next(&self) -> &RotatingSubscriber {
        let n = self.handles.len();
        let prev = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % n))
            .unwrap_or_else(|c| c);
        &self.handles[(prev + 1) % n]
    }
}

impl BrokerSubscriber for SubscriberPool {
    fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReceivedMessage>, BridgeError>> + Send + '_>> {
        self.next().pull(subscription, max_messages)
    }

    fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: Vec<DeliveryToken>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        self.next().acknowledge(subscription, ack_ids)
    }

    fn get_subscription(
        &self,
        subscription: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        self.next().get_subscription(subscription)
    }
}
