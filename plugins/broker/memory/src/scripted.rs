use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bridge_api::{
    BridgeError, BrokerPublisher, BrokerSubscriber, DeliveryToken, Message, PublishHandle,
    ReceivedMessage,
};
use tokio::sync::oneshot;

use crate::lock;

// ═══════════════════════════════════════════════════════════════
//  ScriptedSubscriber
// ═══════════════════════════════════════════════════════════════

struct PullStep {
    delay: Option<Duration>,
    result: Result<Vec<ReceivedMessage>, BridgeError>,
}

/// Subscriber that replays queued pull and acknowledge outcomes.
///
/// An empty pull queue yields empty batches; an empty ack queue succeeds.
#[derive(Default)]
pub struct ScriptedSubscriber {
    pulls: Mutex<VecDeque<PullStep>>,
    acks: Mutex<VecDeque<Result<(), BridgeError>>>,
    ack_calls: Mutex<Vec<Vec<DeliveryToken>>>,
    pull_calls: AtomicUsize,
}

impl ScriptedSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pull(&self, result: Result<Vec<ReceivedMessage>, BridgeError>) {
        lock(&self.pulls, "scripted pulls").push_back(PullStep { delay: None, result });
    }

    /// Pull завершится только через `delay`.
    pub fn push_pull_delay(&self, delay: Duration, result: Result<Vec<ReceivedMessage>, BridgeError>) {
        lock(&self.pulls, "scripted pulls").push_back(PullStep { delay: Some(delay), result });
    }

    pub fn push_ack(&self, result: Result<(), BridgeError>) {
        lock(&self.acks, "scripted acks").push_back(result);
    }

    /// Батчи токенов всех вызовов acknowledge, в порядке вызовов.
    pub fn ack_calls(&self) -> Vec<Vec<DeliveryToken>> {
        lock(&self.ack_calls, "scripted ack calls").clone()
    }

    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }
}

impl BrokerSubscriber for ScriptedSubscriber {
    fn pull(
        &self,
        _subscription: &str,
        _max_messages: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReceivedMessage>, BridgeError>> + Send + '_>> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        let step = lock(&self.pulls, "scripted pulls").pop_front();
        Box::pin(async move {
            match step {
                None => Ok(Vec::new()),
                Some(PullStep { delay, result }) => {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    result
                }
            }
        })
    }

    fn acknowledge(
        &self,
        _subscription: &str,
        ack_ids: Vec<DeliveryToken>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        let mut sorted = ack_ids;
        sorted.sort();
        lock(&self.ack_calls, "scripted ack calls").push(sorted);
        let result = lock(&self.acks, "scripted acks").pop_front().unwrap_or(Ok(()));
        Box::pin(async move { result })
    }

    fn get_subscription(
        &self,
        _subscription: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  ManualPublisher
// ═══════════════════════════════════════════════════════════════

/// Publisher whose handles stay pending until the test completes them,
/// in submission order.
#[derive(Default)]
pub struct ManualPublisher {
    waiting: Mutex<VecDeque<oneshot::Sender<Result<String, BridgeError>>>>,
    published: Mutex<Vec<Message>>,
}

impl ManualPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Завершить самый старый handle. `false`, если ждать нечего.
    pub fn complete_next(&self, result: Result<String, BridgeError>) -> bool {
        let Some(tx) = lock(&self.waiting, "manual waiting").pop_front() else {
            return false;
        };
        // получатель мог быть уже отброшен (stop); это не ошибка
        let _ = tx.send(result);
        true
    }

    /// Сколько handle ещё не завершены.
    pub fn waiting(&self) -> usize {
        lock(&self.waiting, "manual waiting").len()
    }

    pub fn published(&self) -> Vec<Message> {
        lock(&self.published, "manual published").clone()
    }
}

impl BrokerPublisher for ManualPublisher {
    fn publish(&self, message: Message) -> PublishHandle {
        let (tx, rx) = oneshot::channel();
        lock(&self.waiting, "manual waiting").push_back(tx);
        lock(&self.published, "manual published").push(message);
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(BridgeError::io("publisher dropped the request")))
        })
    }
}
