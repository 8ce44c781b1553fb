use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use bridge_api::{BrokerSubscriber, DeliveryToken};
use tokio::task::JoinHandle;

/// Результат регистрации только что полученной доставки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullVerdict {
    /// Новый токен, запись отдаётся дальше.
    Accept,
    /// Токен уже отслеживается, повторно запись не отдаётся.
    Duplicate,
}

/// В каком множестве сейчас лежит токен.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Pulled,
    PendingAck,
    InFlight,
}

#[derive(Debug, Default)]
struct AckState {
    pulled: HashSet<DeliveryToken>,
    pending: HashSet<DeliveryToken>,
    in_flight: HashSet<DeliveryToken>,
    /// Растёт на каждом `reset`; завершения старых батчей игнорируются.
    generation: u64,
}

/// Батч токенов, переведённый в `inFlight` одним `begin_drain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drain {
    generation: u64,
    tokens: Vec<DeliveryToken>,
}

impl Drain {
    pub fn tokens(&self) -> &[DeliveryToken] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl AckState {
    fn contains(&self, token: &DeliveryToken) -> bool {
        self.pulled.contains(token) || self.pending.contains(token) || self.in_flight.contains(token)
    }
}

/// Delivery token state machine of one source task.
///
/// `unseen -> pulled -> pendingAck -> inFlight -> (removed)`; a failed
/// acknowledge moves the batch from `inFlight` back to `pendingAck`.
/// The three sets are disjoint and sit behind one lock.
#[derive(Debug, Clone, Default)]
pub struct AckTracker {
    state: Arc<Mutex<AckState>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AckState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("ack tracker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn on_pull(&self, token: &DeliveryToken) -> PullVerdict {
        let mut state = self.lock();
        if state.contains(token) {
            return PullVerdict::Duplicate;
        }
        state.pulled.insert(token.clone());
        PullVerdict::Accept
    }

    /// The log has durably stored the record. Commits are authoritative:
    /// an unknown token still becomes pending.
    pub fn on_downstream_commit(&self, token: &DeliveryToken) {
        let mut state = self.lock();
        state.pulled.remove(token);
        if !state.in_flight.contains(token) {
            state.pending.insert(token.clone());
        }
    }

    /// Запись не попала в лог: токен больше не ждём. Брокер доставит
    /// сообщение повторно под новым токеном.
    pub fn forget(&self, token: &DeliveryToken) {
        self.lock().pulled.remove(token);
    }

    /// Снять `pendingAck` целиком и перенести в `inFlight`.
    pub fn begin_drain(&self) -> Option<Drain> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return None;
        }
        let tokens: Vec<DeliveryToken> = state.pending.drain().collect();
        state.in_flight.extend(tokens.iter().cloned());
        Some(Drain { generation: state.generation, tokens })
    }

    /// Завершить батч. Батч, начатый до `reset`, ничего не меняет.
    pub fn complete_drain(&self, batch: &Drain, acknowledged: bool) {
        let mut state = self.lock();
        if batch.generation != state.generation {
            tracing::debug!(count = batch.len(), "drain completed after reset, ignored");
            return;
        }
        for token in &batch.tokens {
            state.in_flight.remove(token);
            if !acknowledged {
                state.pending.insert(token.clone());
            }
        }
    }

    /// Забрать `pendingAck` и отправить один acknowledge на весь батч,
    /// не дожидаясь ответа. Возвращает запущенный запрос, если он есть.
    pub fn drain_and_acknowledge(
        &self,
        subscriber: Arc<dyn BrokerSubscriber>,
        subscription: &str,
    ) -> Option<JoinHandle<()>> {
        let batch = self.begin_drain()?;
        let tracker = self.clone();
        let subscription = subscription.to_string();

        tracing::debug!(subscription = %subscription, count = batch.len(), "acknowledging");
        Some(tokio::spawn(async move {
            let result = subscriber.acknowledge(&subscription, batch.tokens.clone()).await;
            match result {
                Ok(()) => {
                    tracing::trace!(subscription = %subscription, count = batch.len(), "acknowledged");
                    tracker.complete_drain(&batch, true);
                }
                Err(e) => {
                    tracing::error!(
                        subscription = %subscription,
                        count = batch.len(),
                        error = %e,
                        "acknowledge failed, tokens will be retried"
                    );
                    tracker.complete_drain(&batch, false);
                }
            }
        }))
    }

    pub fn state_of(&self, token: &DeliveryToken) -> Option<TokenState> {
        let state = self.lock();
        if state.pulled.contains(token) {
            Some(TokenState::Pulled)
        } else if state.pending.contains(token) {
            Some(TokenState::PendingAck)
        } else if state.in_flight.contains(token) {
            Some(TokenState::InFlight)
        } else {
            None
        }
    }

    /// Размеры `(pulled, pendingAck, inFlight)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        let state = self.lock();
        (state.pulled.len(), state.pending.len(), state.in_flight.len())
    }

    /// Забыть все токены. Acknowledge, ещё летящие в этот момент,
    /// по завершении состояние не трогают.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.pulled.clear();
        state.pending.clear();
        state.in_flight.clear();
        state.generation += 1;
    }
}
