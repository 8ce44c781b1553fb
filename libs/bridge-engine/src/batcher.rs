use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bridge_api::{BrokerPublisher, Message, PublishHandle, TopicPartition};
use futures::future::join_all;

use crate::error::TaskError;

/// Outstanding publishes of one sink task, grouped by log partition.
///
/// `submit` never waits. `flush` is the barrier: it waits for every handle
/// of the listed partitions and only then reports the first failure.
pub struct PublishBatcher {
    publisher: Arc<dyn BrokerPublisher>,
    outstanding: HashMap<TopicPartition, Vec<PublishHandle>>,
}

impl PublishBatcher {
    pub fn new(publisher: Arc<dyn BrokerPublisher>) -> Self {
        Self { publisher, outstanding: HashMap::new() }
    }

    pub fn submit(&mut self, tp: TopicPartition, message: Message) {
        let handle = self.publisher.publish(message);
        self.outstanding.entry(tp).or_default().push(handle);
    }

    /// Сколько handle ещё не прошли flush.
    pub fn pending(&self) -> usize {
        self.outstanding.values().map(Vec::len).sum()
    }

    pub fn pending_for(&self, tp: &TopicPartition) -> usize {
        self.outstanding.get(tp).map_or(0, Vec::len)
    }

    pub async fn flush<'a, I>(&mut self, partitions: I, total_timeout: Duration) -> Result<(), TaskError>
    where
        I: IntoIterator<Item = &'a TopicPartition>,
    {
        let mut waits = Vec::new();
        for tp in partitions {
            let Some(handles) = self.outstanding.remove(tp) else {
                continue;
            };
            for handle in handles {
                let tp = tp.clone();
                waits.push(async move { (tp, handle.await) });
            }
        }
        let count = waits.len();

        // ждём все, без short circuit: ошибка первого не отменяет остальные
        let results = tokio::time::timeout(total_timeout, join_all(waits))
            .await
            .map_err(|_| TaskError::FlushTimeout(total_timeout))?;

        for (tp, result) in results {
            if let Err(source) = result {
                tracing::error!(topic = %tp.topic, partition = tp.partition, error = %source, "publish failed");
                return Err(TaskError::Flush { tp, source });
            }
        }

        tracing::debug!(count, "flush complete");
        self.outstanding.clear();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.outstanding.clear();
    }
}
