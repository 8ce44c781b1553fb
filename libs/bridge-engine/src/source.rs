use std::sync::Arc;

use bridge_api::{
    BrokerSubscriber, ChannelProvider, ReceivedMessage, SourceOffset, SourceRecord,
};
use tokio::task::JoinHandle;

use crate::ack::{AckTracker, PullVerdict};
use crate::codec;
use crate::config::{ConfigValues, SourceConfig};
use crate::error::TaskError;
use crate::partition::PartitionSelector;
use crate::subscriber::{DEFAULT_SUBSCRIBER_POOL_SIZE, SubscriberPool};

/// Направление брокер → лог.
///
/// A pulled delivery is emitted at most once while its token is tracked;
/// it is acknowledged only after the host reports the record as committed.
pub struct SourceTask {
    config: SourceConfig,
    subscriber: Arc<dyn BrokerSubscriber>,
    tracker: AckTracker,
    selector: PartitionSelector,
}

impl SourceTask {
    /// Parse the properties, build the subscriber pool and check that the
    /// subscription is reachable.
    pub async fn start(values: &ConfigValues, provider: Arc<dyn ChannelProvider>) -> Result<Self, TaskError> {
        let config = SourceConfig::from_values(values)?;
        let pool = Arc::new(SubscriberPool::new(provider, DEFAULT_SUBSCRIBER_POOL_SIZE));

        pool.get_subscription(&config.subscription).await.map_err(|e| {
            TaskError::Config(format!(
                "subscription '{}' is not reachable: {e}",
                config.subscription
            ))
        })?;

        tracing::info!(
            subscription = %config.subscription,
            topic = %config.topic,
            partitions = config.partition_count,
            scheme = %config.partition_scheme,
            "source task started"
        );
        Ok(Self::with_subscriber(config, pool))
    }

    pub fn with_subscriber(config: SourceConfig, subscriber: Arc<dyn BrokerSubscriber>) -> Self {
        let selector = PartitionSelector::new(config.partition_scheme, config.partition_count);
        Self {
            config,
            subscriber,
            tracker: AckTracker::new(),
            selector,
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn tracker(&self) -> &AckTracker {
        &self.tracker
    }

    /// One pull cycle. Broker failures and timeouts yield an empty batch;
    /// the next cycle retries.
    pub async fn poll(&self) -> Vec<SourceRecord> {
        self.tracker
            .drain_and_acknowledge(self.subscriber.clone(), &self.config.subscription);

        let pull = self
            .subscriber
            .pull(&self.config.subscription, self.config.max_batch_size);
        let pulled = match tokio::time::timeout(self.config.pull_timeout, pull).await {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                tracing::warn!(subscription = %self.config.subscription, error = %e, "pull failed");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(
                    subscription = %self.config.subscription,
                    timeout_ms = self.config.pull_timeout.as_millis() as u64,
                    "pull timed out"
                );
                return Vec::new();
            }
        };

        let received = pulled.len();
        let mut records = Vec::with_capacity(received);
        for message in pulled {
            if self.tracker.on_pull(&message.ack_id) == PullVerdict::Duplicate {
                tracing::trace!(ack_id = %message.ack_id, "duplicate delivery skipped");
                continue;
            }
            records.push(self.to_record(message));
        }

        if received > 0 {
            tracing::debug!(
                subscription = %self.config.subscription,
                received,
                emitted = records.len(),
                "poll"
            );
        }
        records
    }

    /// Ключ, timestamp и партиция для одного принятого сообщения.
    fn to_record(&self, received: ReceivedMessage) -> SourceRecord {
        let ReceivedMessage { ack_id, message, publish_time_ms } = received;
        let key_attr = self.config.key_attribute.as_deref();
        let ts_attr = self.config.timestamp_attribute.as_deref();

        let key = key_attr
            .and_then(|name| message.attribute(name))
            .map(str::to_string);
        let timestamp_ms = match ts_attr.and_then(|name| message.attribute(name)) {
            None => publish_time_ms,
            Some(raw) => raw.parse::<i64>().unwrap_or_else(|e| {
                tracing::error!(
                    ack_id = %ack_id,
                    value = raw,
                    error = %e,
                    "timestamp attribute is not a number, using publish time"
                );
                publish_time_ms
            }),
        };

        let (value_schema, value) = codec::classify(&message, key_attr, ts_attr);
        let partition = self.selector.select(key.as_deref(), &value);

        SourceRecord {
            topic: self.config.topic.clone(),
            partition,
            key,
            value_schema,
            value,
            timestamp_ms,
            offset: SourceOffset {
                subscription: self.config.subscription.clone(),
                ack_id,
            },
        }
    }

    /// Лог сохранил `record`, доставку можно подтверждать.
    pub fn commit_record(&self, record: &SourceRecord) {
        self.tracker.on_downstream_commit(&record.offset.ack_id);
    }

    /// Запись не сохранена в лог: токен не подтверждается и не держится
    /// в `pulled`, повторная доставка придёт под новым токеном.
    pub fn forget_record(&self, record: &SourceRecord) {
        self.tracker.forget(&record.offset.ack_id);
    }

    /// Commit barrier: acknowledge everything committed so far.
    pub fn commit(&self) -> Option<JoinHandle<()>> {
        self.tracker
            .drain_and_acknowledge(self.subscriber.clone(), &self.config.subscription)
    }

    pub fn stop(&self) {
        let (pulled, pending, in_flight) = self.tracker.counts();
        tracing::info!(
            subscription = %self.config.subscription,
            pulled,
            pending,
            in_flight,
            "source task stopped"
        );
        self.tracker.reset();
    }
}
