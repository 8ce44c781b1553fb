use std::collections::HashMap;
use std::sync::Arc;

use bridge_api::{BrokerPublisher, ChannelProvider, Message, SinkRecord, TopicPartition};

use crate::batcher::PublishBatcher;
use crate::codec;
use crate::config::{ConfigValues, SinkConfig};
use crate::error::TaskError;

pub const KEY_ATTRIBUTE: &str = "key";
pub const TOPIC_ATTRIBUTE: &str = "kafka.topic";
pub const PARTITION_ATTRIBUTE: &str = "kafka.partition";
pub const OFFSET_ATTRIBUTE: &str = "kafka.offset";
pub const TIMESTAMP_ATTRIBUTE: &str = "kafka.timestamp";

/// Направление лог → брокер.
pub struct SinkTask {
    config: SinkConfig,
    batcher: PublishBatcher,
}

impl SinkTask {
    pub fn start(values: &ConfigValues, provider: Arc<dyn ChannelProvider>) -> Result<Self, TaskError> {
        let config = SinkConfig::from_values(values)?;
        let publisher = provider
            .publisher(&config.topic, &config.publisher_settings())
            .map_err(|e| TaskError::broker(format!("create publisher for {}", config.topic), e))?;

        tracing::info!(
            topic = %config.topic,
            metadata = config.include_metadata,
            body_field = %config.body_field,
            "sink task started"
        );
        Ok(Self::with_publisher(config, publisher))
    }

    pub fn with_publisher(config: SinkConfig, publisher: Arc<dyn BrokerPublisher>) -> Self {
        Self { config, batcher: PublishBatcher::new(publisher) }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn pending(&self) -> usize {
        self.batcher.pending()
    }

    /// Encode and submit every record. The first encoding error aborts the
    /// call; records before it are already submitted.
    pub fn put(&mut self, records: Vec<SinkRecord>) -> Result<(), TaskError> {
        for record in records {
            let message = self.to_message(&record).map_err(|source| TaskError::Encode {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                source,
            })?;
            self.batcher.submit(record.topic_partition(), message);
        }
        Ok(())
    }

    fn to_message(&self, record: &SinkRecord) -> Result<Message, bridge_api::BridgeError> {
        let (payload, mut attributes) = codec::encode(
            record.value_schema.as_ref(),
            &record.value,
            &self.config.body_field,
        )?;

        if let Some(key) = record.key.as_ref().filter(|k| !k.is_null()) {
            attributes.insert(KEY_ATTRIBUTE.to_string(), codec::stringify(key)?);
        }
        if self.config.include_metadata {
            attributes.insert(TOPIC_ATTRIBUTE.to_string(), record.topic.clone());
            attributes.insert(PARTITION_ATTRIBUTE.to_string(), record.partition.to_string());
            attributes.insert(OFFSET_ATTRIBUTE.to_string(), record.offset.to_string());
            if let Some(ts) = record.timestamp_ms {
                attributes.insert(TIMESTAMP_ATTRIBUTE.to_string(), ts.to_string());
            }
        }
        Ok(Message::new(payload, attributes))
    }

    /// Barrier before the host commits `offsets`. An error means the host
    /// must not commit past this batch.
    pub async fn flush(&mut self, offsets: &HashMap<TopicPartition, u64>) -> Result<(), TaskError> {
        self.batcher.flush(offsets.keys(), self.config.total_timeout).await
    }

    pub fn stop(&mut self) {
        tracing::info!(topic = %self.config.topic, abandoned = self.batcher.pending(), "sink task stopped");
        self.batcher.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use bridge_api::{Field, Schema, Value};
    use bridge_memory::{ManualPublisher, MemoryBroker, MemoryChannelProvider};

    use crate::config::{
        CPS_PROJECT, CPS_TOPIC, DELAY_THRESHOLD_MS, MAX_BUFFER_BYTES, MAX_BUFFER_SIZE,
        MAX_REQUEST_TIMEOUT_MS, MAX_TOTAL_TIMEOUT_MS,
    };

    fn config(include_metadata: bool) -> SinkConfig {
        SinkConfig {
            topic: "projects/p/topics/t".into(),
            max_buffer_size: 100,
            max_buffer_bytes: 10_000_000,
            delay_threshold: Duration::from_millis(100),
            request_timeout: Duration::from_secs(10),
            total_timeout: Duration::from_secs(60),
            include_metadata,
            body_field: "cps_message_body".into(),
        }
    }

    fn record(offset: u64, value: Value) -> SinkRecord {
        SinkRecord {
            topic: "log".into(),
            partition: 2,
            offset,
            timestamp_ms: Some(99),
            key: Some(Value::from("dog")),
            value_schema: Some(Schema::String),
            value,
        }
    }

    #[test]
    fn test_start_hands_publisher_settings_to_provider() {
        let broker = MemoryBroker::new();
        broker.create_topic("projects/p/topics/out");
        let provider = Arc::new(MemoryChannelProvider::new(broker));
        let values: ConfigValues = [
            (CPS_PROJECT, "p"),
            (CPS_TOPIC, "out"),
            (MAX_BUFFER_SIZE, "50"),
            (MAX_BUFFER_BYTES, "2048"),
            (DELAY_THRESHOLD_MS, "250"),
            (MAX_REQUEST_TIMEOUT_MS, "15000"),
            (MAX_TOTAL_TIMEOUT_MS, "90000"),
        ]
        .into_iter()
        .collect();

        let task = SinkTask::start(&values, provider.clone()).unwrap();
        assert_eq!(task.config().topic, "projects/p/topics/out");

        let settings = provider.last_publisher_settings().unwrap();
        assert_eq!(settings.batching.element_count_threshold, 50);
        assert_eq!(settings.batching.request_byte_threshold, 2048);
        assert_eq!(settings.batching.delay_threshold, Duration::from_millis(250));
        assert_eq!(settings.retry.max_rpc_timeout, Duration::from_secs(15));
        assert_eq!(settings.retry.total_timeout, Duration::from_secs(90));
        assert_eq!(settings.retry.initial_rpc_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_start_fails_when_publisher_is_unavailable() {
        let provider = Arc::new(MemoryChannelProvider::new(MemoryBroker::new()));
        provider.fail_connects(true);
        let values: ConfigValues = [(CPS_PROJECT, "p"), (CPS_TOPIC, "out")].into_iter().collect();

        let err = SinkTask::start(&values, provider.clone()).err().unwrap();
        assert!(matches!(err, TaskError::Broker { .. }));
        assert_eq!(provider.last_publisher_settings(), None);
    }

    #[tokio::test]
    async fn test_put_adds_key_and_metadata() {
        let publisher = Arc::new(ManualPublisher::new());
        let mut task = SinkTask::with_publisher(config(true), publisher.clone());
        task.put(vec![record(7, Value::from("hello"))]).unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        let msg = &published[0];
        assert_eq!(msg.payload(), b"hello");
        assert_eq!(msg.attribute(KEY_ATTRIBUTE), Some("dog"));
        assert_eq!(msg.attribute(TOPIC_ATTRIBUTE), Some("log"));
        assert_eq!(msg.attribute(PARTITION_ATTRIBUTE), Some("2"));
        assert_eq!(msg.attribute(OFFSET_ATTRIBUTE), Some("7"));
        assert_eq!(msg.attribute(TIMESTAMP_ATTRIBUTE), Some("99"));
    }

    #[tokio::test]
    async fn test_put_without_metadata() {
        let publisher = Arc::new(ManualPublisher::new());
        let mut task = SinkTask::with_publisher(config(false), publisher.clone());
        let mut r = record(1, Value::from("x"));
        r.key = None;
        task.put(vec![r]).unwrap();
        assert!(publisher.published()[0].attributes().is_empty());
    }

    #[tokio::test]
    async fn test_encode_error_names_the_record() {
        let publisher = Arc::new(ManualPublisher::new());
        let mut task = SinkTask::with_publisher(config(false), publisher.clone());
        let mut bad = record(5, Value::Struct(vec![]));
        bad.value_schema = Some(Schema::struct_of(vec![Field::required("id", Schema::Int32)]));

        let err = task.put(vec![record(4, Value::from("ok")), bad]).unwrap_err();
        assert!(matches!(err, TaskError::Encode { offset: 5, partition: 2, .. }));
        assert_eq!(task.pending(), 1);
    }

    #[tokio::test]
    async fn test_flush_then_stop() {
        let publisher = Arc::new(ManualPublisher::new());
        let mut task = SinkTask::with_publisher(config(false), publisher.clone());
        task.put(vec![record(1, Value::from("a"))]).unwrap();
        publisher.complete_next(Ok("m-1".into()));

        let offsets = HashMap::from([(TopicPartition::new("log", 2), 2)]);
        task.flush(&offsets).await.unwrap();
        assert_eq!(task.pending(), 0);

        task.put(vec![record(2, Value::from("b"))]).unwrap();
        task.stop();
        assert_eq!(task.pending(), 0);
    }
}
