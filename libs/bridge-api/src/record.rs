use serde::{Deserialize, Serialize};

use crate::message::DeliveryToken;
use crate::schema::{Schema, Value};

/// Log topic + partition pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self { topic: topic.into(), partition }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Opaque commit metadata of a source record: which delivery to acknowledge
/// once the log has durably appended the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceOffset {
    pub subscription: String,
    pub ack_id: DeliveryToken,
}

/// Record emitted by the source direction into the log.
///
/// The key schema is always an optional string.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub topic: String,
    pub partition: u32,
    pub key: Option<String>,
    pub value_schema: Schema,
    pub value: Value,
    /// Unix ms.
    pub timestamp_ms: i64,
    pub offset: SourceOffset,
}

/// Record handed to the sink direction by the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
    #[serde(default)]
    pub key: Option<Value>,
    /// `None`: schemaless value, encoded as its string form.
    #[serde(default)]
    pub value_schema: Option<Schema>,
    pub value: Value,
}

impl SinkRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}
