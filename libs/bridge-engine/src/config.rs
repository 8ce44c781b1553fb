use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use bridge_api::{BatchingSettings, PublisherSettings, RetrySettings};

use crate::error::TaskError;
use crate::partition::PartitionScheme;

// ═══════════════════════════════════════════════════════════════
//  Property names
// ═══════════════════════════════════════════════════════════════

pub const CPS_PROJECT: &str = "cps.project";
pub const CPS_SUBSCRIPTION: &str = "cps.subscription";
pub const CPS_TOPIC: &str = "cps.topic";
pub const CPS_MAX_BATCH_SIZE: &str = "cps.maxBatchSize";
pub const CPS_PULL_TIMEOUT_MS: &str = "cps.pullTimeoutMs";
pub const KAFKA_TOPIC: &str = "kafka.topic";
pub const KAFKA_PARTITION_COUNT: &str = "kafka.partition.count";
pub const KAFKA_PARTITION_SCHEME: &str = "kafka.partition.scheme";
pub const KAFKA_KEY_ATTRIBUTE: &str = "kafka.key.attribute";
pub const KAFKA_TIMESTAMP_ATTRIBUTE: &str = "kafka.timestamp.attribute";
pub const MAX_BUFFER_SIZE: &str = "maxBufferSize";
pub const MAX_BUFFER_BYTES: &str = "maxBufferBytes";
pub const DELAY_THRESHOLD_MS: &str = "delayThresholdMs";
pub const MAX_REQUEST_TIMEOUT_MS: &str = "maxRequestTimeoutMs";
pub const MAX_TOTAL_TIMEOUT_MS: &str = "maxTotalTimeoutMs";
pub const PUBLISH_METADATA: &str = "metadata.publish";
pub const MESSAGE_BODY_NAME: &str = "messageBodyName";

pub const DEFAULT_MAX_BATCH_SIZE: u64 = 100;
pub const DEFAULT_PULL_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PARTITION_COUNT: u64 = 1;
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 100;
pub const DEFAULT_MAX_BUFFER_BYTES: u64 = 10_000_000;
pub const DEFAULT_DELAY_THRESHOLD_MS: u64 = 100;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TOTAL_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MESSAGE_BODY_NAME: &str = "cps_message_body";

// ═══════════════════════════════════════════════════════════════
//  ConfigValues
// ═══════════════════════════════════════════════════════════════

/// Flat string properties handed over by the host.
///
/// Typed getters validate on read, so a task never starts with a value it
/// cannot use.
#[derive(Debug, Clone, Default)]
pub struct ConfigValues {
    entries: BTreeMap<String, String>,
}

impl ConfigValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn require_str(&self, name: &str) -> Result<&str, TaskError> {
        match self.get(name) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(TaskError::Config(format!("missing required setting '{name}'"))),
        }
    }

    pub fn get_u64(
        &self,
        name: &str,
        default: u64,
        range: RangeInclusive<u64>,
    ) -> Result<u64, TaskError> {
        let value = match self.get(name) {
            None => default,
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                TaskError::Config(format!("'{name}' = '{raw}': {e}"))
            })?,
        };
        if !range.contains(&value) {
            return Err(TaskError::Config(format!(
                "'{name}' = {value} is out of range [{}, {}]",
                range.start(),
                range.end()
            )));
        }
        Ok(value)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool, TaskError> {
        match self.get(name).map(str::trim) {
            None => Ok(default),
            Some(raw) if raw.eq_ignore_ascii_case("true") => Ok(true),
            Some(raw) if raw.eq_ignore_ascii_case("false") => Ok(false),
            Some(raw) => Err(TaskError::Config(format!(
                "'{name}' = '{raw}': expected true or false"
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

pub fn subscription_path(project: &str, subscription: &str) -> String {
    format!("projects/{project}/subscriptions/{subscription}")
}

pub fn topic_path(project: &str, topic: &str) -> String {
    format!("projects/{project}/topics/{topic}")
}

// ═══════════════════════════════════════════════════════════════
//  Source config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    /// Полный путь: `projects/{project}/subscriptions/{name}`.
    pub subscription: String,
    /// Топик лога, куда пишутся записи.
    pub topic: String,
    pub max_batch_size: usize,
    pub pull_timeout: Duration,
    pub partition_count: u32,
    pub partition_scheme: PartitionScheme,
    pub key_attribute: Option<String>,
    pub timestamp_attribute: Option<String>,
}

impl SourceConfig {
    pub fn from_values(values: &ConfigValues) -> Result<Self, TaskError> {
        let project = values.require_str(CPS_PROJECT)?;
        let subscription = values.require_str(CPS_SUBSCRIPTION)?;
        let topic = values.require_str(KAFKA_TOPIC)?.to_string();
        let max_batch_size = values.get_u64(
            CPS_MAX_BATCH_SIZE,
            DEFAULT_MAX_BATCH_SIZE,
            1..=i32::MAX as u64,
        )?;
        let pull_timeout_ms = values.get_u64(
            CPS_PULL_TIMEOUT_MS,
            DEFAULT_PULL_TIMEOUT_MS,
            1..=i32::MAX as u64,
        )?;
        let partition_count = values.get_u64(
            KAFKA_PARTITION_COUNT,
            DEFAULT_PARTITION_COUNT,
            1..=i32::MAX as u64,
        )?;
        let partition_scheme = match values.get(KAFKA_PARTITION_SCHEME) {
            None => PartitionScheme::default(),
            Some(raw) => raw.parse().map_err(|e| {
                TaskError::Config(format!("'{KAFKA_PARTITION_SCHEME}': {e}"))
            })?,
        };

        Ok(Self {
            subscription: subscription_path(project, subscription),
            topic,
            max_batch_size: max_batch_size as usize,
            pull_timeout: Duration::from_millis(pull_timeout_ms),
            partition_count: partition_count as u32,
            partition_scheme,
            key_attribute: non_empty(values.get(KAFKA_KEY_ATTRIBUTE)),
            timestamp_attribute: non_empty(values.get(KAFKA_TIMESTAMP_ATTRIBUTE)),
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Sink config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    /// Полный путь: `projects/{project}/topics/{name}`.
    pub topic: String,
    pub max_buffer_size: u64,
    pub max_buffer_bytes: u64,
    pub delay_threshold: Duration,
    pub request_timeout: Duration,
    pub total_timeout: Duration,
    pub include_metadata: bool,
    pub body_field: String,
}

impl SinkConfig {
    pub fn from_values(values: &ConfigValues) -> Result<Self, TaskError> {
        let project = values.require_str(CPS_PROJECT)?;
        let topic = values.require_str(CPS_TOPIC)?;
        let max_buffer_size = values.get_u64(
            MAX_BUFFER_SIZE,
            DEFAULT_MAX_BUFFER_SIZE,
            1..=i32::MAX as u64,
        )?;
        let max_buffer_bytes = values.get_u64(
            MAX_BUFFER_BYTES,
            DEFAULT_MAX_BUFFER_BYTES,
            1..=DEFAULT_MAX_BUFFER_BYTES,
        )?;
        let delay_ms = values.get_u64(
            DELAY_THRESHOLD_MS,
            DEFAULT_DELAY_THRESHOLD_MS,
            1..=i32::MAX as u64,
        )?;
        let request_ms = values.get_u64(
            MAX_REQUEST_TIMEOUT_MS,
            DEFAULT_REQUEST_TIMEOUT_MS,
            10_000..=i32::MAX as u64,
        )?;
        let total_ms = values.get_u64(
            MAX_TOTAL_TIMEOUT_MS,
            DEFAULT_TOTAL_TIMEOUT_MS,
            10_000..=i32::MAX as u64,
        )?;

        Ok(Self {
            topic: topic_path(project, topic),
            max_buffer_size,
            max_buffer_bytes,
            delay_threshold: Duration::from_millis(delay_ms),
            request_timeout: Duration::from_millis(request_ms),
            total_timeout: Duration::from_millis(total_ms),
            include_metadata: values.get_bool(PUBLISH_METADATA, false)?,
            body_field: non_empty(values.get(MESSAGE_BODY_NAME))
                .unwrap_or_else(|| DEFAULT_MESSAGE_BODY_NAME.to_string()),
        })
    }

    pub fn publisher_settings(&self) -> PublisherSettings {
        PublisherSettings {
            batching: BatchingSettings {
                element_count_threshold: self.max_buffer_size,
                request_byte_threshold: self.max_buffer_bytes,
                delay_threshold: self.delay_threshold,
            },
            retry: RetrySettings::with_timeouts(self.total_timeout, self.request_timeout),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_values() -> ConfigValues {
        [
            (CPS_PROJECT, "the"),
            (CPS_SUBSCRIPTION, "quick"),
            (KAFKA_TOPIC, "brown"),
            (KAFKA_KEY_ATTRIBUTE, "fox"),
            (KAFKA_PARTITION_COUNT, "3"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_source_defaults() {
        let cfg = SourceConfig::from_values(&source_values()).unwrap();
        assert_eq!(cfg.subscription, "projects/the/subscriptions/quick");
        assert_eq!(cfg.topic, "brown");
        assert_eq!(cfg.max_batch_size, 100);
        assert_eq!(cfg.partition_count, 3);
        assert_eq!(cfg.partition_scheme, PartitionScheme::RoundRobin);
        assert_eq!(cfg.key_attribute.as_deref(), Some("fox"));
        assert_eq!(cfg.timestamp_attribute, None);
    }

    #[test]
    fn test_source_missing_subscription() {
        let mut values = source_values();
        values.set(CPS_SUBSCRIPTION, "  ");
        let err = SourceConfig::from_values(&values).unwrap_err();
        assert!(matches!(err, TaskError::Config(msg) if msg.contains(CPS_SUBSCRIPTION)));
    }

    #[test]
    fn test_source_rejects_unknown_scheme() {
        let mut values = source_values();
        values.set(KAFKA_PARTITION_SCHEME, "sticky");
        assert!(matches!(
            SourceConfig::from_values(&values),
            Err(TaskError::Config(_))
        ));
    }

    #[test]
    fn test_source_rejects_zero_partitions() {
        let mut values = source_values();
        values.set(KAFKA_PARTITION_COUNT, "0");
        assert!(matches!(
            SourceConfig::from_values(&values),
            Err(TaskError::Config(msg)) if msg.contains("out of range")
        ));
    }

    #[test]
    fn test_sink_defaults_and_settings() {
        let values: ConfigValues = [(CPS_PROJECT, "p"), (CPS_TOPIC, "t")].into_iter().collect();
        let cfg = SinkConfig::from_values(&values).unwrap();
        assert_eq!(cfg.topic, "projects/p/topics/t");
        assert_eq!(cfg.body_field, DEFAULT_MESSAGE_BODY_NAME);
        assert!(!cfg.include_metadata);

        let settings = cfg.publisher_settings();
        assert_eq!(settings.batching.element_count_threshold, 100);
        assert_eq!(settings.batching.request_byte_threshold, 10_000_000);
        assert_eq!(settings.batching.delay_threshold, Duration::from_millis(100));
        assert_eq!(settings.retry.total_timeout, Duration::from_secs(60));
        assert_eq!(settings.retry.max_rpc_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_sink_rejects_short_request_timeout() {
        let values: ConfigValues = [
            (CPS_PROJECT, "p"),
            (CPS_TOPIC, "t"),
            (MAX_REQUEST_TIMEOUT_MS, "500"),
        ]
        .into_iter()
        .collect();
        assert!(matches!(SinkConfig::from_values(&values), Err(TaskError::Config(_))));
    }

    #[test]
    fn test_sink_rejects_bad_bool() {
        let values: ConfigValues = [
            (CPS_PROJECT, "p"),
            (CPS_TOPIC, "t"),
            (PUBLISH_METADATA, "yes"),
        ]
        .into_iter()
        .collect();
        assert!(matches!(SinkConfig::from_values(&values), Err(TaskError::Config(_))));
    }
}
