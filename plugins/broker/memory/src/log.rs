use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, RwLock};

use bridge_api::{BridgeError, PartitionLog, SinkRecord, SourceRecord, TopicPartition, Value};

use crate::lock;

// ═══════════════════════════════════════════════════════════════
//  MemoryLogConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryLogConfig {
    /// Лимит записей на партицию; старые вытесняются.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for MemoryLogConfig {
    fn default() -> Self {
        Self { max_records: default_max_records() }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryLog
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct PartitionBuf {
    /// Offset записи `records[0]`.
    base: u64,
    records: VecDeque<SinkRecord>,
}

impl PartitionBuf {
    fn next_offset(&self) -> u64 {
        self.base + self.records.len() as u64
    }
}

/// Ring-buffer partitioned log with consumer-group offsets.
pub struct MemoryLog {
    topics: RwLock<HashMap<String, Vec<Mutex<PartitionBuf>>>>,
    commits: Mutex<HashMap<(String, TopicPartition), u64>>,
    max_records: usize,
}

impl MemoryLog {
    pub fn new(config: MemoryLogConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            commits: Mutex::new(HashMap::new()),
            max_records: config.max_records.max(1),
        }
    }

    /// Create `topic` with `partitions` partitions. An existing topic is
    /// left as is.
    pub fn create_topic(&self, topic: &str, partitions: u32) {
        let mut topics = self.topics.write().unwrap_or_else(|poisoned| {
            tracing::warn!("log topics lock poisoned, recovering");
            poisoned.into_inner()
        });
        topics.entry(topic.to_string()).or_insert_with(|| {
            (0..partitions.max(1)).map(|_| Mutex::new(PartitionBuf::default())).collect()
        });
    }

    /// Directly append a sink-side record, as another producer would.
    pub fn produce(&self, tp: &TopicPartition, mut record: SinkRecord) -> Result<u64, BridgeError> {
        self.with_partition(tp, |buf| {
            let offset = buf.next_offset();
            record.topic = tp.topic.clone();
            record.partition = tp.partition;
            record.offset = offset;
            buf.records.push_back(record);
            if buf.records.len() > self.max_records {
                buf.records.pop_front();
                buf.base += 1;
            }
            offset
        })
    }

    /// Все хранящиеся записи партиции.
    pub fn records(&self, tp: &TopicPartition) -> Vec<SinkRecord> {
        self.with_partition(tp, |buf| buf.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn with_partition<R>(
        &self,
        tp: &TopicPartition,
        f: impl FnOnce(&mut PartitionBuf) -> R,
    ) -> Result<R, BridgeError> {
        let topics = self.topics.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let partitions = topics
            .get(&tp.topic)
            .ok_or_else(|| BridgeError::config(format!("topic {} not found", tp.topic)))?;
        let slot = partitions
            .get(tp.partition as usize)
            .ok_or_else(|| BridgeError::config(format!("partition {tp} not found")))?;
        let mut buf = lock(slot, "log partition");
        Ok(f(&mut buf))
    }
}

impl PartitionLog for MemoryLog {
    fn append(
        &self,
        record: &SourceRecord,
    ) -> Pin<Box<dyn Future<Output = Result<u64, BridgeError>> + Send + '_>> {
        let tp = TopicPartition::new(record.topic.clone(), record.partition);
        let stored = SinkRecord {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: 0,
            timestamp_ms: Some(record.timestamp_ms),
            key: record.key.clone().map(Value::String),
            value_schema: Some(record.value_schema.clone()),
            value: record.value.clone(),
        };
        let result = self.produce(&tp, stored);
        Box::pin(async move { result })
    }

    fn read(
        &self,
        tp: &TopicPartition,
        from_offset: u64,
        max: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SinkRecord>, BridgeError>> + Send + '_>> {
        let result = self.with_partition(tp, |buf| {
            // вытесненные offset'ы пропускаются
            let skip = from_offset.saturating_sub(buf.base) as usize;
            buf.records.iter().skip(skip).take(max).cloned().collect()
        });
        Box::pin(async move { result })
    }

    fn partitions(&self, topic: &str) -> u32 {
        let topics = self.topics.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.get(topic).map_or(0, |p| p.len() as u32)
    }

    fn commit(
        &self,
        group: &str,
        tp: &TopicPartition,
        next_offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        lock(&self.commits, "log commits").insert((group.to_string(), tp.clone()), next_offset);
        Box::pin(async { Ok(()) })
    }

    fn committed(&self, group: &str, tp: &TopicPartition) -> Option<u64> {
        lock(&self.commits, "log commits")
            .get(&(group.to_string(), tp.clone()))
            .copied()
    }
}
