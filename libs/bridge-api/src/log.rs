use std::future::Future;
use std::pin::Pin;

use crate::error::BridgeError;
use crate::record::{SinkRecord, SourceRecord, TopicPartition};

/// Partitioned append-log on the other side of the bridge.
///
/// Source direction appends into it; sink direction reads from it with
/// consumer-group offsets that are committed only after a flush barrier.
pub trait PartitionLog: Send + Sync {
    /// Append a record to its topic/partition. Returns the assigned offset.
    fn append(
        &self,
        record: &SourceRecord,
    ) -> Pin<Box<dyn Future<Output = Result<u64, BridgeError>> + Send + '_>>;

    /// Read up to `max` records starting at `from_offset` (inclusive).
    fn read(
        &self,
        tp: &TopicPartition,
        from_offset: u64,
        max: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SinkRecord>, BridgeError>> + Send + '_>>;

    /// Number of partitions of a topic (0 = unknown topic).
    fn partitions(&self, topic: &str) -> u32;

    /// Store the next offset to read for a consumer group.
    fn commit(
        &self,
        group: &str,
        tp: &TopicPartition,
        next_offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;

    /// Last committed next-offset of a consumer group.
    fn committed(&self, group: &str, tp: &TopicPartition) -> Option<u64>;
}
