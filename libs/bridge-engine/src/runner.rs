use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bridge_api::{PartitionLog, TopicPartition};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::sink::SinkTask;
use crate::source::SourceTask;

// ═══════════════════════════════════════════════════════════════
//  Settings
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRunSettings {
    /// Пауза после пустого poll.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,
}

impl Default for SourceRunSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            commit_interval_ms: default_commit_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkRunSettings {
    /// Топик лога, который читает sink.
    pub topic: String,
    /// Consumer group, чьи offsets коммитятся после каждого flush.
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_read_batch")]
    pub read_batch: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_commit_interval_ms() -> u64 {
    1_000
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

fn default_group() -> String {
    "bridge-sink".to_string()
}

fn default_read_batch() -> usize {
    500
}

// ═══════════════════════════════════════════════════════════════
//  Source loop — poll → append → commit_record
// ═══════════════════════════════════════════════════════════════

/// Drive a source task: every pulled record is appended to the log and
/// reported as committed; acknowledgments go out every commit interval.
pub fn spawn_source(
    task: Arc<SourceTask>,
    log: Arc<dyn PartitionLog>,
    settings: SourceRunSettings,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let subscription = task.config().subscription.clone();
        let idle = Duration::from_millis(settings.poll_interval_ms);
        let commit_every = Duration::from_millis(settings.commit_interval_ms);
        let mut last_commit = Instant::now();

        loop {
            let records = tokio::select! {
                records = task.poll() => records,
                _ = token.cancelled() => break,
            };

            for record in &records {
                match log.append(record).await {
                    Ok(offset) => {
                        tracing::trace!(topic = %record.topic, partition = record.partition, offset, "appended");
                        task.commit_record(record);
                    }
                    // токен не подтверждается, брокер доставит повторно под новым
                    Err(e) => {
                        tracing::error!(
                            topic = %record.topic,
                            partition = record.partition,
                            ack_id = %record.offset.ack_id,
                            error = %e,
                            "append failed"
                        );
                        task.forget_record(record);
                    }
                }
            }

            if last_commit.elapsed() >= commit_every {
                task.commit();
                last_commit = Instant::now();
            }

            if records.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(idle) => {}
                    _ = token.cancelled() => break,
                }
            }
        }

        task.commit();
        task.stop();
        tracing::info!(subscription = %subscription, "source loop finished");
    })
}

// ═══════════════════════════════════════════════════════════════
//  Sink loop — read → put → flush → commit offsets
// ═══════════════════════════════════════════════════════════════

/// Drive a sink task over every partition of the configured log topic.
///
/// Consumer offsets are committed only after a successful flush. A fatal
/// put or flush error ends the loop without committing.
pub fn spawn_sink(
    mut task: SinkTask,
    log: Arc<dyn PartitionLog>,
    settings: SinkRunSettings,
    token: CancellationToken,
) -> JoinHandle<Result<(), TaskError>> {
    tokio::spawn(async move {
        let idle = Duration::from_millis(settings.poll_interval_ms);
        let flush_every = Duration::from_millis(settings.flush_interval_ms);
        let mut positions: HashMap<TopicPartition, u64> = HashMap::new();
        let mut unflushed: HashMap<TopicPartition, u64> = HashMap::new();
        let mut last_flush = Instant::now();

        let result = loop {
            let read_any = match read_partitions(
                &mut task,
                &*log,
                &settings,
                &mut positions,
                &mut unflushed,
            )
            .await
            {
                Ok(read_any) => read_any,
                Err(e) => break Err(e),
            };

            if !unflushed.is_empty() && last_flush.elapsed() >= flush_every {
                if let Err(e) = flush_and_commit(&mut task, &*log, &settings.group, &mut unflushed).await {
                    break Err(e);
                }
                last_flush = Instant::now();
            }

            if !read_any {
                tokio::select! {
                    _ = tokio::time::sleep(idle) => {}
                    _ = token.cancelled() => break Ok(()),
                }
            } else if token.is_cancelled() {
                break Ok(());
            }
        };

        task.stop();
        match &result {
            Ok(()) => tracing::info!(topic = %settings.topic, "sink loop finished"),
            Err(e) => tracing::error!(topic = %settings.topic, error = %e, "sink loop failed"),
        }
        result
    })
}

/// Один проход чтения по всем партициям. `true`, если что-то прочитано.
async fn read_partitions(
    task: &mut SinkTask,
    log: &dyn PartitionLog,
    settings: &SinkRunSettings,
    positions: &mut HashMap<TopicPartition, u64>,
    unflushed: &mut HashMap<TopicPartition, u64>,
) -> Result<bool, TaskError> {
    let mut read_any = false;
    for partition in 0..log.partitions(&settings.topic) {
        let tp = TopicPartition::new(settings.topic.clone(), partition);
        let from = *positions
            .entry(tp.clone())
            .or_insert_with(|| log.committed(&settings.group, &tp).unwrap_or(0));

        let records = match log.read(&tp, from, settings.read_batch).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(topic = %tp.topic, partition, error = %e, "log read failed");
                continue;
            }
        };
        let Some(last) = records.last() else {
            continue;
        };
        let next = last.offset + 1;
        read_any = true;

        task.put(records).inspect_err(|e| {
            tracing::error!(topic = %tp.topic, partition, error = %e, "put failed, stopping sink");
        })?;
        positions.insert(tp.clone(), next);
        unflushed.insert(tp, next);
    }
    Ok(read_any)
}

async fn flush_and_commit(
    task: &mut SinkTask,
    log: &dyn PartitionLog,
    group: &str,
    unflushed: &mut HashMap<TopicPartition, u64>,
) -> Result<(), TaskError> {
    task.flush(unflushed).await?;
    for (tp, next) in unflushed.drain() {
        if let Err(e) = log.commit(group, &tp, next).await {
            tracing::warn!(topic = %tp.topic, partition = tp.partition, error = %e, "offset commit failed");
        }
    }
    Ok(())
}
