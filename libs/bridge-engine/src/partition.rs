//! Partition selection for records emitted by the source direction.
//!
//! Hashing uses murmur2 with the Kafka seed, masked to a positive value,
//! the same way the Kafka default partitioner does.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use bridge_api::Value;
use murmur2::{KAFKA_SEED, murmur2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionScheme {
    #[default]
    RoundRobin,
    HashKey,
    HashValue,
}

impl FromStr for PartitionScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "round_robin" => Ok(PartitionScheme::RoundRobin),
            "hash_key" => Ok(PartitionScheme::HashKey),
            "hash_value" => Ok(PartitionScheme::HashValue),
            other => Err(format!(
                "unknown partition scheme '{other}', expected round_robin, hash_key or hash_value"
            )),
        }
    }
}

impl std::fmt::Display for PartitionScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PartitionScheme::RoundRobin => "round_robin",
            PartitionScheme::HashKey => "hash_key",
            PartitionScheme::HashValue => "hash_value",
        })
    }
}

/// Picks the target partition of each record.
///
/// Курсор round_robin живёт всё время задачи и между poll не сбрасывается.
#[derive(Debug)]
pub struct PartitionSelector {
    scheme: PartitionScheme,
    count: u32,
    cursor: AtomicU32,
}

impl PartitionSelector {
    pub fn new(scheme: PartitionScheme, count: u32) -> Self {
        let count = count.max(1);
        Self {
            scheme,
            count,
            // первый вызов round_robin отдаёт партицию 0
            cursor: AtomicU32::new(count - 1),
        }
    }

    pub fn select(&self, key: Option<&str>, value: &Value) -> u32 {
        match self.scheme {
            PartitionScheme::RoundRobin => self.next_round_robin(),
            PartitionScheme::HashKey => match key {
                None => 0,
                Some(k) => hash_to_partition(k.as_bytes(), self.count),
            },
            PartitionScheme::HashValue => {
                hash_to_partition(&canonical_bytes(value), self.count)
            }
        }
    }

    fn next_round_robin(&self) -> u32 {
        let count = self.count;
        let prev = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % count))
            .unwrap_or_else(|c| c);
        (prev + 1) % count
    }
}

fn hash_to_partition(bytes: &[u8], count: u32) -> u32 {
    (murmur2(bytes, KAFKA_SEED) & 0x7fff_ffff) % count
}

/// Байтовая форма значения для `hash_value`.
///
/// Source records only carry bytes and string leaves: either the raw
/// payload, or a struct of `message` bytes plus string attributes.
fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Bytes(b) => out.extend_from_slice(b),
        Value::String(s) => out.extend_from_slice(s.as_bytes()),
        Value::Struct(fields) => {
            for (name, v) in fields {
                out.extend_from_slice(name.as_bytes());
                out.push(0);
                write_canonical(v, out);
                out.push(0);
            }
        }
        _ => {}
    }
}
