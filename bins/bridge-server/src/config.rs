use std::collections::BTreeMap;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use bridge_engine::{ConfigValues, SinkRunSettings, SourceRunSettings};
use bridge_memory::MemoryLogConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "bridge-server", about = "Мост между брокером сообщений и партиционированным логом")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить source/sink задачи
    Serve(ServeArgs),
    /// Проверить конфиг без запуска
    Check(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Flat source-task properties (`cps.project`, `kafka.topic`, ...).
    #[serde(default)]
    pub source: Option<BTreeMap<String, toml::Value>>,
    /// Flat sink-task properties (`cps.topic`, `maxBufferSize`, ...).
    #[serde(default)]
    pub sink: Option<BTreeMap<String, toml::Value>>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub broker: BrokerSetup,
    #[serde(default)]
    pub log: LogSetup,
}

#[derive(Debug, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub source: SourceRunSettings,
    /// Без этой секции sink не запускается.
    #[serde(default)]
    pub sink: Option<SinkRunSettings>,
    /// Сколько ждать завершения задач после Ctrl+C.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

/// Topics and subscriptions created in the in-memory broker at startup.
#[derive(Debug, Default, Deserialize)]
pub struct BrokerSetup {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSetup>,
    /// Messages published before the tasks start.
    #[serde(default)]
    pub seed: Vec<SeedMessage>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionSetup {
    pub topic: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedMessage {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogSetup {
    #[serde(flatten)]
    pub storage: MemoryLogConfig,
    #[serde(default)]
    pub topics: Vec<LogTopic>,
}

#[derive(Debug, Deserialize)]
pub struct LogTopic {
    pub name: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
}

fn default_partitions() -> u32 {
    1
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// TOML table → flat string properties. Scalars are written in their
/// TOML text form; nested tables and arrays are rejected.
pub fn to_config_values(
    section: &'static str,
    table: &BTreeMap<String, toml::Value>,
) -> Result<ConfigValues, ServerError> {
    let mut values = ConfigValues::new();
    for (name, value) in table {
        let text = match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Float(f) => f.to_string(),
            other => {
                return Err(ServerError::Config {
                    context: section,
                    detail: format!("'{name}': expected a scalar, got {}", other.type_str()),
                });
            }
        };
        values.set(name.clone(), text);
    }
    Ok(values)
}
