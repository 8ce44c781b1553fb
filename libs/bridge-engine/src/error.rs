use bridge_api::{BridgeError, ErrorKind, TopicPartition};

/// Fatal task error. Anything that reaches the host through this type stops
/// the task; transient broker failures are handled before they get here.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("config: {0}")]
    Config(String),

    #[error("broker ({context}): {source}")]
    Broker { context: String, source: BridgeError },

    #[error("encode {topic}-{partition}@{offset}: {source}")]
    Encode {
        topic: String,
        partition: u32,
        offset: u64,
        source: BridgeError,
    },

    #[error("flush {tp}: {source}")]
    Flush { tp: TopicPartition, source: BridgeError },

    #[error("flush timed out after {0:?}")]
    FlushTimeout(std::time::Duration),
}

impl TaskError {
    pub fn broker(context: impl Into<String>, source: BridgeError) -> Self {
        TaskError::Broker { context: context.into(), source }
    }
}

impl From<BridgeError> for TaskError {
    /// Ошибки вида Config остаются ошибками конфига, остальное относится
    /// к границе с брокером.
    fn from(e: BridgeError) -> Self {
        match e.kind() {
            ErrorKind::Config => TaskError::Config(e.message().to_string()),
            _ => TaskError::Broker { context: "broker".into(), source: e },
        }
    }
}
