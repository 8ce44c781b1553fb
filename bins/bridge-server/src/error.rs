use bridge_engine::TaskError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("no {0} configured")]
    NoComponents(&'static str),

    #[error("{0}")]
    Task(#[from] TaskError),

    #[error("broker: {0}")]
    Broker(#[from] bridge_api::BridgeError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
