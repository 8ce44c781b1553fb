pub mod broker;
pub mod error;
pub mod log;
pub mod message;
pub mod record;
pub mod schema;
mod util;

pub use broker::{
    BatchingSettings, BrokerPublisher, BrokerSubscriber, ChannelProvider, PublishHandle,
    PublisherSettings, RetrySettings,
};
pub use error::{BridgeError, ErrorKind};
pub use log::PartitionLog;
pub use message::{DeliveryToken, Message, ReceivedMessage};
pub use record::{SinkRecord, SourceOffset, SourceRecord, TopicPartition};
pub use schema::{Field, Schema, Value};
pub use util::now_ms;
