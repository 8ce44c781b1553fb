pub mod ack;
pub mod batcher;
pub mod codec;
pub mod config;
pub mod error;
pub mod partition;
pub mod runner;
pub mod sink;
pub mod source;
pub mod subscriber;

pub use ack::{AckTracker, Drain, PullVerdict, TokenState};
pub use batcher::PublishBatcher;
pub use config::{ConfigValues, SinkConfig, SourceConfig};
pub use error::TaskError;
pub use partition::{PartitionScheme, PartitionSelector};
pub use runner::{SinkRunSettings, SourceRunSettings, spawn_sink, spawn_source};
pub use sink::SinkTask;
pub use source::SourceTask;
pub use subscriber::{RotatingSubscriber, RotationWindow, SubscriberPool};
