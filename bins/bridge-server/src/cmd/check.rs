use bridge_engine::{SinkConfig, SourceConfig};

use crate::config::{ServeArgs, ServerConfig, to_config_values};
use crate::error::ServerError;

/// Parse and validate the config file, print the resolved task settings.
pub fn run(args: ServeArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;

    if let Some(table) = &config.source {
        let source = SourceConfig::from_values(&to_config_values("source", table)?)?;
        println!(
            "source: {} -> {} ({} partitions, {})",
            source.subscription, source.topic, source.partition_count, source.partition_scheme
        );
    }
    if let Some(table) = &config.sink {
        let sink = SinkConfig::from_values(&to_config_values("sink", table)?)?;
        println!(
            "sink: -> {} (body field '{}', metadata {})",
            sink.topic, sink.body_field, sink.include_metadata
        );
    }
    println!("config ok");
    Ok(())
}
