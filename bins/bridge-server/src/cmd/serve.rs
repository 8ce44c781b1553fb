use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bridge_api::{ChannelProvider, Message, PartitionLog};
use bridge_engine::{SinkTask, SourceTask, spawn_sink, spawn_source};
use bridge_memory::{MemoryBroker, MemoryChannelProvider, MemoryLog};

use crate::config::{ServeArgs, ServerConfig, to_config_values};
use crate::error::ServerError;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("bridge-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    if config.source.is_none() && config.sink.is_none() {
        return Err(ServerError::NoComponents("[source] or [sink]"));
    }

    // --- In-memory broker and log ---
    let broker = prepare_broker(&config)?;
    let provider: Arc<dyn ChannelProvider> = Arc::new(MemoryChannelProvider::new(broker.clone()));

    let log = Arc::new(MemoryLog::new(config.log.storage.clone()));
    for topic in &config.log.topics {
        log.create_topic(&topic.name, topic.partitions);
        tracing::info!(topic = %topic.name, partitions = topic.partitions, "log topic created");
    }
    let log_handle: Arc<dyn PartitionLog> = log.clone();

    let token = CancellationToken::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // --- Source: broker → log ---
    if let Some(table) = &config.source {
        let values = to_config_values("source", table)?;
        let task = Arc::new(SourceTask::start(&values, provider.clone()).await?);
        handles.push(spawn_source(
            task,
            log_handle.clone(),
            config.runtime.source.clone(),
            token.clone(),
        ));
    }

    // --- Sink: log → broker ---
    if let Some(table) = &config.sink {
        let Some(settings) = config.runtime.sink.clone() else {
            return Err(ServerError::NoComponents("[runtime.sink]"));
        };
        let values = to_config_values("sink", table)?;
        let task = SinkTask::start(&values, provider.clone())?;
        let topic = settings.topic.clone();
        let sink = spawn_sink(task, log_handle.clone(), settings, token.clone());
        handles.push(tokio::spawn(async move {
            match sink.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(topic = %topic, error = %e, "sink stopped with error"),
                Err(e) => tracing::error!(topic = %topic, error = %e, "sink task panicked"),
            }
        }));
    }

    tracing::info!(tasks = handles.len(), "server ready");

    // --- Ожидание Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    token.cancel();

    // Drain: даём задачам завершиться, затем abort
    let grace = Duration::from_millis(config.runtime.shutdown_grace_ms);
    let deadline = tokio::time::Instant::now() + grace;
    for h in &mut handles {
        if tokio::time::timeout_at(deadline, &mut *h).await.is_err() {
            h.abort();
        }
    }

    tracing::info!("stopped");
    Ok(())
}

fn prepare_broker(config: &ServerConfig) -> Result<MemoryBroker, ServerError> {
    let broker = MemoryBroker::new();
    for topic in &config.broker.topics {
        broker.create_topic(topic);
    }
    for sub in &config.broker.subscriptions {
        broker.create_subscription(&sub.topic, &sub.name);
        tracing::info!(topic = %sub.topic, subscription = %sub.name, "broker subscription created");
    }
    for seed in &config.broker.seed {
        let message = Message::new(seed.payload.as_bytes().to_vec(), seed.attributes.clone());
        broker.publish_message(&seed.topic, message)?;
    }
    if !config.broker.seed.is_empty() {
        tracing::info!(count = config.broker.seed.len(), "seed messages published");
    }
    Ok(broker)
}
