use std::sync::Arc;
use std::time::Duration;

use bridge_api::{Message, PartitionLog, Schema, SinkRecord, TopicPartition, Value};
use bridge_engine::config::{
    CPS_PROJECT, CPS_SUBSCRIPTION, CPS_TOPIC, KAFKA_PARTITION_COUNT, KAFKA_PARTITION_SCHEME, KAFKA_TOPIC,
};
use bridge_engine::{
    ConfigValues, SinkRunSettings, SinkTask, SourceRunSettings, SourceTask, TaskError,
    spawn_sink, spawn_source,
};
use bridge_memory::{MemoryBroker, MemoryChannelProvider, MemoryLog, MemoryLogConfig};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "projects/p/topics/out";
const SUBSCRIPTION: &str = "projects/p/subscriptions/in";

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn sink_record(value: &str) -> SinkRecord {
    SinkRecord {
        topic: String::new(),
        partition: 0,
        offset: 0,
        timestamp_ms: None,
        key: None,
        value_schema: Some(Schema::String),
        value: Value::from(value),
    }
}

fn sink_settings() -> SinkRunSettings {
    SinkRunSettings {
        topic: "events".into(),
        group: "g".into(),
        read_batch: 100,
        poll_interval_ms: 5,
        flush_interval_ms: 0,
    }
}

fn sink_values() -> ConfigValues {
    [(CPS_PROJECT, "p"), (CPS_TOPIC, "out")].into_iter().collect()
}

#[tokio::test]
async fn test_sink_loop_commits_after_flush() {
    let broker = MemoryBroker::new();
    broker.create_topic(TOPIC);
    let provider = Arc::new(MemoryChannelProvider::new(broker.clone()));
    let log = Arc::new(MemoryLog::new(MemoryLogConfig::default()));
    log.create_topic("events", 2);

    let p0 = TopicPartition::new("events", 0);
    let p1 = TopicPartition::new("events", 1);
    log.produce(&p0, sink_record("a")).unwrap();
    log.produce(&p0, sink_record("b")).unwrap();
    log.produce(&p1, sink_record("c")).unwrap();

    let task = SinkTask::start(&sink_values(), provider.clone()).unwrap();
    let token = CancellationToken::new();
    let handle = spawn_sink(task, log.clone(), sink_settings(), token.clone());

    wait_for(|| log.committed("g", &p0) == Some(2) && log.committed("g", &p1) == Some(1)).await;
    let payloads: Vec<Vec<u8>> = broker.published(TOPIC).iter().map(|m| m.payload().to_vec()).collect();
    assert_eq!(payloads.len(), 3);
    assert!(payloads.contains(&b"c".to_vec()));

    token.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_sink_loop_stops_without_commit_on_publish_failure() {
    let broker = MemoryBroker::new();
    broker.create_topic(TOPIC);
    broker.fail_next_publishes(1);
    let provider = Arc::new(MemoryChannelProvider::new(broker.clone()));
    let log = Arc::new(MemoryLog::new(MemoryLogConfig::default()));
    log.create_topic("events", 1);
    let p0 = TopicPartition::new("events", 0);
    log.produce(&p0, sink_record("a")).unwrap();
    log.produce(&p0, sink_record("b")).unwrap();

    let task = SinkTask::start(&sink_values(), provider).unwrap();
    let handle = spawn_sink(task, log.clone(), sink_settings(), CancellationToken::new());

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sink loop should stop on its own")
        .unwrap();
    assert!(matches!(result, Err(TaskError::Flush { .. })));
    assert_eq!(log.committed("g", &p0), None);
}

#[tokio::test]
async fn test_source_loop_appends_and_acknowledges() {
    let broker = MemoryBroker::new();
    broker.create_subscription("projects/p/topics/in", SUBSCRIPTION);
    for body in ["x", "y", "z"] {
        broker
            .publish_message("projects/p/topics/in", Message::from_payload(body))
            .unwrap();
    }
    let provider = Arc::new(MemoryChannelProvider::new(broker.clone()));
    let log = Arc::new(MemoryLog::new(MemoryLogConfig::default()));
    log.create_topic("events", 3);

    let values: ConfigValues = [
        (CPS_PROJECT, "p"),
        (CPS_SUBSCRIPTION, "in"),
        (KAFKA_TOPIC, "events"),
        (KAFKA_PARTITION_COUNT, "3"),
    ]
    .into_iter()
    .collect();
    let task = Arc::new(SourceTask::start(&values, provider).await.unwrap());
    let settings = SourceRunSettings { poll_interval_ms: 5, commit_interval_ms: 0 };
    let token = CancellationToken::new();
    let handle = spawn_source(task.clone(), log.clone(), settings, token.clone());

    wait_for(|| broker.acknowledged(SUBSCRIPTION) == 3).await;
    for partition in 0..3 {
        let tp = TopicPartition::new("events", partition);
        assert_eq!(log.read(&tp, 0, 10).await.unwrap().len(), 1);
    }
    assert_eq!(broker.outstanding(SUBSCRIPTION), 0);

    token.cancel();
    handle.await.unwrap();
    assert_eq!(task.tracker().counts(), (0, 0, 0));
}

#[tokio::test]
async fn test_append_failures_do_not_pile_up_tokens() {
    let broker = MemoryBroker::new();
    broker.create_subscription("projects/p/topics/in", SUBSCRIPTION);
    for body in ["a", "b", "c", "d", "e"] {
        broker
            .publish_message("projects/p/topics/in", Message::from_payload(body))
            .unwrap();
    }
    let provider = Arc::new(MemoryChannelProvider::new(broker.clone()));
    // партиции 1 в логе нет: каждая запись, ушедшая туда, не сохраняется
    let log = Arc::new(MemoryLog::new(MemoryLogConfig::default()));
    log.create_topic("events", 1);

    let values: ConfigValues = [
        (CPS_PROJECT, "p"),
        (CPS_SUBSCRIPTION, "in"),
        (KAFKA_TOPIC, "events"),
        (KAFKA_PARTITION_COUNT, "2"),
        (KAFKA_PARTITION_SCHEME, "round_robin"),
    ]
    .into_iter()
    .collect();
    let task = Arc::new(SourceTask::start(&values, provider).await.unwrap());
    let settings = SourceRunSettings { poll_interval_ms: 5, commit_interval_ms: 0 };
    let token = CancellationToken::new();
    let handle = spawn_source(task.clone(), log.clone(), settings, token.clone());

    let mut redeliveries = 0;
    for _ in 0..10 {
        wait_for(|| broker.backlog(SUBSCRIPTION) == 0 && task.tracker().counts() == (0, 0, 0)).await;
        if broker.acknowledged(SUBSCRIPTION) == 5 {
            break;
        }
        assert!(broker.redeliver_outstanding(SUBSCRIPTION) > 0);
        redeliveries += 1;
    }

    assert!(redeliveries >= 2);
    assert_eq!(broker.acknowledged(SUBSCRIPTION), 5);
    assert_eq!(broker.outstanding(SUBSCRIPTION), 0);
    let tp = TopicPartition::new("events", 0);
    assert_eq!(log.read(&tp, 0, 10).await.unwrap().len(), 5);

    token.cancel();
    handle.await.unwrap();
}
