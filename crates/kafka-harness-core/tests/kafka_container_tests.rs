//! End-to-end tests against Kafka running in Docker.
//!
//! These exercise the librdkafka clients through the same scoped runner the
//! in-process tests use.
//!
//! Run with: cargo test --test kafka_container_tests -- --ignored

use std::time::Duration;

use kafka_harness_core::testing::{unique_name, KafkaContainerHarness};
use kafka_harness_core::{flatten_many_polls, partition_key, ClientError, HarnessConfig, ScopeError};

const WAIT: Duration = Duration::from_secs(30);

#[tokio::test]
#[ignore = "Requires Docker and stable Kafka container networking"]
async fn test_kafka_produce_one_then_consume() {
    let mut harness = KafkaContainerHarness::new().await.unwrap();
    let topic = unique_name("orders");

    harness.runner.produce_one(&topic, "k", "m").await.unwrap();

    let consuming = topic.clone();
    let records = harness
        .runner
        .with_consumer(&unique_name("group"), "reader", move |scope| {
            Box::pin(async move {
                scope.client.subscribe(&[consuming.as_str()]).await?;
                let polls = scope.client.poll_until(1, WAIT).await?;
                Ok::<_, ClientError>(flatten_many_polls(polls))
            })
        })
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.as_deref(), Some("k"));
    assert_eq!(records[0].value.as_deref(), Some("m"));

    harness.shutdown().await;
}

#[tokio::test]
#[ignore = "Requires Docker and stable Kafka container networking"]
async fn test_kafka_produce_many_preserves_order() {
    let mut harness = KafkaContainerHarness::new().await.unwrap();
    let topic = unique_name("orders");

    harness
        .runner
        .produce_many(&topic, [("k1", "m1"), ("k2", "m2")])
        .await
        .unwrap();

    let consuming = topic.clone();
    let records = harness
        .runner
        .with_consumer(&unique_name("group"), "reader", move |scope| {
            Box::pin(async move {
                scope.client.subscribe(&[consuming.as_str()]).await?;
                let polls = scope.client.poll_until(2, WAIT).await?;
                Ok::<_, ClientError>(flatten_many_polls(polls))
            })
        })
        .await
        .unwrap();

    let values: Vec<_> = records.iter().filter_map(|r| r.value.as_deref()).collect();
    assert_eq!(values, ["m1", "m2"]);

    harness.shutdown().await;
}

#[tokio::test]
#[ignore = "Requires Docker and stable Kafka container networking"]
async fn test_kafka_partition_targeting() {
    let mut config = HarnessConfig::default();
    config.broker.default_partitions = 2;
    let mut harness = KafkaContainerHarness::with_config(&config).await.unwrap();
    let topic = unique_name("orders");

    harness
        .runner
        .produce_many_to_partition(&topic, 0, [("k1", "m1"), ("k2", "m2")])
        .await
        .unwrap();

    let other = partition_key(topic.clone(), 1);
    let records = harness
        .runner
        .with_consumer("group", "reader", move |scope| {
            Box::pin(async move {
                scope.client.assign(&[other]).await?;
                let polls = scope
                    .client
                    .poll_until(1, Duration::from_secs(5))
                    .await?;
                Ok::<_, ClientError>(flatten_many_polls(polls))
            })
        })
        .await
        .unwrap();

    assert!(records.is_empty());

    harness.shutdown().await;
}

#[tokio::test]
#[ignore = "Requires Docker and stable Kafka container networking"]
async fn test_kafka_stopped_broker_fails_acquisition() {
    let mut harness = KafkaContainerHarness::new().await.unwrap();
    harness.shutdown().await;

    let result = harness.runner.produce_one("t", "k", "v").await;
    assert!(matches!(result, Err(ScopeError::Acquisition(_))));
}
