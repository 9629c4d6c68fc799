//! Integration tests for the acquire/use/release lifecycle of scoped clients.
//!
//! The in-process broker records a `Connect` call per acquisition and a
//! `Release` call per release, so counting them shows whether every acquired
//! client was released exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kafka_harness_core::testing::{Api, MemoryHarness};
use kafka_harness_core::{BrokerHandle, ClientError, ScopeError, SettingsError};

async fn lifecycle_counts(harness: &MemoryHarness) -> (usize, usize) {
    let connects = harness.get_broker_calls_for_api(Api::Connect).await.len();
    let releases = harness.get_broker_calls_for_api(Api::Release).await.len();
    (connects, releases)
}

/// Wait for a release spawned by a dropped scope to reach the broker.
async fn settle(harness: &MemoryHarness) {
    for _ in 0..50 {
        let (connects, releases) = lifecycle_counts(harness).await;
        if connects == releases {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_release_after_success() {
    let harness = MemoryHarness::new().await.unwrap();

    harness.runner.produce_one("t", "k", "v").await.unwrap();
    harness
        .runner
        .with_consumer("group", "client", |_scope| {
            Box::pin(async { Ok::<_, ClientError>(()) })
        })
        .await
        .unwrap();

    assert_eq!(lifecycle_counts(&harness).await, (2, 2));
}

#[tokio::test]
async fn test_logic_failure_propagates_unchanged_and_releases() {
    let harness = MemoryHarness::new().await.unwrap();

    let result = harness
        .runner
        .with_producer_text(|_scope| {
            Box::pin(async { Err::<(), _>("logic failed".to_string()) })
        })
        .await;

    match result {
        Err(ScopeError::Logic(message)) => assert_eq!(message, "logic failed"),
        other => panic!("expected logic error, got {other:?}"),
    }
    assert_eq!(lifecycle_counts(&harness).await, (1, 1));
}

fn explode() -> Result<(), ClientError> {
    panic!("logic panicked")
}

#[tokio::test]
async fn test_panic_in_logic_still_releases() {
    let harness = MemoryHarness::new().await.unwrap();
    let runner = harness.runner.clone();

    let task = tokio::spawn(async move {
        runner
            .with_consumer("group", "client", |_scope| Box::pin(async { explode() }))
            .await
    });

    let joined = task.await;
    assert!(joined.unwrap_err().is_panic());

    settle(&harness).await;
    assert_eq!(lifecycle_counts(&harness).await, (1, 1));
}

#[tokio::test]
async fn test_cancellation_still_releases() {
    let harness = MemoryHarness::new().await.unwrap();

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        harness.runner.with_producer_text(|_scope| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ClientError>(())
            })
        }),
    )
    .await;
    assert!(cancelled.is_err());

    settle(&harness).await;
    assert_eq!(lifecycle_counts(&harness).await, (1, 1));
}

#[tokio::test]
async fn test_acquisition_failure_never_runs_logic() {
    let harness = MemoryHarness::new().await.unwrap();
    harness.broker().set_refuse_connections(true);
    let invoked = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&invoked);
    let result = harness
        .runner
        .with_producer_text(move |_scope| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok::<_, ClientError>(()) })
        })
        .await;

    assert!(matches!(
        result,
        Err(ScopeError::Acquisition(ClientError::Connection { .. }))
    ));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(lifecycle_counts(&harness).await, (0, 0));
}

#[tokio::test]
async fn test_empty_ids_rejected_before_acquisition() {
    let harness = MemoryHarness::new().await.unwrap();

    let no_group = harness
        .runner
        .with_consumer("", "client", |_scope| {
            Box::pin(async { Ok::<_, ClientError>(()) })
        })
        .await;
    let no_client = harness
        .runner
        .with_consumer("group", "   ", |_scope| {
            Box::pin(async { Ok::<_, ClientError>(()) })
        })
        .await;

    assert!(matches!(
        no_group,
        Err(ScopeError::InvalidSettings(SettingsError::EmptyGroupId))
    ));
    assert!(matches!(
        no_client,
        Err(ScopeError::InvalidSettings(SettingsError::EmptyClientId))
    ));
    assert!(harness.get_broker_calls().await.is_empty());
}

#[tokio::test]
async fn test_release_failure_keeps_logic_outcome() {
    let harness = MemoryHarness::new().await.unwrap();
    harness.broker().set_fail_releases(true);

    let result = harness.runner.produce_one("t", "k", "v").await;

    match result {
        Err(ScopeError::Release { outcome, .. }) => {
            let delivery = outcome.unwrap();
            assert_eq!((delivery.partition, delivery.offset), (0, 0));
        }
        other => panic!("expected release error, got {other:?}"),
    }
    assert_eq!(harness.broker().records("t", 0).await.len(), 1);
}

#[tokio::test]
async fn test_logic_sees_the_runner_bundle() {
    let harness = MemoryHarness::new().await.unwrap();

    let same = harness
        .runner
        .with_producer_text(|scope| {
            let expected = harness.env().broker() as *const BrokerHandle as usize;
            Box::pin(async move {
                let actual = scope.env.broker() as *const BrokerHandle as usize;
                Ok::<_, ClientError>(actual == expected)
            })
        })
        .await
        .unwrap();

    assert!(same);
}

#[tokio::test]
async fn test_stopped_broker_fails_acquisition() {
    let mut harness = MemoryHarness::new().await.unwrap();
    harness.shutdown().await;

    let result = harness.runner.produce_one("t", "k", "v").await;
    assert!(matches!(result, Err(ScopeError::Acquisition(_))));
}
