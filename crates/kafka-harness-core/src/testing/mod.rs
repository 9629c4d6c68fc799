//! Test utilities for code built on the harness.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`MemoryBroker`] - An in-process broker with a call log and fault injection
//! - [`MemoryClients`] - Producers and consumers talking to a [`MemoryBroker`]
//! - [`MemoryHarness`] - Broker, capability bundle and runner in one call
//! - [`HarnessBuilder`] - Builder pattern for custom test environments
//! - [`KafkaContainerHarness`] - The same against Kafka in Docker
//!
//! # Example
//!
//! ```rust,ignore
//! use kafka_harness_core::testing::{Api, MemoryHarness};
//!
//! #[tokio::test]
//! async fn test_produce() {
//!     let harness = MemoryHarness::new().await.unwrap();
//!
//!     harness.runner.produce_one("orders", "k", "v").await.unwrap();
//!
//!     let calls = harness.get_broker_calls_for_api(Api::Produce).await;
//!     assert_eq!(calls.len(), 1);
//! }
//! ```

pub mod harness;
pub mod memory_broker;

pub use harness::{unique_name, HarnessBuilder, KafkaContainerHarness, MemoryHarness};
pub use memory_broker::{
    Api, BrokerCall, MemoryBroker, MemoryClients, MemoryConsumer, MemoryProducer,
};
