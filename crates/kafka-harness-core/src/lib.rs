//! Kafka Test Harness Core Library
//!
//! Scoped access to Kafka producers and consumers for integration tests. A
//! test session starts one ephemeral broker, composes its address with a clock
//! and a blocking executor into a [`CapabilityBundle`], and runs test logic
//! through a [`ScopedClientRunner`] that acquires a client, lends it to the
//! logic and always releases it, even when the logic fails, panics or is
//! cancelled.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`broker`] - Ephemeral brokers and the handle they return
//! - [`env`] - Clock, blocking executor and the capability bundle
//! - [`settings`] - Producer and consumer settings derived from a bundle
//! - [`client`] - Client traits, codec-aware wrappers and librdkafka clients
//! - [`runner`] - Scoped acquire/use/release and produce helpers
//! - [`poll`] - Flattening poll results into record lists
//! - [`record`] - Records, partition keys and poll results
//! - [`codec`] - Key and value codecs
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`telemetry`] - Tracing subscriber setup
//!
//! # Example
//!
//! ```rust,ignore
//! use kafka_harness_core::testing::MemoryHarness;
//! use kafka_harness_core::flatten_many_polls;
//!
//! let harness = MemoryHarness::new().await?;
//! harness.runner.produce_one("orders", "k", "m").await?;
//!
//! let records = harness
//!     .runner
//!     .with_consumer("group", "client", |scope| {
//!         Box::pin(async move {
//!             scope.client.subscribe(&["orders"]).await?;
//!             let polls = scope.client.poll_until(1, Duration::from_secs(5)).await?;
//!             Ok::<_, ClientError>(flatten_many_polls(polls))
//!         })
//!     })
//!     .await?;
//! ```

#![forbid(unsafe_code)]

pub mod broker;
pub mod client;
pub mod codec;
pub mod config;
pub mod env;
pub mod error;
pub mod poll;
pub mod record;
pub mod runner;
pub mod settings;
pub mod telemetry;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use broker::{BrokerAddress, BrokerHandle, EmbeddedBroker, KafkaContainer};
pub use client::{ClientFactory, Consumer, ConsumerClient, Producer, ProducerClient, RdKafkaClients};
pub use codec::{BytesCodec, Codec, JsonCodec, TextCodec};
pub use config::{ClientDefaults, HarnessConfig};
pub use env::{BlockingExecutor, CapabilityBundle, Clock, TokioBlocking, TokioClock};
pub use error::{BrokerStartupError, ClientError, ConfigError, ScopeError, SettingsError};
pub use poll::{flatten_many_polls, flatten_one_poll};
pub use record::{partition_key, Delivery, PartitionKey, PollResult, ProducerRecord, Record};
pub use runner::{ClientScope, ScopedClientRunner};
pub use settings::{
    consumer_settings, producer_settings, ConsumerSettings, ProducerSettings, SettingsBuilder,
};
