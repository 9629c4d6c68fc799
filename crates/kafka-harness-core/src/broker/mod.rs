//! Ephemeral brokers.
//!
//! An [`EmbeddedBroker`] is started once per test session. Starting it yields
//! a [`BrokerHandle`] carrying the addresses clients connect to; the handle is
//! shared read-only through the capability bundle for the rest of the session.
//!
//! Implementations:
//!
//! - [`KafkaContainer`] - a single-node Kafka in a Docker container
//! - `testing::MemoryBroker` - an in-process broker for tests without Docker

pub mod container;
pub mod handle;

use async_trait::async_trait;

use crate::error::StartupResult;

pub use container::KafkaContainer;
pub use handle::{BrokerAddress, BrokerHandle};

/// A broker whose lifetime is bounded by the test session.
#[async_trait]
pub trait EmbeddedBroker: Send {
    /// Start the broker and wait until it answers client requests.
    ///
    /// # Errors
    ///
    /// Fails if the broker cannot be started or does not become ready within
    /// its startup window.
    async fn start(&mut self) -> StartupResult<BrokerHandle>;

    /// Stop the broker. Clients still connected afterwards observe
    /// connection errors. Stopping a broker that is not running is a no-op.
    async fn stop(&mut self);
}
