//! Ready-made test environments.
//!
//! Each harness owns a started broker, the capability bundle composed around
//! its handle, and a runner wired to matching clients:
//! - [`MemoryHarness`] - in-process broker, no Docker needed
//! - [`KafkaContainerHarness`] - Kafka in a container with librdkafka clients

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::broker::{EmbeddedBroker, KafkaContainer};
use crate::client::RdKafkaClients;
use crate::config::{ClientDefaults, HarnessConfig};
use crate::env::{BlockingExecutor, CapabilityBundle, Clock, TokioBlocking, TokioClock};
use crate::error::StartupResult;
use crate::runner::ScopedClientRunner;
use crate::settings::SettingsBuilder;

use super::memory_broker::{Api, BrokerCall, MemoryBroker, MemoryClients};

/// Test environment around a [`MemoryBroker`].
pub struct MemoryHarness {
    broker: MemoryBroker,
    /// Runner bound to the broker.
    pub runner: ScopedClientRunner<MemoryClients>,
}

impl MemoryHarness {
    /// Harness with one partition per topic and default settings.
    ///
    /// # Errors
    ///
    /// Fails if no loopback port can be reserved.
    pub async fn new() -> StartupResult<Self> {
        HarnessBuilder::new().build().await
    }

    /// Harness with `partitions` partitions per auto-created topic.
    ///
    /// # Errors
    ///
    /// Fails if no loopback port can be reserved.
    pub async fn with_partitions(partitions: i32) -> StartupResult<Self> {
        HarnessBuilder::new().partitions(partitions).build().await
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    /// Broker handle, clock and executor shared by every scope.
    pub fn env(&self) -> &CapabilityBundle {
        self.runner.env()
    }

    /// Bootstrap servers of the running broker.
    pub fn bootstrap_servers(&self) -> String {
        self.env().bootstrap_servers()
    }

    /// Get all recorded broker calls.
    pub async fn get_broker_calls(&self) -> Vec<BrokerCall> {
        self.broker.get_calls().await
    }

    /// Get broker calls filtered by kind.
    pub async fn get_broker_calls_for_api(&self, api: Api) -> Vec<BrokerCall> {
        self.broker.get_calls_for_api(api).await
    }

    /// Clear recorded broker calls.
    pub async fn clear_broker_calls(&self) {
        self.broker.clear_calls().await;
    }

    /// Stop the broker. Later acquisitions fail with connection errors.
    pub async fn shutdown(&mut self) {
        self.broker.stop().await;
    }
}

/// Builder for a [`MemoryHarness`] with explicit capabilities.
pub struct HarnessBuilder {
    partitions: i32,
    clock: Arc<dyn Clock>,
    blocking: Arc<dyn BlockingExecutor>,
    defaults: ClientDefaults,
}

impl HarnessBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            partitions: 1,
            clock: Arc::new(TokioClock),
            blocking: Arc::new(TokioBlocking::default()),
            defaults: ClientDefaults::default(),
        }
    }

    /// Partition count of auto-created topics.
    #[must_use]
    pub fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn blocking(mut self, blocking: Arc<dyn BlockingExecutor>) -> Self {
        self.blocking = blocking;
        self
    }

    /// Defaults for derived producer and consumer settings.
    #[must_use]
    pub fn client_defaults(mut self, defaults: ClientDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Start the broker and compose the harness.
    ///
    /// # Errors
    ///
    /// Fails if no loopback port can be reserved.
    pub async fn build(self) -> StartupResult<MemoryHarness> {
        let mut broker = MemoryBroker::with_partitions(self.partitions);
        let handle = broker.start().await?;

        let env = CapabilityBundle::compose(Arc::new(handle), self.clock, self.blocking);
        let runner = ScopedClientRunner::with_settings(
            env,
            SettingsBuilder::new(self.defaults),
            broker.clients(),
        );
        Ok(MemoryHarness { broker, runner })
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Test environment around a [`KafkaContainer`].
pub struct KafkaContainerHarness {
    broker: KafkaContainer,
    /// Runner bound to the container.
    pub runner: ScopedClientRunner<RdKafkaClients>,
}

impl KafkaContainerHarness {
    /// Start a container with default configuration.
    ///
    /// # Errors
    ///
    /// Fails if Docker is unavailable or Kafka does not become ready in time.
    pub async fn new() -> StartupResult<Self> {
        Self::with_config(&HarnessConfig::default()).await
    }

    /// Start a container as described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if Docker is unavailable or Kafka does not become ready in time.
    pub async fn with_config(config: &HarnessConfig) -> StartupResult<Self> {
        let mut broker = KafkaContainer::new(config.broker.clone());
        let handle = broker.start().await?;

        let env = CapabilityBundle::tokio(Arc::new(handle));
        let runner = ScopedClientRunner::with_settings(
            env,
            SettingsBuilder::new(config.clients.clone()),
            RdKafkaClients,
        );
        Ok(Self { broker, runner })
    }

    pub fn env(&self) -> &CapabilityBundle {
        self.runner.env()
    }

    pub fn bootstrap_servers(&self) -> String {
        self.env().bootstrap_servers()
    }

    /// Stop and remove the container.
    pub async fn shutdown(&mut self) {
        self.broker.stop().await;
    }
}

/// Counter shared by tests that need unique topic or group names.
static NAME_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A name unique within this process, e.g. `orders-3`.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", NAME_COUNTER.fetch_add(1, Ordering::Relaxed))
}
