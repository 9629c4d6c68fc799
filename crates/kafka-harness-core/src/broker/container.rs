//! Single-node Kafka running in Docker through testcontainers.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{BaseProducer, Producer};
use rdkafka::ClientConfig;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{Kafka, KAFKA_PORT};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerStartupError, StartupResult};

use super::{BrokerHandle, EmbeddedBroker};

/// Interval between readiness probes while the container boots.
const READY_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Timeout of a single readiness probe.
const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka in a container, started on demand and removed on [`stop`].
///
/// [`stop`]: EmbeddedBroker::stop
pub struct KafkaContainer {
    config: BrokerConfig,
    container: Option<ContainerAsync<Kafka>>,
}

impl KafkaContainer {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            container: None,
        }
    }

    /// Whether a container is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.container.is_some()
    }

    async fn run_container(&self) -> StartupResult<ContainerAsync<Kafka>> {
        let image = Kafka::default().with_env_var(
            "KAFKA_NUM_PARTITIONS",
            self.config.default_partitions.to_string(),
        );
        let started = match self.config.image_tag() {
            Some(tag) => image.with_tag(tag).start().await,
            None => image.start().await,
        };
        started.map_err(|e| BrokerStartupError::Container(e.to_string()))
    }

    /// Poll the broker with metadata requests until one succeeds or the
    /// startup window closes.
    async fn wait_ready(&self, handle: &BrokerHandle) -> StartupResult<()> {
        let started = Instant::now();
        let deadline = started + self.config.startup_timeout();
        let bootstrap = handle.bootstrap_servers();

        loop {
            let servers = bootstrap.clone();
            let probe = tokio::task::spawn_blocking(move || {
                let producer: BaseProducer = ClientConfig::new()
                    .set("bootstrap.servers", &servers)
                    .set("message.timeout.ms", "5000")
                    .create()?;
                producer
                    .client()
                    .fetch_metadata(None, READY_PROBE_TIMEOUT)
                    .map(|_| ())
            })
            .await;

            match probe {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => debug!(error = %e, "broker not ready yet"),
                Err(e) => debug!(error = %e, "readiness probe aborted"),
            }

            if Instant::now() + READY_PROBE_INTERVAL >= deadline {
                return Err(BrokerStartupError::NotReady {
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(READY_PROBE_INTERVAL).await;
        }
    }
}

#[async_trait]
impl EmbeddedBroker for KafkaContainer {
    async fn start(&mut self) -> StartupResult<BrokerHandle> {
        if self.container.is_some() {
            self.stop().await;
        }

        let container = self.run_container().await?;
        let port = container
            .get_host_port_ipv4(KAFKA_PORT)
            .await
            .map_err(|e| BrokerStartupError::Container(e.to_string()))?;
        let handle = BrokerHandle::single(self.config.host.clone(), port);

        // Keep the container before probing so a failed probe still removes it.
        self.container = Some(container);
        if let Err(e) = self.wait_ready(&handle).await {
            self.stop().await;
            return Err(e);
        }

        info!(bootstrap = %handle.bootstrap_servers(), "kafka container ready");
        Ok(handle)
    }

    async fn stop(&mut self) {
        let Some(container) = self.container.take() else {
            return;
        };
        if let Err(e) = container.stop().await {
            warn!(error = %e, "failed to stop kafka container");
        }
        info!("kafka container stopped");
    }
}
