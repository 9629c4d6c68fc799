//! Capability bundle threaded through every client operation.
//!
//! The harness never looks up the broker, the clock or the blocking executor
//! from ambient state. They are composed once into a [`CapabilityBundle`]
//! and passed by reference to settings derivation, client acquisition and
//! caller logic, so every producer and consumer in a session targets the same
//! broker and runs blocking work on the same executor.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use kafka_harness_core::broker::BrokerHandle;
//! use kafka_harness_core::env::{CapabilityBundle, TokioBlocking, TokioClock};
//!
//! let env = CapabilityBundle::compose(
//!     Arc::new(BrokerHandle::single("127.0.0.1", 9092)),
//!     Arc::new(TokioClock),
//!     Arc::new(TokioBlocking::default()),
//! );
//! assert_eq!(env.bootstrap_servers(), "127.0.0.1:9092");
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::broker::BrokerHandle;
use crate::error::{ClientError, ClientResult};

/// Source of time for timeouts and poll waits.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Unit of blocking work handed to a [`BlockingExecutor`].
pub type BlockingJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs blocking client calls off the cooperative scheduler.
#[async_trait]
pub trait BlockingExecutor: Send + Sync + fmt::Debug {
    /// Run `job` to completion on a thread that may block.
    async fn execute(&self, job: BlockingJob) -> ClientResult<()>;
}

/// Clock backed by `tokio::time`, so paused test time applies to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Executor backed by Tokio's blocking thread pool.
#[derive(Debug, Clone, Default)]
pub struct TokioBlocking {
    /// Runtime to spawn on; the caller's runtime when unset.
    handle: Option<Handle>,
}

impl TokioBlocking {
    /// Spawn blocking jobs on a specific runtime.
    #[must_use]
    pub fn on(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

#[async_trait]
impl BlockingExecutor for TokioBlocking {
    /// Outside any runtime, as when a scope is torn down from a plain
    /// thread, the job runs inline on the calling thread.
    async fn execute(&self, job: BlockingJob) -> ClientResult<()> {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => match Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => {
                    job();
                    return Ok(());
                }
            },
        };
        handle
            .spawn_blocking(job)
            .await
            .map_err(|e| ClientError::Blocking(e.to_string()))
    }
}

/// Broker address, clock and blocking executor for one test session.
///
/// Cloning is cheap and shares the underlying capabilities; the bundle itself
/// owns none of them exclusively.
#[derive(Debug, Clone)]
pub struct CapabilityBundle {
    broker: Arc<BrokerHandle>,
    clock: Arc<dyn Clock>,
    blocking: Arc<dyn BlockingExecutor>,
}

impl CapabilityBundle {
    /// Compose the three capabilities into one bundle.
    ///
    /// All three are required; a [`BrokerHandle`] always carries at least one
    /// address, so a composed bundle is always complete.
    pub fn compose(
        broker: Arc<BrokerHandle>,
        clock: Arc<dyn Clock>,
        blocking: Arc<dyn BlockingExecutor>,
    ) -> Self {
        Self {
            broker,
            clock,
            blocking,
        }
    }

    /// Bundle using the Tokio clock and blocking pool.
    pub fn tokio(broker: Arc<BrokerHandle>) -> Self {
        Self::compose(
            broker,
            Arc::new(TokioClock),
            Arc::new(TokioBlocking::default()),
        )
    }

    /// The broker every client in this session targets.
    #[must_use]
    pub fn broker(&self) -> &BrokerHandle {
        &self.broker
    }

    /// The session clock.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The session blocking executor.
    #[must_use]
    pub fn blocking(&self) -> &dyn BlockingExecutor {
        self.blocking.as_ref()
    }

    /// Bootstrap servers string for the session broker.
    #[must_use]
    pub fn bootstrap_servers(&self) -> String {
        self.broker.bootstrap_servers()
    }

    /// Run a blocking closure on the session executor and return its value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Blocking`] if the executor fails or the job
    /// panics.
    pub async fn run_blocking<R, F>(&self, f: F) -> ClientResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.blocking
            .execute(Box::new(move || {
                let _ = tx.send(f());
            }))
            .await?;
        rx.await
            .map_err(|_| ClientError::Blocking("job finished without a result".to_string()))
    }
}
