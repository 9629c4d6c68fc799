//! Scoped acquire/use/release of producers and consumers.
//!
//! Every `with_*` call derives fresh settings, acquires a client, hands it to
//! the caller's logic and releases it exactly once:
//!
//! 1. Invalid settings fail before anything is acquired.
//! 2. A failed acquisition skips the logic and has nothing to release.
//! 3. After the logic completes, successfully or not, release is awaited.
//! 4. If the logic panics or the surrounding future is dropped, the release
//!    guard hands the client to a task on the current Tokio runtime, which
//!    releases it. Outside a runtime the guard blocks the dropping thread
//!    until the release finishes.
//! 5. The release itself runs as a separate task, so dropping the scope
//!    while it is in flight does not abandon it.
//!
//! Logic is a closure returning a boxed future borrowing the scope:
//!
//! ```rust,ignore
//! let delivery = runner
//!     .with_producer_text(|scope| {
//!         Box::pin(async move {
//!             scope
//!                 .client
//!                 .send(ProducerRecord::to("orders").key("k".into()).value("m".into()))
//!                 .await
//!         })
//!     })
//!     .await?;
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::client::{ClientFactory, Consumer, Producer};
use crate::codec::{Codec, TextCodec};
use crate::env::CapabilityBundle;
use crate::error::{ClientError, ClientResult, ScopeError, ScopeResult};
use crate::record::{Delivery, ProducerRecord};
use crate::settings::SettingsBuilder;

/// What scoped logic receives: the live client and the session capabilities.
pub struct ClientScope<'s, C> {
    pub client: &'s mut C,
    pub env: &'s CapabilityBundle,
}

/// Text producer handed to logic by [`ScopedClientRunner::with_producer_text`].
pub type TextProducer<F> = Producer<<F as ClientFactory>::Producer, TextCodec, TextCodec>;

/// Text consumer handed to logic by [`ScopedClientRunner::with_consumer`].
pub type TextConsumer<F> = Consumer<<F as ClientFactory>::Consumer, TextCodec, TextCodec>;

/// A client that knows how to give itself back to its factory.
pub(crate) trait Releasable<F: ClientFactory>: Send + 'static {
    fn release(self, clients: Arc<F>) -> BoxFuture<'static, ClientResult<()>>;
}

impl<F, KC, VC> Releasable<F> for Producer<F::Producer, KC, VC>
where
    F: ClientFactory,
    KC: Codec,
    VC: Codec,
{
    fn release(self, clients: Arc<F>) -> BoxFuture<'static, ClientResult<()>> {
        let producer = self.into_inner();
        Box::pin(async move { clients.release_producer(producer).await })
    }
}

impl<F, KC, VC> Releasable<F> for Consumer<F::Consumer, KC, VC>
where
    F: ClientFactory,
    KC: Codec,
    VC: Codec,
{
    fn release(self, clients: Arc<F>) -> BoxFuture<'static, ClientResult<()>> {
        let consumer = self.into_inner();
        Box::pin(async move { clients.release_consumer(consumer).await })
    }
}

/// Owns an acquired client until it has been released.
struct ReleaseGuard<F: ClientFactory, C: Releasable<F>> {
    clients: Arc<F>,
    client: Option<C>,
}

impl<F: ClientFactory, C: Releasable<F>> ReleaseGuard<F, C> {
    fn new(clients: Arc<F>, client: C) -> Self {
        Self {
            clients,
            client: Some(client),
        }
    }

    fn client_mut(&mut self) -> &mut C {
        self.client
            .as_mut()
            .expect("client is held until the guard releases it")
    }

    /// Release the client on the normal exit path.
    ///
    /// On a Tokio runtime the release runs as its own task, so it still
    /// completes if the caller is cancelled while awaiting it.
    async fn release(mut self) -> ClientResult<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        let release = client.release(Arc::clone(&self.clients));
        match Handle::try_current() {
            Ok(runtime) => runtime
                .spawn(release)
                .await
                .map_err(|e| ClientError::Blocking(e.to_string()))?,
            Err(_) => release.await,
        }
    }
}

impl<F: ClientFactory, C: Releasable<F>> Drop for ReleaseGuard<F, C> {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let release = client.release(Arc::clone(&self.clients));
        match Handle::try_current() {
            Ok(runtime) => {
                debug!("scope exited early, releasing client in background");
                runtime.spawn(async move {
                    if let Err(e) = release.await {
                        warn!(error = %e, "background client release failed");
                    }
                });
            }
            Err(_) => {
                debug!("scope exited early outside a runtime, releasing client in place");
                if let Err(e) = futures::executor::block_on(release) {
                    warn!(error = %e, "client release failed");
                }
            }
        }
    }
}

/// Runs caller logic against scoped producers and consumers.
pub struct ScopedClientRunner<F> {
    env: CapabilityBundle,
    settings: SettingsBuilder,
    clients: Arc<F>,
}

impl<F> Clone for ScopedClientRunner<F> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            settings: self.settings.clone(),
            clients: Arc::clone(&self.clients),
        }
    }
}

impl<F: ClientFactory> ScopedClientRunner<F> {
    /// Runner with default settings.
    pub fn new(env: CapabilityBundle, clients: F) -> Self {
        Self::with_settings(env, SettingsBuilder::default(), clients)
    }

    /// Runner with explicit settings defaults.
    pub fn with_settings(env: CapabilityBundle, settings: SettingsBuilder, clients: F) -> Self {
        Self {
            env,
            settings,
            clients: Arc::new(clients),
        }
    }

    /// The capability bundle shared by every scope of this runner.
    #[must_use]
    pub fn env(&self) -> &CapabilityBundle {
        &self.env
    }

    #[must_use]
    pub fn settings(&self) -> &SettingsBuilder {
        &self.settings
    }

    /// The client factory.
    #[must_use]
    pub fn clients(&self) -> &F {
        &self.clients
    }

    /// Run `logic` against a producer encoding with the given codecs.
    ///
    /// # Errors
    ///
    /// See [`ScopeError`]. Logic failures come back unchanged as
    /// [`ScopeError::Logic`].
    pub async fn with_producer<KC, VC, T, E, L>(
        &self,
        key_codec: KC,
        value_codec: VC,
        logic: L,
    ) -> ScopeResult<T, E>
    where
        KC: Codec,
        VC: Codec,
        L: for<'s> FnOnce(
            ClientScope<'s, Producer<F::Producer, KC, VC>>,
        ) -> BoxFuture<'s, Result<T, E>>,
    {
        let settings = self.settings.producer_settings(&self.env);
        let producer = self
            .clients
            .acquire_producer(&settings, &self.env)
            .await
            .map_err(ScopeError::Acquisition)?;
        debug!(bootstrap = %self.env.bootstrap_servers(), "producer acquired");

        self.run_scoped(Producer::new(producer, key_codec, value_codec), logic)
            .await
    }

    /// Run `logic` against a producer with UTF-8 string keys and values.
    ///
    /// # Errors
    ///
    /// See [`ScopedClientRunner::with_producer`].
    pub async fn with_producer_text<T, E, L>(&self, logic: L) -> ScopeResult<T, E>
    where
        L: for<'s> FnOnce(ClientScope<'s, TextProducer<F>>) -> BoxFuture<'s, Result<T, E>>,
    {
        self.with_producer(TextCodec, TextCodec, logic).await
    }

    /// Run `logic` against a consumer decoding with the given codecs.
    ///
    /// # Errors
    ///
    /// Empty `group_id` or `client_id` fails with
    /// [`ScopeError::InvalidSettings`] before any connection is attempted.
    pub async fn with_consumer_using<KC, VC, T, E, L>(
        &self,
        key_codec: KC,
        value_codec: VC,
        group_id: &str,
        client_id: &str,
        logic: L,
    ) -> ScopeResult<T, E>
    where
        KC: Codec,
        VC: Codec,
        L: for<'s> FnOnce(
            ClientScope<'s, Consumer<F::Consumer, KC, VC>>,
        ) -> BoxFuture<'s, Result<T, E>>,
    {
        let settings = self
            .settings
            .consumer_settings(&self.env, group_id, client_id)?;
        let consumer = self
            .clients
            .acquire_consumer(&settings, &self.env)
            .await
            .map_err(ScopeError::Acquisition)?;
        debug!(group_id, client_id, "consumer acquired");

        let consumer = Consumer::new(
            consumer,
            key_codec,
            value_codec,
            settings.poll_interval(),
            self.env.clone(),
        );
        self.run_scoped(consumer, logic).await
    }

    /// Run `logic` against a consumer with UTF-8 string keys and values.
    ///
    /// # Errors
    ///
    /// See [`ScopedClientRunner::with_consumer_using`].
    pub async fn with_consumer<T, E, L>(
        &self,
        group_id: &str,
        client_id: &str,
        logic: L,
    ) -> ScopeResult<T, E>
    where
        L: for<'s> FnOnce(ClientScope<'s, TextConsumer<F>>) -> BoxFuture<'s, Result<T, E>>,
    {
        self.with_consumer_using(TextCodec, TextCodec, group_id, client_id, logic)
            .await
    }

    /// Produce one text record.
    ///
    /// # Errors
    ///
    /// Send failures come back as [`ScopeError::Logic`].
    pub async fn produce_one(
        &self,
        topic: &str,
        key: &str,
        value: &str,
    ) -> ScopeResult<Delivery, ClientError> {
        let record = ProducerRecord::to(topic)
            .key(key.to_string())
            .value(value.to_string());
        self.with_producer_text(move |scope| {
            Box::pin(async move { scope.client.send(record).await })
        })
        .await
    }

    /// Produce text records in order, letting the partitioner choose partitions.
    ///
    /// # Errors
    ///
    /// Send failures come back as [`ScopeError::Logic`].
    pub async fn produce_many<I, K, V>(
        &self,
        topic: &str,
        records: I,
    ) -> ScopeResult<Vec<Delivery>, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.send_text_batch(text_records(topic, None, records)).await
    }

    /// Produce text records in order, all to `partition`.
    ///
    /// # Errors
    ///
    /// Send failures come back as [`ScopeError::Logic`].
    pub async fn produce_many_to_partition<I, K, V>(
        &self,
        topic: &str,
        partition: i32,
        records: I,
    ) -> ScopeResult<Vec<Delivery>, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.send_text_batch(text_records(topic, Some(partition), records))
            .await
    }

    async fn send_text_batch(
        &self,
        records: Vec<ProducerRecord<String, String>>,
    ) -> ScopeResult<Vec<Delivery>, ClientError> {
        self.with_producer_text(move |scope| {
            Box::pin(async move { scope.client.send_batch(records).await })
        })
        .await
    }

    async fn run_scoped<C, T, E, L>(&self, client: C, logic: L) -> ScopeResult<T, E>
    where
        C: Releasable<F>,
        L: for<'s> FnOnce(ClientScope<'s, C>) -> BoxFuture<'s, Result<T, E>>,
    {
        let mut guard = ReleaseGuard::new(Arc::clone(&self.clients), client);

        let outcome = logic(ClientScope {
            client: guard.client_mut(),
            env: &self.env,
        })
        .await;

        match guard.release().await {
            Ok(()) => {
                debug!("client released");
                outcome.map_err(ScopeError::Logic)
            }
            Err(source) => Err(ScopeError::Release { source, outcome }),
        }
    }
}

fn text_records<I, K, V>(
    topic: &str,
    partition: Option<i32>,
    records: I,
) -> Vec<ProducerRecord<String, String>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    records
        .into_iter()
        .map(|(key, value)| {
            let record = ProducerRecord::to(topic).key(key.into()).value(value.into());
            match partition {
                Some(p) => record.partition(p),
                None => record,
            }
        })
        .collect()
}
