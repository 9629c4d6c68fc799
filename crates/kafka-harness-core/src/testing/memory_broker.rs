//! In-process Kafka stand-in for tests that cannot run Docker.
//!
//! The broker keeps per-partition logs in memory and serves producers and
//! consumers created by [`MemoryClients`]:
//! - Topics are created on first use with the broker's default partition count
//! - Keyed records are partitioned by key hash, unkeyed ones round-robin
//! - Consumer groups resume from their committed positions
//! - Every client interaction is recorded as a [`BrokerCall`]
//!
//! A loopback port is reserved while the broker runs so the handle it returns
//! carries a real, unique address.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::broker::{BrokerAddress, BrokerHandle, EmbeddedBroker};
use crate::client::{ClientFactory, ConsumerClient, ProducerClient};
use crate::env::CapabilityBundle;
use crate::error::{ClientError, ClientResult, StartupResult};
use crate::record::{Delivery, PartitionKey, ProducerRecord, RawPollResult, Record};
use crate::settings::{ConsumerSettings, ProducerSettings, AUTO_OFFSET_RESET};

/// Pause between empty fetches while a poll waits for records.
const FETCH_BACKOFF: Duration = Duration::from_millis(5);

/// Kind of client interaction recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Api {
    Connect,
    Produce,
    Fetch,
    Release,
}

/// A recorded client interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerCall {
    pub api: Api,
    /// Client id from the settings, when one was given.
    pub client_id: Option<String>,
    pub topic: Option<String>,
    pub partition: Option<i32>,
}

impl BrokerCall {
    fn new(api: Api, client_id: Option<&str>) -> Self {
        Self {
            api,
            client_id: client_id.map(str::to_string),
            topic: None,
            partition: None,
        }
    }

    fn on(mut self, topic: &str, partition: i32) -> Self {
        self.topic = Some(topic.to_string());
        self.partition = Some(partition);
        self
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    value: Option<Bytes>,
    timestamp: i64,
}

#[derive(Debug, Default)]
struct BrokerState {
    address: Option<BrokerAddress>,
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    committed: HashMap<(String, PartitionKey), i64>,
    round_robin: usize,
}

impl BrokerState {
    fn topic_mut(&mut self, topic: &str, partitions: i32) -> &mut Vec<Vec<StoredRecord>> {
        self.topics.entry(topic.to_string()).or_insert_with(|| {
            debug!(topic, partitions, "auto-creating topic");
            vec![Vec::new(); partitions.max(1) as usize]
        })
    }

    fn partition_count(&self, topic: &str) -> Option<i32> {
        self.topics.get(topic).map(|p| p.len() as i32)
    }
}

#[derive(Debug)]
struct Shared {
    state: RwLock<BrokerState>,
    call_log: RwLock<Vec<BrokerCall>>,
    default_partitions: i32,
    refuse_connections: AtomicBool,
    fail_releases: AtomicBool,
}

impl Shared {
    async fn record_call(&self, call: BrokerCall) {
        self.call_log.write().await.push(call);
    }

    /// Fail unless the broker is running, accepting connections and listed in `target`.
    async fn ensure_reachable(&self, target: &[BrokerAddress]) -> ClientResult<()> {
        let requested = join_addresses(target);
        let state = self.state.read().await;
        let Some(address) = state.address.as_ref() else {
            return Err(connection_refused(requested, "broker is not running"));
        };
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(connection_refused(requested, "connection refused"));
        }
        if !target.contains(address) {
            return Err(connection_refused(
                requested,
                &format!("no broker listening, expected {address}"),
            ));
        }
        Ok(())
    }

    async fn ensure_running(&self) -> ClientResult<()> {
        if self.state.read().await.address.is_some() {
            Ok(())
        } else {
            Err(ClientError::Closed)
        }
    }
}

/// In-process broker.
pub struct MemoryBroker {
    shared: Arc<Shared>,
    listener: Option<TcpListener>,
}

impl MemoryBroker {
    /// Broker whose auto-created topics have one partition.
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Broker whose auto-created topics have `partitions` partitions.
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(BrokerState::default()),
                call_log: RwLock::new(Vec::new()),
                default_partitions: partitions.max(1),
                refuse_connections: AtomicBool::new(false),
                fail_releases: AtomicBool::new(false),
            }),
            listener: None,
        }
    }

    /// Client factory bound to this broker.
    #[must_use]
    pub fn clients(&self) -> MemoryClients {
        MemoryClients {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Address while running.
    pub async fn address(&self) -> Option<BrokerAddress> {
        self.shared.state.read().await.address.clone()
    }

    /// Create `topic` with an explicit partition count. Existing topics are
    /// left untouched.
    pub async fn create_topic(&self, topic: &str, partitions: i32) {
        self.shared
            .state
            .write()
            .await
            .topic_mut(topic, partitions);
    }

    /// Number of partitions of `topic`, if it exists.
    pub async fn partition_count(&self, topic: &str) -> Option<i32> {
        self.shared.state.read().await.partition_count(topic)
    }

    /// Everything stored in one partition, oldest first.
    pub async fn records(&self, topic: &str, partition: i32) -> Vec<Record<Bytes, Bytes>> {
        let state = self.shared.state.read().await;
        let Some(log) = state
            .topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
        else {
            return Vec::new();
        };
        log.iter()
            .enumerate()
            .map(|(offset, stored)| to_record(topic, partition, offset as i64, stored))
            .collect()
    }

    /// Committed position of `group` on one partition.
    pub async fn committed(&self, group: &str, partition: &PartitionKey) -> Option<i64> {
        self.shared
            .state
            .read()
            .await
            .committed
            .get(&(group.to_string(), partition.clone()))
            .copied()
    }

    /// Make every acquisition fail with a connection error.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.shared
            .refuse_connections
            .store(refuse, Ordering::SeqCst);
    }

    /// Make every release report a failure after doing its work.
    pub fn set_fail_releases(&self, fail: bool) {
        self.shared.fail_releases.store(fail, Ordering::SeqCst);
    }

    /// Get all recorded calls.
    pub async fn get_calls(&self) -> Vec<BrokerCall> {
        self.shared.call_log.read().await.clone()
    }

    /// Get calls filtered by kind.
    pub async fn get_calls_for_api(&self, api: Api) -> Vec<BrokerCall> {
        self.shared
            .call_log
            .read()
            .await
            .iter()
            .filter(|c| c.api == api)
            .cloned()
            .collect()
    }

    /// Clear the call log.
    pub async fn clear_calls(&self) {
        self.shared.call_log.write().await.clear();
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddedBroker for MemoryBroker {
    async fn start(&mut self) -> StartupResult<BrokerHandle> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local = listener.local_addr()?;
        let address = BrokerAddress::new(local.ip().to_string(), local.port());

        self.shared.state.write().await.address = Some(address.clone());
        self.listener = Some(listener);

        info!(%address, "memory broker started");
        BrokerHandle::new(vec![address])
    }

    async fn stop(&mut self) {
        let previous = self.shared.state.write().await.address.take();
        self.listener = None;
        if let Some(address) = previous {
            info!(%address, "memory broker stopped");
        }
    }
}

/// [`ClientFactory`] over a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryClients {
    shared: Arc<Shared>,
}

#[async_trait]
impl ClientFactory for MemoryClients {
    type Producer = MemoryProducer;
    type Consumer = MemoryConsumer;

    async fn acquire_producer(
        &self,
        settings: &ProducerSettings,
        _env: &CapabilityBundle,
    ) -> ClientResult<MemoryProducer> {
        self.shared.ensure_reachable(settings.addresses()).await?;
        let client_id = settings.client_id().map(str::to_string);
        self.shared
            .record_call(BrokerCall::new(Api::Connect, client_id.as_deref()))
            .await;

        Ok(MemoryProducer {
            shared: Arc::clone(&self.shared),
            client_id,
        })
    }

    async fn release_producer(&self, producer: MemoryProducer) -> ClientResult<()> {
        self.shared
            .record_call(BrokerCall::new(Api::Release, producer.client_id.as_deref()))
            .await;
        injected_release_failure(&self.shared)
    }

    async fn acquire_consumer(
        &self,
        settings: &ConsumerSettings,
        env: &CapabilityBundle,
    ) -> ClientResult<MemoryConsumer> {
        self.shared.ensure_reachable(settings.addresses()).await?;
        self.shared
            .record_call(BrokerCall::new(Api::Connect, Some(settings.client_id())))
            .await;

        Ok(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            group_id: settings.group_id().to_string(),
            client_id: settings.client_id().to_string(),
            subscription: Vec::new(),
            assignment: None,
            positions: HashMap::new(),
            start_at_end: settings.option(AUTO_OFFSET_RESET) == Some("latest"),
            max_poll_records: settings.max_poll_records(),
            env: env.clone(),
        })
    }

    async fn release_consumer(&self, consumer: MemoryConsumer) -> ClientResult<()> {
        if consumer.assignment.is_none() {
            let mut state = self.shared.state.write().await;
            for (partition, position) in &consumer.positions {
                state
                    .committed
                    .insert((consumer.group_id.clone(), partition.clone()), *position);
            }
        }
        self.shared
            .record_call(BrokerCall::new(Api::Release, Some(&consumer.client_id)))
            .await;
        injected_release_failure(&self.shared)
    }
}

/// Producer connected to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryProducer {
    shared: Arc<Shared>,
    client_id: Option<String>,
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    async fn send(&mut self, record: ProducerRecord<Bytes, Bytes>) -> ClientResult<Delivery> {
        let delivery = {
            let mut state = self.shared.state.write().await;
            if state.address.is_none() {
                return Err(ClientError::Send {
                    topic: record.topic,
                    message: "broker is not running".to_string(),
                });
            }

            let next = state.round_robin;
            let partitions = state.topic_mut(&record.topic, self.shared.default_partitions);
            let count = partitions.len() as i32;
            let partition = match (record.partition, record.key.as_ref()) {
                (Some(p), _) if (0..count).contains(&p) => p,
                (Some(p), _) => {
                    return Err(ClientError::UnknownPartition {
                        topic: record.topic,
                        partition: p,
                    })
                }
                (None, Some(key)) => hash_partition(key, count),
                (None, None) => (next % count as usize) as i32,
            };

            let log = &mut partitions[partition as usize];
            log.push(StoredRecord {
                key: record.key,
                value: record.value,
                timestamp: now_millis(),
            });
            let offset = log.len() as i64 - 1;

            if record.partition.is_none() {
                state.round_robin = next.wrapping_add(1);
            }
            Delivery {
                topic: record.topic,
                partition,
                offset,
            }
        };

        self.shared
            .record_call(
                BrokerCall::new(Api::Produce, self.client_id.as_deref())
                    .on(&delivery.topic, delivery.partition),
            )
            .await;
        Ok(delivery)
    }

    async fn flush(&mut self) -> ClientResult<()> {
        self.shared.ensure_running().await
    }
}

/// Consumer connected to a [`MemoryBroker`].
///
/// A subscribed consumer is the only member of its group and reads every
/// partition of its topics, committing its positions on every poll. An
/// assigned consumer reads exactly its partitions from the beginning and
/// never commits.
#[derive(Debug)]
pub struct MemoryConsumer {
    shared: Arc<Shared>,
    group_id: String,
    client_id: String,
    subscription: Vec<String>,
    assignment: Option<Vec<PartitionKey>>,
    positions: HashMap<PartitionKey, i64>,
    start_at_end: bool,
    max_poll_records: usize,
    env: CapabilityBundle,
}

impl MemoryConsumer {
    /// Take up to `max_poll_records` records past the current positions.
    async fn fetch(&mut self) -> ClientResult<RawPollResult> {
        let mut state = self.shared.state.write().await;
        if state.address.is_none() {
            return Err(ClientError::Closed);
        }

        let targets: Vec<PartitionKey> = match &self.assignment {
            Some(partitions) => partitions.clone(),
            None => self
                .subscription
                .iter()
                .flat_map(|topic| {
                    let count = state.partition_count(topic).unwrap_or(0);
                    (0..count).map(move |p| PartitionKey::new(topic.clone(), p))
                })
                .collect(),
        };

        let mut poll = RawPollResult::new();
        let mut budget = self.max_poll_records;
        for key in targets {
            if budget == 0 {
                break;
            }
            let Some(log) = state
                .topics
                .get(&key.topic)
                .and_then(|partitions| partitions.get(key.partition as usize))
            else {
                continue;
            };

            let committed = state.committed.get(&(self.group_id.clone(), key.clone()));
            let start_at_end = self.start_at_end;
            let position = *self.positions.entry(key.clone()).or_insert_with(|| {
                committed.copied().unwrap_or(if start_at_end {
                    log.len() as i64
                } else {
                    0
                })
            });

            let end = log.len().min(position as usize + budget).max(position as usize);
            for offset in position as usize..end {
                poll.push(to_record(&key.topic, key.partition, offset as i64, &log[offset]));
            }
            budget -= end - position as usize;
            self.positions.insert(key, end as i64);
        }

        if self.assignment.is_none() {
            for (key, position) in &self.positions {
                state
                    .committed
                    .insert((self.group_id.clone(), key.clone()), *position);
            }
        }
        Ok(poll)
    }
}

#[async_trait]
impl ConsumerClient for MemoryConsumer {
    async fn subscribe(&mut self, topics: &[&str]) -> ClientResult<()> {
        self.shared.ensure_running().await?;
        {
            let mut state = self.shared.state.write().await;
            for topic in topics {
                state.topic_mut(topic, self.shared.default_partitions);
            }
        }
        self.subscription = topics.iter().map(|t| t.to_string()).collect();
        self.assignment = None;
        self.positions.clear();
        Ok(())
    }

    async fn assign(&mut self, partitions: &[PartitionKey]) -> ClientResult<()> {
        self.shared.ensure_running().await?;
        self.subscription.clear();
        self.positions = partitions.iter().map(|p| (p.clone(), 0)).collect();
        self.assignment = Some(partitions.to_vec());
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> ClientResult<RawPollResult> {
        self.shared
            .record_call(BrokerCall::new(Api::Fetch, Some(&self.client_id)))
            .await;

        let deadline = self.env.clock().now() + timeout;
        loop {
            let poll = self.fetch().await?;
            let now = self.env.clock().now();
            if !poll.is_empty() || now >= deadline {
                return Ok(poll);
            }
            self.env
                .clock()
                .sleep(FETCH_BACKOFF.min(deadline - now))
                .await;
        }
    }
}

fn hash_partition(key: &[u8], partitions: i32) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as i32
}

fn to_record(
    topic: &str,
    partition: i32,
    offset: i64,
    stored: &StoredRecord,
) -> Record<Bytes, Bytes> {
    Record {
        topic: topic.to_string(),
        partition,
        offset,
        key: stored.key.clone(),
        value: stored.value.clone(),
        timestamp: Some(stored.timestamp),
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn join_addresses(addresses: &[BrokerAddress]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn connection_refused(address: String, message: &str) -> ClientError {
    ClientError::Connection {
        address,
        message: message.to_string(),
    }
}

fn injected_release_failure(shared: &Shared) -> ClientResult<()> {
    if shared.fail_releases.load(Ordering::SeqCst) {
        Err(ClientError::Kafka("injected release failure".to_string()))
    } else {
        Ok(())
    }
}
