//! Messaging client interfaces.
//!
//! The harness talks to producers and consumers only through the traits in
//! this module. [`ClientFactory`] acquires and releases clients;
//! [`ProducerClient`] and [`ConsumerClient`] move raw bytes. [`Producer`] and
//! [`Consumer`] wrap a raw client with key/value codecs and are what scoped
//! logic receives.
//!
//! Implementations:
//!
//! - [`kafka::RdKafkaClients`] - librdkafka clients for a real broker
//! - `testing::MemoryClients` - clients of the in-process broker

pub mod kafka;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::codec::Codec;
use crate::env::CapabilityBundle;
use crate::error::ClientResult;
use crate::record::{Delivery, PartitionKey, PollResult, ProducerRecord, RawPollResult};
use crate::settings::{ConsumerSettings, ProducerSettings};

pub use kafka::RdKafkaClients;

/// Raw producer.
#[async_trait]
pub trait ProducerClient: Send {
    /// Send one record and wait for the broker's acknowledgement.
    async fn send(&mut self, record: ProducerRecord<Bytes, Bytes>) -> ClientResult<Delivery>;

    /// Send records in order, waiting for every acknowledgement.
    async fn send_batch(
        &mut self,
        records: Vec<ProducerRecord<Bytes, Bytes>>,
    ) -> ClientResult<Vec<Delivery>> {
        let mut deliveries = Vec::with_capacity(records.len());
        for record in records {
            deliveries.push(self.send(record).await?);
        }
        Ok(deliveries)
    }

    /// Wait until every queued record has been delivered.
    async fn flush(&mut self) -> ClientResult<()>;
}

/// Raw consumer.
#[async_trait]
pub trait ConsumerClient: Send {
    /// Join the consumer group for `topics`.
    async fn subscribe(&mut self, topics: &[&str]) -> ClientResult<()>;

    /// Read exactly `partitions`, from the beginning, without group assignment.
    async fn assign(&mut self, partitions: &[PartitionKey]) -> ClientResult<()>;

    /// Wait up to `timeout` for records.
    async fn poll(&mut self, timeout: Duration) -> ClientResult<RawPollResult>;
}

/// Acquires and releases clients for one broker.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Producer: ProducerClient + 'static;
    type Consumer: ConsumerClient + 'static;

    /// Connect a producer.
    async fn acquire_producer(
        &self,
        settings: &ProducerSettings,
        env: &CapabilityBundle,
    ) -> ClientResult<Self::Producer>;

    /// Flush and close a producer.
    async fn release_producer(&self, producer: Self::Producer) -> ClientResult<()>;

    /// Connect a consumer.
    async fn acquire_consumer(
        &self,
        settings: &ConsumerSettings,
        env: &CapabilityBundle,
    ) -> ClientResult<Self::Consumer>;

    /// Leave the group and close a consumer.
    async fn release_consumer(&self, consumer: Self::Consumer) -> ClientResult<()>;
}

/// A producer that encodes keys and values with codecs.
pub struct Producer<P, KC, VC> {
    inner: P,
    key_codec: KC,
    value_codec: VC,
}

impl<P, KC, VC> Producer<P, KC, VC>
where
    P: ProducerClient,
    KC: Codec,
    VC: Codec,
{
    pub fn new(inner: P, key_codec: KC, value_codec: VC) -> Self {
        Self {
            inner,
            key_codec,
            value_codec,
        }
    }

    /// Encode and send one record.
    ///
    /// # Errors
    ///
    /// Returns codec failures and client send failures unchanged.
    pub async fn send(
        &mut self,
        record: ProducerRecord<KC::Item, VC::Item>,
    ) -> ClientResult<Delivery> {
        let raw = record.encode(&self.key_codec, &self.value_codec)?;
        self.inner.send(raw).await
    }

    /// Encode and send records in order.
    ///
    /// # Errors
    ///
    /// Nothing is sent if any record fails to encode.
    pub async fn send_batch(
        &mut self,
        records: Vec<ProducerRecord<KC::Item, VC::Item>>,
    ) -> ClientResult<Vec<Delivery>> {
        let raw = records
            .iter()
            .map(|r| r.encode(&self.key_codec, &self.value_codec))
            .collect::<ClientResult<Vec<_>>>()?;
        self.inner.send_batch(raw).await
    }

    /// Wait for outstanding deliveries.
    ///
    /// # Errors
    ///
    /// Returns the client's flush failure.
    pub async fn flush(&mut self) -> ClientResult<()> {
        self.inner.flush().await
    }

    /// The raw client.
    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.inner
    }

    pub(crate) fn into_inner(self) -> P {
        self.inner
    }
}

/// A consumer that decodes keys and values with codecs.
pub struct Consumer<C, KC, VC> {
    inner: C,
    key_codec: KC,
    value_codec: VC,
    poll_interval: Duration,
    env: CapabilityBundle,
}

impl<C, KC, VC> Consumer<C, KC, VC>
where
    C: ConsumerClient,
    KC: Codec,
    VC: Codec,
{
    pub fn new(
        inner: C,
        key_codec: KC,
        value_codec: VC,
        poll_interval: Duration,
        env: CapabilityBundle,
    ) -> Self {
        Self {
            inner,
            key_codec,
            value_codec,
            poll_interval,
            env,
        }
    }

    /// Subscribe to topics through the consumer group.
    ///
    /// # Errors
    ///
    /// Returns the client's subscription failure.
    pub async fn subscribe(&mut self, topics: &[&str]) -> ClientResult<()> {
        self.inner.subscribe(topics).await
    }

    /// Read only the given partitions.
    ///
    /// # Errors
    ///
    /// Returns the client's assignment failure.
    pub async fn assign(&mut self, partitions: &[PartitionKey]) -> ClientResult<()> {
        self.inner.assign(partitions).await
    }

    /// Poll once, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns client poll failures and codec failures.
    pub async fn poll(
        &mut self,
        timeout: Duration,
    ) -> ClientResult<PollResult<KC::Item, VC::Item>> {
        let raw = self.inner.poll(timeout).await?;
        raw.decode(&self.key_codec, &self.value_codec)
    }

    /// Poll once, waiting up to the configured poll interval.
    ///
    /// # Errors
    ///
    /// Returns client poll failures and codec failures.
    pub async fn poll_once(&mut self) -> ClientResult<PollResult<KC::Item, VC::Item>> {
        self.poll(self.poll_interval).await
    }

    /// Poll repeatedly until at least `min_records` have arrived or `timeout`
    /// has passed on the session clock.
    ///
    /// Returns the non-empty poll results in the order they were received.
    ///
    /// # Errors
    ///
    /// Stops at the first poll failure.
    pub async fn poll_until(
        &mut self,
        min_records: usize,
        timeout: Duration,
    ) -> ClientResult<Vec<PollResult<KC::Item, VC::Item>>> {
        let deadline = self.env.clock().now() + timeout;
        let mut polls = Vec::new();
        let mut received = 0;

        while received < min_records {
            let now = self.env.clock().now();
            if now >= deadline {
                break;
            }
            let wait = (deadline - now).min(self.poll_interval);
            let poll = self.poll(wait).await?;
            if !poll.is_empty() {
                received += poll.record_count();
                polls.push(poll);
            }
        }

        Ok(polls)
    }

    /// The raw client.
    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub(crate) fn into_inner(self) -> C {
        self.inner
    }
}
