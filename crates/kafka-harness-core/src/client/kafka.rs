//! librdkafka-backed clients.
//!
//! Producers use `FutureProducer` so sends suspend instead of blocking.
//! Consumers use `BaseConsumer`, whose poll blocks; every poll, metadata probe
//! and close is dispatched onto the session's blocking executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::OwnedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::{debug, instrument};

use crate::env::CapabilityBundle;
use crate::error::{ClientError, ClientResult};
use crate::record::{Delivery, PartitionKey, ProducerRecord, RawPollResult, Record};
use crate::settings::{ConsumerSettings, ProducerSettings};

use super::{ClientFactory, ConsumerClient, ProducerClient};

/// Factory for librdkafka producers and consumers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RdKafkaClients;

/// A librdkafka producer bound to one scope.
pub struct RdKafkaProducer {
    producer: FutureProducer,
    request_timeout: Duration,
    env: CapabilityBundle,
}

/// A librdkafka consumer bound to one scope.
pub struct RdKafkaConsumer {
    consumer: Arc<BaseConsumer>,
    max_poll_records: usize,
    env: CapabilityBundle,
}

#[async_trait]
impl ClientFactory for RdKafkaClients {
    type Producer = RdKafkaProducer;
    type Consumer = RdKafkaConsumer;

    #[instrument(skip_all, fields(bootstrap = %env.bootstrap_servers()))]
    async fn acquire_producer(
        &self,
        settings: &ProducerSettings,
        env: &CapabilityBundle,
    ) -> ClientResult<RdKafkaProducer> {
        let producer: FutureProducer = settings.client_config().create()?;

        // Creation never touches the network; a metadata round trip does.
        let probe = producer.clone();
        let timeout = settings.request_timeout();
        env.run_blocking(move || probe.client().fetch_metadata(None, timeout).map(|_| ()))
            .await?
            .map_err(|e| connection_error(env, &e))?;

        debug!("producer connected");
        Ok(RdKafkaProducer {
            producer,
            request_timeout: timeout,
            env: env.clone(),
        })
    }

    async fn release_producer(&self, mut producer: RdKafkaProducer) -> ClientResult<()> {
        producer.flush().await
    }

    #[instrument(
        skip_all,
        fields(group_id = settings.group_id(), client_id = settings.client_id())
    )]
    async fn acquire_consumer(
        &self,
        settings: &ConsumerSettings,
        env: &CapabilityBundle,
    ) -> ClientResult<RdKafkaConsumer> {
        let consumer: BaseConsumer = settings.client_config().create()?;
        let consumer = Arc::new(consumer);

        let probe = Arc::clone(&consumer);
        let timeout = settings.poll_interval().max(Duration::from_secs(5));
        env.run_blocking(move || probe.fetch_metadata(None, timeout).map(|_| ()))
            .await?
            .map_err(|e| connection_error(env, &e))?;

        debug!("consumer connected");
        Ok(RdKafkaConsumer {
            consumer,
            max_poll_records: settings.max_poll_records(),
            env: env.clone(),
        })
    }

    async fn release_consumer(&self, consumer: RdKafkaConsumer) -> ClientResult<()> {
        let RdKafkaConsumer { consumer, env, .. } = consumer;
        // Dropping the last handle leaves the group, which blocks.
        env.run_blocking(move || {
            consumer.unsubscribe();
            drop(consumer);
        })
        .await
    }
}

#[async_trait]
impl ProducerClient for RdKafkaProducer {
    async fn send(&mut self, record: ProducerRecord<Bytes, Bytes>) -> ClientResult<Delivery> {
        let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&record.topic);
        if let Some(key) = record.key.as_deref() {
            future_record = future_record.key(key);
        }
        if let Some(value) = record.value.as_deref() {
            future_record = future_record.payload(value);
        }
        if let Some(partition) = record.partition {
            future_record = future_record.partition(partition);
        }

        match self
            .producer
            .send(future_record, Timeout::After(self.request_timeout))
            .await
        {
            Ok((partition, offset)) => Ok(Delivery {
                topic: record.topic.clone(),
                partition,
                offset,
            }),
            Err((err, _)) => Err(ClientError::Send {
                topic: record.topic.clone(),
                message: err.to_string(),
            }),
        }
    }

    async fn flush(&mut self) -> ClientResult<()> {
        let producer = self.producer.clone();
        let timeout = self.request_timeout;
        self.env
            .run_blocking(move || producer.flush(Timeout::After(timeout)))
            .await?
            .map_err(ClientError::from)
    }
}

#[async_trait]
impl ConsumerClient for RdKafkaConsumer {
    async fn subscribe(&mut self, topics: &[&str]) -> ClientResult<()> {
        self.consumer.subscribe(topics).map_err(ClientError::from)
    }

    async fn assign(&mut self, partitions: &[PartitionKey]) -> ClientResult<()> {
        let mut assignment = TopicPartitionList::new();
        for key in partitions {
            assignment.add_partition_offset(&key.topic, key.partition, Offset::Beginning)?;
        }
        self.consumer.assign(&assignment).map_err(ClientError::from)
    }

    async fn poll(&mut self, timeout: Duration) -> ClientResult<RawPollResult> {
        let consumer = Arc::clone(&self.consumer);
        let max_records = self.max_poll_records;
        let messages = self
            .env
            .run_blocking(move || drain(&consumer, timeout, max_records))
            .await??;

        let mut poll = RawPollResult::new();
        for message in messages {
            poll.push(to_record(&message));
        }
        Ok(poll)
    }
}

/// Wait up to `timeout` for the first message, then take whatever else is
/// already buffered.
fn drain(
    consumer: &BaseConsumer,
    timeout: Duration,
    max_records: usize,
) -> ClientResult<Vec<OwnedMessage>> {
    let mut messages = Vec::new();
    let mut wait = timeout;
    while messages.len() < max_records {
        match consumer.poll(wait) {
            Some(Ok(message)) => messages.push(message.detach()),
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
        wait = Duration::ZERO;
    }
    Ok(messages)
}

fn to_record(message: &OwnedMessage) -> Record<Bytes, Bytes> {
    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice),
        value: message.payload().map(Bytes::copy_from_slice),
        timestamp: message.timestamp().to_millis(),
    }
}

fn connection_error(env: &CapabilityBundle, err: &KafkaError) -> ClientError {
    ClientError::Connection {
        address: env.bootstrap_servers(),
        message: err.to_string(),
    }
}
