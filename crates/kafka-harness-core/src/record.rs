//! Records, partition keys and poll results.

use std::collections::hash_map;
use std::collections::HashMap;

use bytes::Bytes;

use crate::codec::Codec;
use crate::error::ClientResult;

/// Identifies one partition of one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: i32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

/// Shorthand for [`PartitionKey::new`].
pub fn partition_key(topic: impl Into<String>, partition: i32) -> PartitionKey {
    PartitionKey::new(topic, partition)
}

/// A consumed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<K, V> {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<K>,
    pub value: Option<V>,
    /// Milliseconds since the epoch, when the broker reported one.
    pub timestamp: Option<i64>,
}

impl<K, V> Record<K, V> {
    /// Partition this record was read from.
    #[must_use]
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(self.topic.clone(), self.partition)
    }

    /// Decode key and value with the given codecs.
    ///
    /// # Errors
    ///
    /// Returns an error if either codec rejects its bytes.
    pub fn decode<KC, VC>(
        self,
        key_codec: &KC,
        value_codec: &VC,
    ) -> ClientResult<Record<KC::Item, VC::Item>>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
        KC: Codec,
        VC: Codec,
    {
        Ok(Record {
            key: self.key.map(|k| key_codec.decode(k.as_ref())).transpose()?,
            value: self
                .value
                .map(|v| value_codec.decode(v.as_ref()))
                .transpose()?,
            topic: self.topic,
            partition: self.partition,
            offset: self.offset,
            timestamp: self.timestamp,
        })
    }
}

/// A record to be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord<K, V> {
    pub topic: String,
    /// Target partition; the client's partitioner decides when unset.
    pub partition: Option<i32>,
    pub key: Option<K>,
    pub value: Option<V>,
}

impl<K, V> ProducerRecord<K, V> {
    /// Empty record for `topic`.
    pub fn to(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            value: None,
        }
    }

    #[must_use]
    pub fn key(mut self, key: K) -> Self {
        self.key = Some(key);
        self
    }

    #[must_use]
    pub fn value(mut self, value: V) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Encode key and value with the given codecs.
    ///
    /// # Errors
    ///
    /// Returns an error if either codec rejects its input.
    pub fn encode<KC, VC>(
        &self,
        key_codec: &KC,
        value_codec: &VC,
    ) -> ClientResult<ProducerRecord<Bytes, Bytes>>
    where
        KC: Codec<Item = K>,
        VC: Codec<Item = V>,
    {
        Ok(ProducerRecord {
            topic: self.topic.clone(),
            partition: self.partition,
            key: self.key.as_ref().map(|k| key_codec.encode(k)).transpose()?,
            value: self
                .value
                .as_ref()
                .map(|v| value_codec.encode(v))
                .transpose()?,
        })
    }
}

/// Broker acknowledgement for one produced record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Records returned by one poll, batched per partition.
///
/// Iteration order across partitions is unspecified; order within a batch is
/// the order the broker returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult<K, V> {
    batches: HashMap<PartitionKey, Vec<Record<K, V>>>,
}

impl<K, V> Default for PollResult<K, V> {
    fn default() -> Self {
        Self {
            batches: HashMap::new(),
        }
    }
}

impl<K, V> PollResult<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `record` to its partition's batch.
    pub fn push(&mut self, record: Record<K, V>) {
        self.batches
            .entry(record.partition_key())
            .or_default()
            .push(record);
    }

    /// Replace the batch of one partition.
    pub fn insert(&mut self, partition: PartitionKey, records: Vec<Record<K, V>>) {
        self.batches.insert(partition, records);
    }

    /// Batch for one partition, if present.
    #[must_use]
    pub fn records(&self, partition: &PartitionKey) -> Option<&[Record<K, V>]> {
        self.batches.get(partition).map(Vec::as_slice)
    }

    /// Partitions present in this result.
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionKey> {
        self.batches.keys()
    }

    /// Iterate over `(partition, batch)` pairs.
    pub fn iter(&self) -> hash_map::Iter<'_, PartitionKey, Vec<Record<K, V>>> {
        self.batches.iter()
    }

    /// Total number of records across all partitions.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    /// Whether no partition returned any record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Decode every record with the given codecs.
    ///
    /// # Errors
    ///
    /// Returns the first codec failure.
    pub fn decode<KC, VC>(
        self,
        key_codec: &KC,
        value_codec: &VC,
    ) -> ClientResult<PollResult<KC::Item, VC::Item>>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
        KC: Codec,
        VC: Codec,
    {
        let mut decoded = PollResult::new();
        for (partition, records) in self.batches {
            let records = records
                .into_iter()
                .map(|r| r.decode(key_codec, value_codec))
                .collect::<ClientResult<Vec<_>>>()?;
            decoded.insert(partition, records);
        }
        Ok(decoded)
    }
}

impl<K, V> IntoIterator for PollResult<K, V> {
    type Item = (PartitionKey, Vec<Record<K, V>>);
    type IntoIter = hash_map::IntoIter<PartitionKey, Vec<Record<K, V>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}

impl<K, V> FromIterator<(PartitionKey, Vec<Record<K, V>>)> for PollResult<K, V> {
    fn from_iter<I: IntoIterator<Item = (PartitionKey, Vec<Record<K, V>>)>>(iter: I) -> Self {
        Self {
            batches: iter.into_iter().collect(),
        }
    }
}

/// Raw poll result as returned by client implementations.
pub type RawPollResult = PollResult<Bytes, Bytes>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TextCodec;

    fn raw(
        topic: &str,
        partition: i32,
        offset: i64,
        key: &str,
        value: &str,
    ) -> Record<Bytes, Bytes> {
        Record {
            topic: topic.to_string(),
            partition,
            offset,
            key: Some(Bytes::copy_from_slice(key.as_bytes())),
            value: Some(Bytes::copy_from_slice(value.as_bytes())),
            timestamp: None,
        }
    }

    #[test]
    fn test_push_groups_by_partition() {
        let mut poll = RawPollResult::new();
        poll.push(raw("t", 0, 0, "a", "1"));
        poll.push(raw("t", 1, 0, "b", "2"));
        poll.push(raw("t", 0, 1, "c", "3"));

        assert_eq!(poll.record_count(), 3);
        let batch = poll.records(&partition_key("t", 0)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].offset, 0);
        assert_eq!(batch[1].offset, 1);
        assert!(poll.records(&partition_key("t", 2)).is_none());
    }

    #[test]
    fn test_decode_text() {
        let mut poll = RawPollResult::new();
        poll.push(raw("t", 0, 7, "k", "m"));

        let decoded = poll.decode(&TextCodec, &TextCodec).unwrap();
        let record = &decoded.records(&partition_key("t", 0)).unwrap()[0];
        assert_eq!(record.key.as_deref(), Some("k"));
        assert_eq!(record.value.as_deref(), Some("m"));
        assert_eq!(record.offset, 7);
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut poll = RawPollResult::new();
        poll.push(Record {
            value: Some(Bytes::from_static(&[0xff, 0xfe])),
            ..raw("t", 0, 0, "k", "")
        });
        assert!(poll.decode(&TextCodec, &TextCodec).is_err());
    }

    #[test]
    fn test_empty_batches_count_as_empty() {
        let mut poll = RawPollResult::new();
        poll.insert(partition_key("t", 0), Vec::new());
        assert!(poll.is_empty());
        assert_eq!(poll.partitions().count(), 1);
    }

    #[test]
    fn test_producer_record_builder() {
        let record = ProducerRecord::<String, String>::to("t")
            .key("k".to_string())
            .value("v".to_string())
            .partition(3);
        let encoded = record.encode(&TextCodec, &TextCodec).unwrap();
        assert_eq!(encoded.partition, Some(3));
        assert_eq!(encoded.key.as_deref(), Some(&b"k"[..]));
        assert_eq!(encoded.value.as_deref(), Some(&b"v"[..]));
    }
}
