//! Flattening poll results into record lists.
//!
//! Records keep their order within a partition. Partitions appear in
//! whatever order the poll result yields them, so callers comparing across
//! partitions should sort or group first.

use crate::record::{PollResult, Record};

/// All records of one poll, partition batches concatenated.
pub fn flatten_one_poll<K, V>(poll: PollResult<K, V>) -> Vec<Record<K, V>> {
    let mut records = Vec::with_capacity(poll.record_count());
    for (_, batch) in poll {
        records.extend(batch);
    }
    records
}

/// All records of several polls, flattened in the order the polls are given.
pub fn flatten_many_polls<K, V, I>(polls: I) -> Vec<Record<K, V>>
where
    I: IntoIterator<Item = PollResult<K, V>>,
{
    polls.into_iter().flat_map(flatten_one_poll).collect()
}
