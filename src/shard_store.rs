//! In-memory shard store: an HDFS-like placement simulation used by the
//! in-process dispatch path. One `RwLock`-guarded table per partition, so
//! a write to partition A never contends with a read of partition B.

use crate::error::{CoreError, Result};
use crate::partitioner::Partitioner;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-key record kept by a partition. `payload_snippet` mirrors the
/// source's practice of storing a short prefix rather than the full
/// payload, since the store only needs to prove placement, not hold data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub payload_snippet: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub primary_partition: usize,
    pub is_replica: bool,
}

#[derive(Default)]
struct Partition {
    entries: HashMap<String, Entry>,
    byte_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartitionStats {
    pub id: usize,
    pub item_count: usize,
    pub byte_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub partitions: Vec<PartitionStats>,
    pub total_items: usize,
    pub total_bytes: usize,
}

/// Cap on a single partition's byte size before `store` starts failing with
/// `PartitionFull`. Configurable so tests can exercise the failure path
/// without writing gigabytes.
const DEFAULT_PARTITION_CAP_BYTES: usize = 64 * 1024 * 1024;

pub struct ShardStore {
    partitioner: Partitioner,
    partitions: Vec<RwLock<Partition>>,
    partition_cap_bytes: usize,
}

impl ShardStore {
    pub fn new(partitioner: Partitioner) -> Self {
        Self::with_cap(partitioner, DEFAULT_PARTITION_CAP_BYTES)
    }

    pub fn with_cap(partitioner: Partitioner, partition_cap_bytes: usize) -> Self {
        let partitions = (0..partitioner.partition_count())
            .map(|_| RwLock::new(Partition::default()))
            .collect();
        Self {
            partitioner,
            partitions,
            partition_cap_bytes,
        }
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    /// Writes `value` into the primary partition for `key` and a copy into
    /// each replica partition. Atomic per-partition; not atomic across
    /// partitions, matching §4.2.
    pub fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let placement = self.partitioner.placement(key);
        let primary = placement[0];
        for (i, &partition_id) in placement.iter().enumerate() {
            let entry = Entry {
                key: key.to_string(),
                payload_snippet: value.iter().take(64).copied().collect(),
                timestamp: Utc::now(),
                primary_partition: primary,
                is_replica: i != 0,
            };
            self.write_entry(partition_id, entry, value.len())?;
        }
        Ok(())
    }

    fn write_entry(&self, partition_id: usize, entry: Entry, value_len: usize) -> Result<()> {
        let mut partition = self.partitions[partition_id].write();
        let replaced = partition.entries.get(&entry.key).map(|e| e.payload_snippet.len());
        let projected = partition.byte_size - replaced.unwrap_or(0) + value_len.min(64);
        if projected > self.partition_cap_bytes {
            return Err(CoreError::PartitionFull(partition_id));
        }
        partition.byte_size = projected;
        partition.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Reads from the primary partition only, per §4.2.
    pub fn retrieve(&self, key: &str) -> Result<Entry> {
        let primary = self.partitioner.partition(key);
        let partition = self.partitions[primary].read();
        partition
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(key.to_string()))
    }

    pub fn stats(&self) -> StoreStats {
        let mut partitions = Vec::with_capacity(self.partitions.len());
        let mut total_items = 0;
        let mut total_bytes = 0;
        for (id, p) in self.partitions.iter().enumerate() {
            let guard = p.read();
            total_items += guard.entries.len();
            total_bytes += guard.byte_size;
            partitions.push(PartitionStats {
                id,
                item_count: guard.entries.len(),
                byte_size: guard.byte_size,
            });
        }
        StoreStats {
            partitions,
            total_items,
            total_bytes,
        }
    }

    /// Resets one partition, or all partitions when `partition` is `None`.
    pub fn clear(&self, partition: Option<usize>) {
        match partition {
            Some(id) => {
                let mut guard = self.partitions[id].write();
                *guard = Partition::default();
            }
            None => {
                for p in &self.partitions {
                    let mut guard = p.write();
                    *guard = Partition::default();
                }
            }
        }
    }

    /// No-op hook: the partitioner never migrates data on rebalance (§1
    /// Non-goals), so this just returns the current snapshot.
    pub fn rebalance(&self) -> StoreStats {
        self.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(p: usize, r: usize) -> ShardStore {
        ShardStore::new(Partitioner::new(p, r).unwrap())
    }

    #[test]
    fn round_trip_store_and_retrieve() {
        let s = store(4, 2);
        s.store("k1", b"{\"a\":1}").unwrap();
        let entry = s.retrieve("k1").unwrap();
        assert_eq!(entry.key, "k1");

        let primary = s.partitioner().partition("k1");
        let replica = (primary + 1) % 4;
        let stats = s.stats();
        assert_eq!(stats.partitions[primary].item_count, 1);
        assert_eq!(stats.partitions[replica].item_count, 1);
    }

    #[test]
    fn retrieve_missing_key_is_not_found() {
        let s = store(4, 1);
        assert!(matches!(s.retrieve("missing"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn full_partition_rejects_store() {
        let s = ShardStore::with_cap(Partitioner::new(1, 1).unwrap(), 100);
        s.store("k1", &[0u8; 64]).unwrap();
        let err = s.store("k2", &[0u8; 64]);
        assert!(matches!(err, Err(CoreError::PartitionFull(_))));
    }

    #[test]
    fn clear_one_partition_leaves_others_intact() {
        let s = store(4, 1);
        s.store("k1", b"x").unwrap();
        let p0 = s.partitioner().partition("k1");
        s.clear(Some(p0));
        assert!(s.retrieve("k1").is_err());
    }

    #[test]
    fn rebalance_is_a_stats_snapshot() {
        let s = store(4, 1);
        s.store("k1", b"x").unwrap();
        assert_eq!(s.rebalance().total_items, s.stats().total_items);
    }
}
