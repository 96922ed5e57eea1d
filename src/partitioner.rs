//! Deterministic key -> partition mapping with replica placement.
//!
//! Pure and stateless: no locks, no shared mutable state. The hash is a
//! left-shift variant (same shape as Java's `String.hashCode`) chosen so
//! every process partitioning a given key agrees, which is load-bearing for
//! cross-process compatibility once the distributed queue is in play. It is
//! deliberately not a ring-based consistent hash: changing `partition_count`
//! invalidates every prior assignment, same as the source it mirrors.

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    partition_count: usize,
    replication_factor: usize,
}

impl Partitioner {
    pub fn new(partition_count: usize, replication_factor: usize) -> Result<Self> {
        if partition_count == 0 {
            return Err(CoreError::Configuration(
                "partition_count must be at least 1".into(),
            ));
        }
        if replication_factor == 0 || replication_factor > partition_count {
            return Err(CoreError::Configuration(format!(
                "replication_factor {replication_factor} must be in [1, {partition_count}]"
            )));
        }
        Ok(Self {
            partition_count,
            replication_factor,
        })
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// `h = ((h << 5) - h) + c` per byte, truncated to i32 at every step,
    /// then `abs() % P`. Empty key hashes to 0.
    pub fn partition(&self, key: &str) -> usize {
        let mut h: i32 = 0;
        for &c in key.as_bytes() {
            h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32);
        }
        (h.unsigned_abs() as usize) % self.partition_count
    }

    /// Ordered replica partitions for a primary, length `replication_factor - 1`,
    /// i.e. `(primary + i) mod P` for `i in [1, R)`. Empty when R == 1.
    pub fn replicas(&self, primary: usize) -> Vec<usize> {
        (1..self.replication_factor)
            .map(|i| (primary + i) % self.partition_count)
            .collect()
    }

    /// Primary plus replicas, in placement order.
    pub fn placement(&self, key: &str) -> Vec<usize> {
        let primary = self.partition(key);
        let mut out = Vec::with_capacity(self.replication_factor);
        out.push(primary);
        out.extend(self.replicas(primary));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_hashes_to_zero() {
        let p = Partitioner::new(8, 1).unwrap();
        assert_eq!(p.partition(""), 0);
    }

    #[test]
    fn partition_is_deterministic() {
        let p = Partitioner::new(8, 1).unwrap();
        let a = p.partition("image_001.jpg");
        let b = p.partition("image_001.jpg");
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn replicas_wrap_around() {
        let p = Partitioner::new(4, 3).unwrap();
        let primary = p.partition("k1");
        let replicas = p.replicas(primary);
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[0], (primary + 1) % 4);
        assert_eq!(replicas[1], (primary + 2) % 4);
    }

    #[test]
    fn replication_factor_one_has_no_replicas() {
        let p = Partitioner::new(8, 1).unwrap();
        assert!(p.replicas(p.partition("k")).is_empty());
    }

    #[test]
    fn replication_factor_over_partition_count_is_rejected() {
        assert!(Partitioner::new(4, 5).is_err());
    }

    #[test]
    fn zero_partitions_is_rejected() {
        assert!(Partitioner::new(0, 1).is_err());
    }
}
