//! Partition-scoped mutual exclusion
//!
//! A fixed array of async mutex shards; a partition prefix always maps to
//! the same shard, so ingestions and sweep commits that touch the same
//! partition are serialised while unrelated partitions mostly proceed in
//! parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

pub struct PartitionLocks {
    shards: Box<[Mutex<()>]>,
}

impl PartitionLocks {
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(())).collect();
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_index(&self, partition: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        partition.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    pub async fn lock(&self, partition: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_index(partition)].lock().await
    }

    /// Lock every shard covering `partitions`, in ascending shard order so
    /// concurrent multi-partition lockers cannot deadlock.
    pub async fn lock_many<'a, I>(&self, partitions: I) -> Vec<MutexGuard<'_, ()>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut indices: Vec<usize> = partitions
            .into_iter()
            .map(|p| self.shard_index(p))
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let mut guards = Vec::with_capacity(indices.len());
        for index in indices {
            guards.push(self.shards[index].lock().await);
        }
        guards
    }
}

impl std::fmt::Debug for PartitionLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionLocks")
            .field("shards", &self.shards.len())
            .finish()
    }
}
