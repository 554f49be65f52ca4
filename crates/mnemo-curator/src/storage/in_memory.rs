//! Process-local store backed by a concurrent map

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::tombstone::Tombstone;
use crate::memory::types::{MemoryRecord, RetentionClass};
use crate::storage::{MemoryStore, Neighbor, RecordFilter};
use crate::text::cosine_similarity;

/// In-memory [`MemoryStore`] used for tests and the `memory` backend.
///
/// Batch deletes hold the tombstone write lock while removing, so a
/// concurrent reader never sees a tombstone without its purge or half a
/// batch gone.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<Uuid, MemoryRecord>,
    tombstones: RwLock<Vec<Tombstone>>,
    batch: RwLock<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        let _read = self.batch.read();
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn put(&self, record: &MemoryRecord) -> Result<()> {
        let _read = self.batch.read();
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn replace_content(&self, record: &MemoryRecord) -> Result<bool> {
        let _read = self.batch.read();
        match self.records.get_mut(&record.id) {
            Some(mut entry) => {
                entry.apply_content(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<usize> {
        let _write = self.batch.write();
        Ok(ids
            .iter()
            .filter(|id| self.records.remove(id).is_some())
            .count())
    }

    async fn nearest(&self, vector: &[f32], category_prefix: &str, k: usize) -> Result<Vec<Neighbor>> {
        let _read = self.batch.read();
        let filter = RecordFilter::new()
            .with_category_prefix(category_prefix)
            .embedded_only();

        let mut neighbors: Vec<Neighbor> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| Neighbor {
                similarity: cosine_similarity(vector, &entry.value().embedding),
                record: entry.value().clone(),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<MemoryRecord>> {
        let _read = self.batch.read();
        let mut records: Vec<MemoryRecord> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    async fn touch(&self, id: Uuid) -> Result<bool> {
        let _read = self.batch.read();
        match self.records.get_mut(&id) {
            Some(mut entry) => {
                entry.access_count = entry.access_count.saturating_add(1);
                entry.last_accessed_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_retention(&self, ids: &[Uuid], class: RetentionClass) -> Result<()> {
        let _read = self.batch.read();
        for id in ids {
            if let Some(mut entry) = self.records.get_mut(id) {
                entry.retention_class = class;
            }
        }
        Ok(())
    }

    async fn insert_tombstones(&self, tombstones: &[Tombstone]) -> Result<()> {
        self.tombstones.write().extend_from_slice(tombstones);
        Ok(())
    }

    async fn delete_tombstones(&self, original_ids: &[Uuid]) -> Result<()> {
        self.tombstones
            .write()
            .retain(|t| !original_ids.contains(&t.original_id));
        Ok(())
    }

    async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        Ok(self.tombstones.read().clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
