//! Storage backends and the write/sweep manager

pub mod eviction;
pub mod filter;
pub mod in_memory;
pub mod lance;
pub mod manager;
pub mod sweep;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::tombstone::Tombstone;
use crate::memory::types::{MemoryRecord, RetentionClass};

pub use eviction::{EvictionPlan, EvictionStrategy, Evictor};
pub use filter::RecordFilter;
pub use in_memory::InMemoryStore;
pub use lance::LanceStore;
pub use manager::{CurationStats, EvictionReport, StorageManager};
pub use sweep::SweepScheduler;

/// A stored record with its cosine similarity to a query vector
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub record: MemoryRecord,
    pub similarity: f32,
}

/// Count and age range of the records under a category prefix
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub count: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub average_confidence: f32,
}

impl CategoryStats {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a MemoryRecord>,
    {
        let mut stats = CategoryStats {
            count: 0,
            oldest: None,
            newest: None,
            average_confidence: 0.0,
        };
        let mut confidence_sum = 0.0;
        for record in records {
            stats.count += 1;
            confidence_sum += record.confidence;
            stats.oldest = Some(stats.oldest.map_or(record.created_at, |o| o.min(record.created_at)));
            stats.newest = Some(stats.newest.map_or(record.created_at, |n| n.max(record.created_at)));
        }
        if stats.count > 0 {
            stats.average_confidence = confidence_sum / stats.count as f32;
        }
        stats
    }
}

/// Durable store consumed by the pipeline.
///
/// Every method is a single backend operation: `put` is an upsert,
/// `delete` removes the whole batch or nothing, and `touch` increments the
/// access counter inside the store so concurrent touches never lose
/// increments. `replace_content` never writes `access_count`, so a touch
/// racing an UPDATE survives it.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>>;

    /// Insert or replace the record with `record.id`
    async fn put(&self, record: &MemoryRecord) -> Result<()>;

    /// Rewrite the decided fields of the stored record with `record.id`
    /// (see [`MemoryRecord::apply_content`]); false if it no longer exists
    async fn replace_content(&self, record: &MemoryRecord) -> Result<bool>;

    /// Delete all `ids` atomically; returns how many existed
    async fn delete(&self, ids: &[Uuid]) -> Result<usize>;

    /// Top `k` records under `category_prefix` by cosine similarity to `vector`.
    /// Records stored without an embedding are not returned.
    async fn nearest(&self, vector: &[f32], category_prefix: &str, k: usize) -> Result<Vec<Neighbor>>;

    /// Records matching `filter`
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<MemoryRecord>>;

    async fn count(&self) -> Result<usize>;

    /// Increment `access_count` and refresh `last_accessed_at`; false if absent
    async fn touch(&self, id: Uuid) -> Result<bool>;

    async fn set_retention(&self, ids: &[Uuid], class: RetentionClass) -> Result<()>;

    async fn insert_tombstones(&self, tombstones: &[Tombstone]) -> Result<()>;

    async fn delete_tombstones(&self, original_ids: &[Uuid]) -> Result<()>;

    async fn list_tombstones(&self) -> Result<Vec<Tombstone>>;

    /// Store name for logging
    fn name(&self) -> &'static str;

    /// Records whose category lies under `category_prefix`
    async fn list_by_category(&self, category_prefix: &str) -> Result<Vec<MemoryRecord>> {
        self.list(&RecordFilter::new().with_category_prefix(category_prefix))
            .await
    }

    /// Count and age range under `category_prefix`
    async fn category_stats(&self, category_prefix: &str) -> Result<CategoryStats> {
        let records = self.list_by_category(category_prefix).await?;
        Ok(CategoryStats::from_records(&records))
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<MemoryRecord>> {
        let mut found = self
            .list(&RecordFilter::new().with_fingerprint(fingerprint))
            .await?;
        Ok(found.pop())
    }
}
