//! Write path and eviction sweeps over a [`MemoryStore`]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{StorageConfig, SweepConfig};
use crate::dedup::lock::PartitionLocks;
use crate::error::{CuratorError, Result};
use crate::memory::tombstone::Tombstone;
use crate::memory::types::{DedupAction, MemoryRecord, RetentionClass};
use crate::storage::eviction::{EvictionStrategy, Evictor, PlannedEviction};
use crate::storage::{CategoryStats, MemoryStore, RecordFilter};

/// Per-scope counts of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub before: usize,
    pub purged: usize,
    pub remaining: usize,
}

/// What a sweep did
#[derive(Debug, Clone, Serialize)]
pub struct EvictionReport {
    pub purged_ids: Vec<Uuid>,
    /// Records the plan selected as eviction candidates
    pub candidates_considered: usize,
    /// Candidates returned to active during this sweep
    pub released: usize,
    pub per_category_counts: BTreeMap<String, CategoryCounts>,
    /// Batches whose commit failed and were rolled back
    pub aborted_batches: usize,
    pub deadline_hit: bool,
    pub cancelled: bool,
    pub strategy: EvictionStrategy,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EvictionReport {
    fn new(strategy: EvictionStrategy, started_at: DateTime<Utc>) -> Self {
        Self {
            purged_ids: Vec::new(),
            candidates_considered: 0,
            released: 0,
            per_category_counts: BTreeMap::new(),
            aborted_batches: 0,
            deadline_hit: false,
            cancelled: false,
            strategy,
            started_at,
            finished_at: started_at,
        }
    }
}

/// Stored records of one category partition
#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    #[serde(flatten)]
    pub stats: CategoryStats,
    pub eviction_candidates: usize,
}

/// Snapshot returned by `stats()`
#[derive(Debug, Clone, Serialize)]
pub struct CurationStats {
    pub store: &'static str,
    pub total_records: usize,
    pub categories: BTreeMap<String, CategorySummary>,
    pub tombstones: usize,
    pub last_sweep: Option<DateTime<Utc>>,
    pub scoring_version: u64,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    purged: Vec<(Uuid, String)>,
    rejected: Vec<Uuid>,
}

/// Applies dedup decisions to the store and runs eviction sweeps.
pub struct StorageManager {
    store: Arc<dyn MemoryStore>,
    locks: Arc<PartitionLocks>,
    evictor: Evictor,
    config: StorageConfig,
    sweep: SweepConfig,
    last_sweep: parking_lot::Mutex<Option<DateTime<Utc>>>,
    sweep_running: tokio::sync::Mutex<()>,
}

impl StorageManager {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        locks: Arc<PartitionLocks>,
        evictor: Evictor,
        config: StorageConfig,
        sweep: SweepConfig,
    ) -> Self {
        Self {
            store,
            locks,
            evictor,
            config,
            sweep,
            last_sweep: parking_lot::Mutex::new(None),
            sweep_running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<PartitionLocks> {
        &self.locks
    }

    pub fn evictor(&self) -> &Evictor {
        &self.evictor
    }

    pub fn last_sweep(&self) -> Option<DateTime<Utc>> {
        *self.last_sweep.lock()
    }

    /// Apply a dedup decision. Returns the id of the stored record.
    ///
    /// An ADD whose fingerprint already exists is a no-op returning the
    /// existing id; a SKIP bumps the target's access counter. UPDATE and
    /// MERGE rewrite only the decided fields, leaving the access counter to
    /// concurrent touches.
    pub async fn write(
        &self,
        record: &MemoryRecord,
        action: DedupAction,
        target_id: Option<Uuid>,
    ) -> Result<Uuid> {
        match action {
            DedupAction::Add => {
                let existing = self
                    .with_retry("find_by_fingerprint", || {
                        self.store.find_by_fingerprint(&record.fingerprint)
                    })
                    .await?;
                if let Some(existing) = existing {
                    debug!(
                        memory_id = %existing.id,
                        fingerprint = %record.fingerprint,
                        "Fingerprint already stored, ADD is a no-op"
                    );
                    return Ok(existing.id);
                }
                self.with_retry("put", || self.store.put(record)).await?;
                Ok(record.id)
            }
            DedupAction::Update | DedupAction::Merge => {
                if let Some(target) = target_id {
                    if target != record.id {
                        return Err(CuratorError::Validation(format!(
                            "{action} target {target} does not match record {}",
                            record.id
                        )));
                    }
                }
                let found = self
                    .with_retry("replace_content", || self.store.replace_content(record))
                    .await?;
                if !found {
                    return Err(CuratorError::Storage(format!(
                        "{action} target {} no longer exists",
                        record.id
                    )));
                }
                Ok(record.id)
            }
            DedupAction::Skip => {
                let target = target_id.ok_or_else(|| {
                    CuratorError::Validation("SKIP requires a target id".to_string())
                })?;
                let found = self.with_retry("touch", || self.store.touch(target)).await?;
                if !found {
                    return Err(CuratorError::Storage(format!(
                        "SKIP target {target} no longer exists"
                    )));
                }
                Ok(target)
            }
        }
    }

    /// Run a store operation, retrying storage faults with exponential backoff
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.write_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_storage_fault() && attempt < attempts => {
                    let backoff = self.config.retry_base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
                    warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff,
                        error = %e,
                        "Store operation failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) if e.is_storage_fault() => {
                    return Err(CuratorError::Storage(format!(
                        "{operation} failed after {attempt} attempts: {e}"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record a retrieval access. A pending eviction candidate that the
    /// access lifts above a protection threshold is returned to active.
    pub async fn touch(&self, id: Uuid) -> Result<bool> {
        if !self.store.touch(id).await? {
            return Ok(false);
        }
        self.rescue(id).await?;
        Ok(true)
    }

    /// Return an eviction candidate to active if it is now protected.
    ///
    /// Takes the record's partition lock, so callers must not hold it.
    pub async fn rescue(&self, id: Uuid) -> Result<bool> {
        let Some(record) = self.store.get(id).await? else {
            return Ok(false);
        };
        if record.retention_class != RetentionClass::EvictionCandidate {
            return Ok(false);
        }

        let _guard = self.locks.lock(&record.category_path.partition()).await;
        let Some(current) = self.store.get(id).await? else {
            return Ok(false);
        };
        let policy = self.evictor.retention().policy_for(&current.category_path);
        if current.retention_class == RetentionClass::EvictionCandidate
            && self.evictor.is_protected(&current, &policy)
        {
            self.store.set_retention(&[id], RetentionClass::Active).await?;
            debug!(memory_id = %id, "Access rescued eviction candidate");
            return Ok(true);
        }
        Ok(false)
    }

    /// True when any retention scope is above the utilisation trigger
    pub async fn needs_sweep(&self) -> Result<bool> {
        let records = self.store.list(&RecordFilter::new()).await?;
        let retention = self.evictor.retention();

        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for record in &records {
            let policy = retention.policy_for(&record.category_path);
            let entry = counts
                .entry(retention.scope_for(&record.category_path))
                .or_insert((0, policy.max_records));
            entry.0 += 1;
        }

        Ok(counts.values().any(|&(count, max_records)| {
            count as f32 >= self.sweep.utilization_trigger * max_records as f32
        }))
    }

    /// Evaluate retention policies and purge qualifying records.
    ///
    /// Candidates are marked first, then purged in batches; each batch takes
    /// the partition locks, re-reads every record and commits a single
    /// delete, so a batch either lands whole or not at all.
    pub async fn sweep(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<EvictionReport> {
        let _running = self.sweep_running.lock().await;
        let started = Instant::now();
        let deadline = Duration::from_secs(self.sweep.deadline_secs);
        let mut report = EvictionReport::new(self.evictor.strategy(), Utc::now());

        let records = self.store.list(&RecordFilter::new()).await?;
        let plan = self.evictor.plan(&records, now);
        report.candidates_considered = plan.candidates.len();
        for (scope, count) in &plan.scope_counts {
            report.per_category_counts.insert(
                scope.clone(),
                CategoryCounts {
                    before: *count,
                    purged: 0,
                    remaining: *count,
                },
            );
        }

        info!(
            store = self.store.name(),
            records = records.len(),
            candidates = plan.candidates.len(),
            strategy = self.evictor.strategy().as_str(),
            "Starting eviction sweep"
        );

        if !plan.released.is_empty() {
            self.store
                .set_retention(&plan.released, RetentionClass::Active)
                .await?;
            report.released += plan.released.len();
        }
        let marked: Vec<Uuid> = plan.candidates.iter().map(|p| p.id).collect();
        if !marked.is_empty() {
            self.store
                .set_retention(&marked, RetentionClass::EvictionCandidate)
                .await?;
        }

        for batch in plan.candidates.chunks(self.sweep.batch_size.max(1)) {
            if cancel.is_cancelled() {
                info!("Sweep cancelled, stopping before next batch");
                report.cancelled = true;
                break;
            }
            if started.elapsed() >= deadline {
                warn!(
                    deadline_secs = self.sweep.deadline_secs,
                    "Sweep deadline reached, remaining batches deferred"
                );
                report.deadline_hit = true;
                break;
            }

            match self.commit_batch(batch, now).await {
                Ok(outcome) => {
                    if !outcome.rejected.is_empty() {
                        self.store
                            .set_retention(&outcome.rejected, RetentionClass::Active)
                            .await?;
                        report.released += outcome.rejected.len();
                    }
                    for (id, scope) in outcome.purged {
                        if let Some(counts) = report.per_category_counts.get_mut(&scope) {
                            counts.purged += 1;
                            counts.remaining = counts.remaining.saturating_sub(1);
                        }
                        report.purged_ids.push(id);
                    }
                }
                Err(e) => {
                    error!(
                        batch_size = batch.len(),
                        error = %e,
                        "Purge batch aborted; candidates kept for the next sweep"
                    );
                    report.aborted_batches += 1;
                }
            }
        }

        report.finished_at = Utc::now();
        *self.last_sweep.lock() = Some(report.finished_at);
        info!(
            purged = report.purged_ids.len(),
            released = report.released,
            aborted_batches = report.aborted_batches,
            deadline_hit = report.deadline_hit,
            cancelled = report.cancelled,
            "Eviction sweep finished"
        );
        Ok(report)
    }

    async fn commit_batch(&self, batch: &[PlannedEviction], now: DateTime<Utc>) -> Result<BatchOutcome> {
        let _guards = self
            .locks
            .lock_many(batch.iter().map(|p| p.partition.as_str()))
            .await;

        let retention = self.evictor.retention();
        let mut outcome = BatchOutcome::default();
        let mut scope_counts: HashMap<String, usize> = HashMap::new();
        let mut tombstones = Vec::new();

        for planned in batch {
            let Some(record) = self.store.get(planned.id).await? else {
                continue;
            };
            if record.retention_class != RetentionClass::EvictionCandidate {
                debug!(memory_id = %record.id, "Candidate refreshed since marking");
                continue;
            }

            let count = match scope_counts.get(&planned.scope) {
                Some(count) => *count,
                None => {
                    let count = self
                        .store
                        .list_by_category(&planned.scope)
                        .await?
                        .iter()
                        .filter(|r| retention.scope_for(&r.category_path) == planned.scope)
                        .count();
                    scope_counts.insert(planned.scope.clone(), count);
                    count
                }
            };

            match self.evictor.qualifies(&record, count, now) {
                Some(reason) => {
                    tombstones.push(Tombstone::new(
                        record.id,
                        record.category_path.clone(),
                        record.created_at,
                        record.confidence,
                        reason,
                        self.evictor.strategy().as_str(),
                    ));
                    scope_counts.insert(planned.scope.clone(), count.saturating_sub(1));
                    outcome.purged.push((record.id, planned.scope.clone()));
                }
                None => outcome.rejected.push(record.id),
            }
        }

        if outcome.purged.is_empty() {
            return Ok(outcome);
        }

        let ids: Vec<Uuid> = outcome.purged.iter().map(|(id, _)| *id).collect();
        self.store.insert_tombstones(&tombstones).await?;
        if let Err(e) = self.store.delete(&ids).await {
            if let Err(rollback) = self.store.delete_tombstones(&ids).await {
                warn!(error = %rollback, "Failed to roll back tombstones of aborted batch");
            }
            return Err(e);
        }
        Ok(outcome)
    }

    /// Per-partition counts and the last sweep time
    pub async fn stats(&self) -> Result<CurationStats> {
        let records = self.store.list(&RecordFilter::new()).await?;
        let tombstones = self.store.list_tombstones().await?.len();

        let mut partitions: BTreeMap<String, Vec<&MemoryRecord>> = BTreeMap::new();
        for record in &records {
            partitions
                .entry(record.category_path.partition())
                .or_default()
                .push(record);
        }

        let categories = partitions
            .into_iter()
            .map(|(partition, members)| {
                let eviction_candidates = members
                    .iter()
                    .filter(|r| r.retention_class == RetentionClass::EvictionCandidate)
                    .count();
                let summary = CategorySummary {
                    stats: CategoryStats::from_records(members),
                    eviction_candidates,
                };
                (partition, summary)
            })
            .collect();

        Ok(CurationStats {
            store: self.store.name(),
            total_records: records.len(),
            categories,
            tombstones,
            last_sweep: self.last_sweep(),
            scoring_version: 0,
        })
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("store", &self.store.name())
            .field("strategy", &self.evictor.strategy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetentionConfig, RetentionPolicy};
    use crate::memory::types::CategoryPath;
    use crate::scoring::context::ContextTable;
    use crate::storage::InMemoryStore;
    use chrono::Duration as ChronoDuration;
    use std::str::FromStr;

    fn manager_with(store: Arc<dyn MemoryStore>, retention: RetentionConfig) -> StorageManager {
        let sweep = SweepConfig::default();
        let evictor = Evictor::new(&sweep, &retention, ContextTable::default());
        let config = StorageConfig {
            retry_base_ms: 1,
            ..StorageConfig::default()
        };
        StorageManager::new(store, Arc::new(PartitionLocks::new(8)), evictor, config, sweep)
    }

    fn retention(min_count: usize) -> RetentionConfig {
        RetentionConfig {
            default: RetentionPolicy {
                min_count,
                max_age_days: 30,
                ..RetentionPolicy::default()
            },
            ..RetentionConfig::default()
        }
    }

    fn old_record(category: &str, days: i64) -> MemoryRecord {
        let mut r = MemoryRecord::new(
            format!("old note {days}"),
            Vec::new(),
            CategoryPath::from_str(category).unwrap(),
        );
        r.created_at = Utc::now() - ChronoDuration::days(days);
        r.last_accessed_at = r.created_at;
        r.confidence = 0.3;
        r.fingerprint = format!("fp-{}", r.id);
        r
    }

    mod write {
        use super::*;

        #[tokio::test]
        async fn test_add_is_idempotent_on_fingerprint() {
            let store = Arc::new(InMemoryStore::new());
            let manager = manager_with(store.clone(), RetentionConfig::default());

            let first = old_record("knowledge/concept", 0);
            let mut second = old_record("knowledge/concept", 0);
            second.fingerprint = first.fingerprint.clone();

            let a = manager.write(&first, DedupAction::Add, None).await.unwrap();
            let b = manager.write(&second, DedupAction::Add, None).await.unwrap();
            assert_eq!(a, b);
            assert_eq!(store.count().await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_skip_touches_target() {
            let store = Arc::new(InMemoryStore::new());
            let manager = manager_with(store.clone(), RetentionConfig::default());
            let r = old_record("knowledge/concept", 0);
            manager.write(&r, DedupAction::Add, None).await.unwrap();

            let id = manager
                .write(&r, DedupAction::Skip, Some(r.id))
                .await
                .unwrap();
            assert_eq!(id, r.id);
            assert_eq!(store.get(r.id).await.unwrap().unwrap().access_count, 1);

            let missing = manager.write(&r, DedupAction::Skip, None).await;
            assert!(matches!(missing, Err(CuratorError::Validation(_))));
        }

        #[tokio::test]
        async fn test_update_rejects_mismatched_target() {
            let store = Arc::new(InMemoryStore::new());
            let manager = manager_with(store, RetentionConfig::default());
            let r = old_record("knowledge/concept", 0);
            let result = manager
                .write(&r, DedupAction::Update, Some(Uuid::new_v4()))
                .await;
            assert!(result.is_err());

            let vanished = manager.write(&r, DedupAction::Merge, Some(r.id)).await;
            assert!(vanished.unwrap_err().is_storage_fault());
        }

        #[tokio::test]
        async fn test_update_keeps_access_count() {
            let store = Arc::new(InMemoryStore::new());
            let manager = manager_with(store.clone(), RetentionConfig::default());
            let r = old_record("knowledge/concept", 0);
            manager.write(&r, DedupAction::Add, None).await.unwrap();
            manager.touch(r.id).await.unwrap();

            let mut decided = r.clone();
            decided.content = "old note, restated".to_string();
            manager
                .write(&decided, DedupAction::Update, Some(r.id))
                .await
                .unwrap();

            let stored = store.get(r.id).await.unwrap().unwrap();
            assert_eq!(stored.content, "old note, restated");
            assert_eq!(stored.access_count, 1);
        }
    }

    mod sweep {
        use super::*;

        #[tokio::test]
        async fn test_sweep_respects_min_count() {
            let store = Arc::new(InMemoryStore::new());
            let manager = manager_with(store.clone(), retention(3));
            for days in 40..45 {
                store.put(&old_record("development/testing", days)).await.unwrap();
            }

            let report = manager
                .sweep(Utc::now(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(report.purged_ids.len(), 2);
            assert_eq!(store.count().await.unwrap(), 3);
            assert_eq!(store.list_tombstones().await.unwrap().len(), 2);

            let counts = report.per_category_counts["development/testing"];
            assert_eq!(counts.before, 5);
            assert_eq!(counts.remaining, 3);
            assert!(manager.last_sweep().is_some());
        }

        #[tokio::test]
        async fn test_cancelled_sweep_purges_nothing() {
            let store = Arc::new(InMemoryStore::new());
            let manager = manager_with(store.clone(), retention(0));
            let r = old_record("development/testing", 60);
            store.put(&r).await.unwrap();

            let cancel = CancellationToken::new();
            cancel.cancel();
            let report = manager.sweep(Utc::now(), &cancel).await.unwrap();
            assert!(report.cancelled);
            assert!(report.purged_ids.is_empty());

            // The mark survives for the next sweep
            let stored = store.get(r.id).await.unwrap().unwrap();
            assert_eq!(stored.retention_class, RetentionClass::EvictionCandidate);
        }

        #[tokio::test]
        async fn test_touch_rescues_candidate() {
            let store = Arc::new(InMemoryStore::new());
            let manager = manager_with(store.clone(), retention(0));
            let mut r = old_record("development/testing", 60);
            r.access_count = 9;
            r.retention_class = RetentionClass::EvictionCandidate;
            store.put(&r).await.unwrap();

            assert!(manager.touch(r.id).await.unwrap());
            let stored = store.get(r.id).await.unwrap().unwrap();
            assert_eq!(stored.access_count, 10);
            assert_eq!(stored.retention_class, RetentionClass::Active);

            let report = manager
                .sweep(Utc::now(), &CancellationToken::new())
                .await
                .unwrap();
            assert!(report.purged_ids.is_empty());
        }

        #[tokio::test]
        async fn test_needs_sweep_on_utilisation() {
            let store = Arc::new(InMemoryStore::new());
            let config = RetentionConfig {
                default: RetentionPolicy {
                    max_records: 2,
                    ..RetentionPolicy::default()
                },
                ..RetentionConfig::default()
            };
            let manager = manager_with(store.clone(), config);
            store.put(&old_record("knowledge/concept", 1)).await.unwrap();
            assert!(!manager.needs_sweep().await.unwrap());
            store.put(&old_record("knowledge/concept", 1)).await.unwrap();
            assert!(manager.needs_sweep().await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_stats_by_partition() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager_with(store.clone(), RetentionConfig::default());
        store.put(&old_record("development/testing/rust", 1)).await.unwrap();
        store.put(&old_record("development/testing", 2)).await.unwrap();
        store.put(&old_record("operations/deployment", 3)).await.unwrap();

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.categories["development/testing"].stats.count, 2);
        assert_eq!(stats.categories["operations/deployment"].stats.count, 1);
        assert!(stats.last_sweep.is_none());
        assert_eq!(stats.store, "memory");
    }
}
