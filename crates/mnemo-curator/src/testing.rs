//! Test utilities - deterministic embedders and a fault-injecting store
//!
//! Used by unit and integration tests to exercise the pipeline without
//! loading the ONNX model or touching disk.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::embedding::{EMBEDDING_DIMENSION, Embedder};
use crate::error::{CuratorError, Result};
use crate::memory::tombstone::Tombstone;
use crate::memory::types::{MemoryRecord, RetentionClass};
use crate::storage::{InMemoryStore, MemoryStore, Neighbor, RecordFilter};
use crate::text::tokens;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Hashed bag-of-words embedder.
///
/// Each distinct token sets one bucket; the vector is L2-normalised, so the
/// cosine of two texts is the token overlap over the geometric mean of
/// their token counts (barring bucket collisions).
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(EMBEDDING_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let bucket = (fnv1a(&token) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder whose every call fails
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableEmbedder;

#[async_trait]
impl Embedder for UnavailableEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(CuratorError::Embedding("embedding service unavailable".to_string()))
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

/// [`MockEmbedder`] that sleeps before answering, for timeout tests
#[derive(Debug, Clone)]
pub struct SlowEmbedder {
    inner: MockEmbedder,
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockEmbedder::new(),
            delay,
        }
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// [`InMemoryStore`] that fails the first N `put`s and, optionally, every
/// `delete` with a storage fault.
///
/// Also records the retention class of every record it deletes, and can
/// return freshly marked eviction candidates to active before the sweep
/// commits them.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing_puts: AtomicUsize,
    put_attempts: AtomicUsize,
    fail_deletes: AtomicBool,
    release_on_mark: AtomicUsize,
    released: Mutex<Vec<Uuid>>,
    deleted: Mutex<Vec<(Uuid, RetentionClass)>>,
}

impl FlakyStore {
    pub fn new(failing_puts: usize) -> Self {
        Self {
            failing_puts: AtomicUsize::new(failing_puts),
            ..Self::default()
        }
    }

    pub fn failing_deletes(self) -> Self {
        self.fail_deletes.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Return the first `n` records marked as eviction candidates to
    /// active right after marking
    pub fn releasing_marked(self, n: usize) -> Self {
        self.release_on_mark.store(n, Ordering::SeqCst);
        self
    }

    /// Ids returned to active by [`FlakyStore::releasing_marked`]
    pub fn released(&self) -> Vec<Uuid> {
        self.released.lock().clone()
    }

    /// Every deleted id with its retention class at delete time
    pub fn deleted(&self) -> Vec<(Uuid, RetentionClass)> {
        self.deleted.lock().clone()
    }

    /// Every `put` call seen, failed or not
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

#[async_trait]
impl MemoryStore for FlakyStore {
    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        self.inner.get(id).await
    }

    async fn put(&self, record: &MemoryRecord) -> Result<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CuratorError::Storage("injected put failure".to_string()));
        }
        self.inner.put(record).await
    }

    async fn replace_content(&self, record: &MemoryRecord) -> Result<bool> {
        self.inner.replace_content(record).await
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<usize> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CuratorError::Storage("injected delete failure".to_string()));
        }
        let mut classes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.inner.get(*id).await? {
                classes.push((record.id, record.retention_class));
            }
        }
        let deleted = self.inner.delete(ids).await?;
        self.deleted.lock().extend(classes);
        Ok(deleted)
    }

    async fn nearest(&self, vector: &[f32], category_prefix: &str, k: usize) -> Result<Vec<Neighbor>> {
        self.inner.nearest(vector, category_prefix, k).await
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<MemoryRecord>> {
        self.inner.list(filter).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn touch(&self, id: Uuid) -> Result<bool> {
        self.inner.touch(id).await
    }

    async fn set_retention(&self, ids: &[Uuid], class: RetentionClass) -> Result<()> {
        self.inner.set_retention(ids, class).await?;
        if class != RetentionClass::EvictionCandidate {
            return Ok(());
        }
        let quota = self.release_on_mark.load(Ordering::SeqCst);
        let release: Vec<Uuid> = ids.iter().take(quota).copied().collect();
        if release.is_empty() {
            return Ok(());
        }
        self.release_on_mark.fetch_sub(release.len(), Ordering::SeqCst);
        self.inner.set_retention(&release, RetentionClass::Active).await?;
        self.released.lock().extend(release);
        Ok(())
    }

    async fn insert_tombstones(&self, tombstones: &[Tombstone]) -> Result<()> {
        self.inner.insert_tombstones(tombstones).await
    }

    async fn delete_tombstones(&self, original_ids: &[Uuid]) -> Result<()> {
        self.inner.delete_tombstones(original_ids).await
    }

    async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        self.inner.list_tombstones().await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::CategoryPath;
    use crate::text::cosine_similarity;

    #[test]
    fn mock_embedding_is_deterministic() {
        let model = MockEmbedder::new();
        assert_eq!(model.embed_sync("hello world"), model.embed_sync("hello world"));
    }

    #[test]
    fn mock_embedding_has_correct_dimensions() {
        assert_eq!(MockEmbedder::new().embed_sync("test").len(), 384);
        assert_eq!(MockEmbedder::with_dimension(8).embed_sync("test").len(), 8);
    }

    #[test]
    fn mock_embedding_tracks_token_overlap() {
        let model = MockEmbedder::new();
        let a = model.embed_sync("alpha beta gamma");
        let b = model.embed_sync("alpha beta gamma delta");
        let c = model.embed_sync("quantum cryptography lattice");
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn mock_embedding_of_empty_text_is_zero() {
        assert!(MockEmbedder::new().embed_sync("").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn unavailable_embedder_fails() {
        assert!(matches!(
            UnavailableEmbedder.embed("anything").await,
            Err(CuratorError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn flaky_store_fails_then_recovers() {
        let store = FlakyStore::new(2);
        let record = MemoryRecord::new("x".to_string(), Vec::new(), CategoryPath::uncategorized());
        assert!(store.put(&record).await.is_err());
        assert!(store.put(&record).await.is_err());
        assert!(store.put(&record).await.is_ok());
        assert_eq!(store.put_attempts(), 3);
        assert_eq!(store.count().await.unwrap(), 1);

        store.set_fail_deletes(true);
        assert!(store.delete(&[record.id]).await.unwrap_err().is_storage_fault());
        assert!(store.deleted().is_empty());
    }

    #[tokio::test]
    async fn flaky_store_releases_marked_records() {
        let store = FlakyStore::new(0).releasing_marked(1);
        let a = MemoryRecord::new("a".to_string(), Vec::new(), CategoryPath::uncategorized());
        let b = MemoryRecord::new("b".to_string(), Vec::new(), CategoryPath::uncategorized());
        store.put(&a).await.unwrap();
        store.put(&b).await.unwrap();

        store
            .set_retention(&[a.id, b.id], RetentionClass::EvictionCandidate)
            .await
            .unwrap();
        assert_eq!(store.released(), vec![a.id]);
        assert_eq!(store.get(a.id).await.unwrap().unwrap().retention_class, RetentionClass::Active);
        assert_eq!(
            store.get(b.id).await.unwrap().unwrap().retention_class,
            RetentionClass::EvictionCandidate
        );

        assert_eq!(store.delete(&[b.id]).await.unwrap(), 1);
        assert_eq!(store.deleted(), vec![(b.id, RetentionClass::EvictionCandidate)]);
    }
}
