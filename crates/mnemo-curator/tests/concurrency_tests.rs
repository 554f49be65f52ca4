//! Concurrent ingestion and access against one shared pipeline

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mnemo_curator::config::Config;
use mnemo_curator::error::Result;
use mnemo_curator::memory::{
    Candidate, ContextProfile, DedupAction, MemoryRecord, RetentionClass, Tombstone,
};
use mnemo_curator::storage::{InMemoryStore, MemoryStore, Neighbor, RecordFilter};
use mnemo_curator::testing::MockEmbedder;
use mnemo_curator::CurationPipeline;
use uuid::Uuid;

/// Test fixture: shared pipeline over a fresh in-memory store
fn shared_pipeline() -> (Arc<CurationPipeline>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = CurationPipeline::new(
        Config::default(),
        store.clone(),
        Some(Arc::new(MockEmbedder::new())),
    )
    .unwrap();
    (Arc::new(pipeline), store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_store_one_record() {
    let (pipeline, store) = shared_pipeline();
    let content = "Prefer tokio::sync::Mutex when the guard is held across an await point";

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .ingest(Candidate::new(content, ContextProfile::AutonomousCoding))
                    .await
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    let adds = outcomes.iter().filter(|o| o.action == DedupAction::Add).count();
    let skips = outcomes.iter().filter(|o| o.action == DedupAction::Skip).count();
    assert_eq!(adds, 1);
    assert_eq!(skips, 7);
    assert!(outcomes.iter().all(|o| o.memory_id == outcomes[0].memory_id));

    assert_eq!(store.count().await.unwrap(), 1);
    let record = store.get(outcomes[0].memory_id).await.unwrap().unwrap();
    assert_eq!(record.access_count, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_partitions_ingest_in_parallel() {
    let (pipeline, store) = shared_pipeline();
    let contents = [
        "Use async/await for I/O-bound tasks",
        "Deploy the service with a docker image and roll back via helm",
        "A monad is a monoid in the category of endofunctors",
        "Segfault in the allocator when the arena is freed twice",
    ];

    let handles: Vec<_> = contents
        .iter()
        .map(|&content| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .ingest(Candidate::new(content, ContextProfile::AutonomousCoding))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.action, DedupAction::Add);
    }
    assert_eq!(store.count().await.unwrap(), contents.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_touches_are_all_counted() {
    let (pipeline, store) = shared_pipeline();
    let outcome = pipeline
        .ingest(Candidate::new(
            "Pin the toolchain in rust-toolchain.toml",
            ContextProfile::AutonomousCoding,
        ))
        .await
        .unwrap();

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let pipeline = pipeline.clone();
            let id = outcome.memory_id;
            tokio::spawn(async move { pipeline.touch(id).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    let record = store.get(outcome.memory_id).await.unwrap().unwrap();
    assert_eq!(record.access_count, 50);
}

/// Test fixture: in-memory store whose content rewrites stall, leaving a
/// window for touches to land mid-UPDATE
#[derive(Debug, Default)]
struct StallingStore {
    inner: InMemoryStore,
    stall: Duration,
}

#[async_trait]
impl MemoryStore for StallingStore {
    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        self.inner.get(id).await
    }

    async fn put(&self, record: &MemoryRecord) -> Result<()> {
        self.inner.put(record).await
    }

    async fn replace_content(&self, record: &MemoryRecord) -> Result<bool> {
        tokio::time::sleep(self.stall).await;
        self.inner.replace_content(record).await
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<usize> {
        self.inner.delete(ids).await
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
        self.inner.set_retention(ids, class).await
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
        "stalling"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_touches_during_update_are_kept() {
    let store = Arc::new(StallingStore {
        stall: Duration::from_millis(200),
        ..StallingStore::default()
    });
    let pipeline = Arc::new(
        CurationPipeline::new(
            Config::default(),
            store.clone(),
            Some(Arc::new(MockEmbedder::new())),
        )
        .unwrap(),
    );
    let terse = pipeline
        .ingest(Candidate::new(
            "Implement retry with exponential backoff for the HTTP client",
            ContextProfile::AutonomousCoding,
        ))
        .await
        .unwrap();

    let update = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .ingest(Candidate::new(
                    "Implement retry with exponential backoff for the HTTP client: start at 100ms, \
                     double the delay on every attempt, cap it at 30 seconds and add random jitter \
                     so concurrent callers spread out",
                    ContextProfile::AutonomousCoding,
                ))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    for _ in 0..3 {
        assert!(pipeline.touch(terse.memory_id).await.unwrap());
    }

    let outcome = update.await.unwrap().unwrap();
    assert_eq!(outcome.action, DedupAction::Update);
    assert_eq!(outcome.memory_id, terse.memory_id);

    let record = store.get(terse.memory_id).await.unwrap().unwrap();
    assert!(record.content.contains("100ms"));
    assert_eq!(record.access_count, 3);
}
