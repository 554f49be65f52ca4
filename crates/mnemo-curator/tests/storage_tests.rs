//! Integration tests for the pipeline over LanceDB
//!
//! Same curation flows as the in-memory tests, against real tables in a
//! temporary directory.

use std::sync::Arc;

use mnemo_curator::config::Config;
use mnemo_curator::embedding::EMBEDDING_DIMENSION;
use mnemo_curator::memory::{Candidate, ContextProfile, DedupAction, RetentionClass};
use mnemo_curator::storage::{LanceStore, MemoryStore};
use mnemo_curator::testing::MockEmbedder;
use mnemo_curator::CurationPipeline;
use tempfile::{TempDir, tempdir};

const ASYNC_TIP: &str = "Use async/await for I/O-bound tasks";
const RETRY_TERSE: &str = "Implement retry with exponential backoff for the HTTP client";
const RETRY_DETAILED: &str = "Implement retry with exponential backoff for the HTTP client: start at 100ms, double the delay on every attempt, cap it at 30 seconds and add random jitter so concurrent callers spread out";

/// Test fixture: Lance-backed pipeline in a temporary directory
async fn lance_pipeline(dir: &TempDir) -> (CurationPipeline, Arc<LanceStore>) {
    let store = Arc::new(LanceStore::open(dir.path(), EMBEDDING_DIMENSION).await.unwrap());
    let pipeline = CurationPipeline::new(
        Config::default(),
        store.clone(),
        Some(Arc::new(MockEmbedder::new())),
    )
    .unwrap();
    (pipeline, store)
}

fn candidate(content: &str) -> Candidate {
    Candidate::new(content, ContextProfile::AutonomousCoding)
}

mod curation_tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_is_skipped() {
        let dir = tempdir().unwrap();
        let (pipeline, store) = lance_pipeline(&dir).await;

        let first = pipeline.ingest(candidate(ASYNC_TIP)).await.unwrap();
        let second = pipeline.ingest(candidate(ASYNC_TIP)).await.unwrap();

        assert_eq!(first.action, DedupAction::Add);
        assert_eq!(second.action, DedupAction::Skip);
        assert_eq!(store.count().await.unwrap(), 1);
        let record = store.get(first.memory_id).await.unwrap().unwrap();
        assert_eq!(record.access_count, 1);
        assert_eq!(record.embedding.len(), EMBEDDING_DIMENSION);
    }

    #[tokio::test]
    async fn test_refinement_replaces_content_in_place() {
        let dir = tempdir().unwrap();
        let (pipeline, store) = lance_pipeline(&dir).await;

        let terse = pipeline.ingest(candidate(RETRY_TERSE)).await.unwrap();
        let detailed = pipeline.ingest(candidate(RETRY_DETAILED)).await.unwrap();

        assert_eq!(detailed.action, DedupAction::Update);
        assert_eq!(detailed.memory_id, terse.memory_id);
        assert_eq!(store.count().await.unwrap(), 1);

        let record = store.get(terse.memory_id).await.unwrap().unwrap();
        assert_eq!(record.content, RETRY_DETAILED);
        assert_eq!(record.retention_class, RetentionClass::Active);
        assert!(record.tags.iter().any(|t| t.starts_with("supersedes:")));
    }

    #[tokio::test]
    async fn test_sweep_on_empty_store() {
        let dir = tempdir().unwrap();
        let (pipeline, _store) = lance_pipeline(&dir).await;

        let report = pipeline.sweep_now().await.unwrap();
        assert!(report.purged_ids.is_empty());
        assert_eq!(report.aborted_batches, 0);
    }
}

mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let (pipeline, _store) = lance_pipeline(&dir).await;
            pipeline.ingest(candidate(ASYNC_TIP)).await.unwrap().memory_id
        };

        let (pipeline, store) = lance_pipeline(&dir).await;
        assert!(store.get(id).await.unwrap().is_some());

        let again = pipeline.ingest(candidate(ASYNC_TIP)).await.unwrap();
        assert_eq!(again.action, DedupAction::Skip);
        assert_eq!(again.memory_id, id);
    }

    #[tokio::test]
    async fn test_feedback_survives_restart() {
        let dir = tempdir().unwrap();
        let scoring = dir.path().join(mnemo_curator::pipeline::SCORING_FILE);
        let category = {
            let (pipeline, _store) = lance_pipeline(&dir).await;
            let pipeline = pipeline.with_scoring_file(scoring.clone()).await.unwrap();
            let outcome = pipeline.ingest(candidate(ASYNC_TIP)).await.unwrap();
            assert_eq!(pipeline.record_feedback(&outcome.category_path, true).await.unwrap(), 1);
            outcome.category_path
        };

        let (pipeline, _store) = lance_pipeline(&dir).await;
        let pipeline = pipeline.with_scoring_file(scoring).await.unwrap();
        assert_eq!(pipeline.snapshot().version, 1);
        assert!(pipeline.snapshot().historical_factor(&category) > 0.5);
    }
}
