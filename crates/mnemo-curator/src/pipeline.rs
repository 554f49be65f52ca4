//! Curation pipeline
//!
//! Orchestrates one ingestion: validation, classification, tagging,
//! scoring, embedding, deduplication and the storage write. Also the entry
//! point for sweeps, stats, retrieval access and usefulness feedback.
//!
//! Classification, tagging and scoring are pure and run before the
//! partition lock is taken; the neighbour read, the decision and the write
//! run under it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::categorizer::Categorizer;
use crate::config::{Config, StorageBackend};
use crate::dedup::fingerprint::fingerprint;
use crate::dedup::lock::PartitionLocks;
use crate::dedup::pattern::classify_pattern;
use crate::dedup::{DedupCandidate, Deduplicator, merge_into, refine};
use crate::embedding::{Embedder, FastEmbedder};
use crate::error::{CuratorError, Result};
use crate::memory::types::{
    Candidate, CategoryPath, DedupAction, IngestOutcome, MemoryRecord, RetentionClass,
};
use crate::scoring::{
    ConfidenceScorer, ContextTable, FeedbackAggregator, ScoreInput, ScoringSnapshot,
    SnapshotHandle, apply_degraded_penalty,
};
use crate::storage::{
    CurationStats, EvictionReport, Evictor, InMemoryStore, LanceStore, MemoryStore,
    StorageManager, SweepScheduler,
};
use crate::tagger::Tagger;

/// File under the data directory holding the scoring snapshot
pub const SCORING_FILE: &str = "scoring.json";

/// Composition root owning one instance of every curation component
pub struct CurationPipeline {
    categorizer: Categorizer,
    tagger: Tagger,
    scorer: ConfidenceScorer,
    snapshots: Arc<SnapshotHandle>,
    feedback: FeedbackAggregator,
    dedup: Deduplicator,
    embedder: Option<Arc<dyn Embedder>>,
    storage: Arc<StorageManager>,
    config: Config,
    /// Where feedback-adapted scoring state is persisted, if anywhere
    scoring_file: Option<PathBuf>,
    shutdown: CancellationToken,
}

impl CurationPipeline {
    /// Assemble a pipeline over an already opened store.
    ///
    /// `embedder: None` runs every ingestion through the lexical fallback.
    pub fn new(
        config: Config,
        store: Arc<dyn MemoryStore>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(embedder) = &embedder {
            if embedder.dimension() != config.embedding.dimension {
                return Err(CuratorError::Config(format!(
                    "Embedder produces {} dimensions, config expects {}",
                    embedder.dimension(),
                    config.embedding.dimension
                )));
            }
        }

        let snapshots = Arc::new(SnapshotHandle::new(ScoringSnapshot::new(
            config.scoring.weights,
        )));
        let evictor = Evictor::new(
            &config.sweep,
            &config.retention,
            ContextTable::new(config.scoring.profile_overrides.clone()),
        );
        let storage = Arc::new(StorageManager::new(
            store,
            Arc::new(PartitionLocks::new(config.dedup.partition_shards)),
            evictor,
            config.storage.clone(),
            config.sweep.clone(),
        ));

        Ok(Self {
            categorizer: Categorizer::new(&config.categorizer),
            tagger: Tagger::new(&config.tagger),
            scorer: ConfidenceScorer::new(&config.scoring),
            feedback: FeedbackAggregator::new(Arc::clone(&snapshots), &config.scoring),
            snapshots,
            dedup: Deduplicator::new(&config.dedup),
            embedder,
            storage,
            config,
            scoring_file: None,
            shutdown: CancellationToken::new(),
        })
    }

    /// Open the configured backend and load the local embedding model.
    ///
    /// A model that fails to load is logged and the pipeline runs degraded.
    pub async fn from_config(config: Config) -> Result<Self> {
        let data_dir = config.storage.data_dir.clone();
        let store: Arc<dyn MemoryStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryStore::new()),
            StorageBackend::Lance => {
                info!(path = %data_dir.display(), "Opening LanceDB store");
                Arc::new(LanceStore::open(&data_dir, config.embedding.dimension).await?)
            }
        };

        let embedder: Option<Arc<dyn Embedder>> = if config.embedding.enabled {
            match FastEmbedder::new() {
                Ok(embedder) => Some(Arc::new(embedder)),
                Err(e) => {
                    warn!(error = %e, "Embedding model unavailable, using lexical matching");
                    None
                }
            }
        } else {
            info!("Embeddings disabled, using lexical matching");
            None
        };

        let backend = config.storage.backend;
        let pipeline = Self::new(config, store, embedder)?;
        match backend {
            StorageBackend::Lance => pipeline.with_scoring_file(data_dir.join(SCORING_FILE)).await,
            StorageBackend::Memory => Ok(pipeline),
        }
    }

    /// Persist scoring state to `path` after every feedback event, resuming
    /// from it if it already exists
    pub async fn with_scoring_file(mut self, path: PathBuf) -> Result<Self> {
        if let Some(snapshot) = ScoringSnapshot::load_from(&path).await? {
            info!(
                path = %path.display(),
                version = snapshot.version,
                "Restored scoring snapshot"
            );
            self.snapshots.restore(snapshot);
        }
        self.scoring_file = Some(path);
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn snapshot(&self) -> Arc<ScoringSnapshot> {
        self.snapshots.load()
    }

    /// Ingest one candidate fact
    pub async fn ingest(&self, candidate: Candidate) -> Result<IngestOutcome> {
        let content = self.validate(&candidate.content)?;
        let source = &candidate.source_context;

        let classification = self.categorizer.classify(content, source);
        let category = classification.category_path.clone();
        let tags = self.tagger.tag(content, &category, source);

        let snapshot = self.snapshots.load();
        let mut confidence = self.scorer.score(
            &ScoreInput {
                content,
                category_path: &category,
                classification_confidence: classification.confidence,
                low_confidence: classification.low_confidence,
                context_profile: candidate.context_profile,
                extraction_confidence: candidate.extraction_confidence,
            },
            &snapshot,
        );

        let embedding = self.embed(content).await;
        let degraded = embedding.is_none();
        if degraded {
            confidence =
                apply_degraded_penalty(confidence, self.config.dedup.degraded_confidence_penalty);
        }

        let pattern = classify_pattern(content);
        let mut record = MemoryRecord::new(
            content.to_string(),
            embedding.unwrap_or_default(),
            category.clone(),
        );
        record.set_confidence(confidence);
        record.tags = tags;
        record.source_context = candidate.source_context.clone();
        record.pattern = pattern;
        record.fingerprint = fingerprint(&category, content, pattern);
        record.degraded = degraded;

        let (action, stored) = {
            let _guard = self.storage.locks().lock(&category.partition()).await;
            self.decide_and_write(record).await?
        };

        if action == DedupAction::Skip && stored.retention_class == RetentionClass::EvictionCandidate {
            self.storage.rescue(stored.id).await?;
        }

        debug!(
            action = %action,
            memory_id = %stored.id,
            category = %stored.category_path,
            confidence = stored.confidence,
            degraded,
            scoring_version = snapshot.version,
            "Ingested candidate"
        );

        Ok(IngestOutcome {
            action,
            memory_id: stored.id,
            confidence: stored.confidence,
            category_path: stored.category_path,
            tags: stored.tags.into_iter().collect(),
            degraded,
        })
    }

    /// Resolve and apply the decision. Caller holds the partition lock.
    async fn decide_and_write(&self, mut record: MemoryRecord) -> Result<(DedupAction, MemoryRecord)> {
        let embedding = record.has_embedding().then_some(record.embedding.as_slice());
        let resolution = self
            .dedup
            .resolve(
                &DedupCandidate {
                    content: &record.content,
                    embedding,
                    category_path: &record.category_path,
                    pattern: record.pattern,
                },
                self.storage.store().as_ref(),
            )
            .await?;

        match (resolution.action, resolution.target) {
            (DedupAction::Skip, Some(target)) => {
                self.storage
                    .write(&record, DedupAction::Skip, Some(target.id))
                    .await?;
                Ok((DedupAction::Skip, target))
            }
            (DedupAction::Update, Some(target)) => {
                let updated = refine(&target, &record);
                self.storage
                    .write(&updated, DedupAction::Update, Some(target.id))
                    .await?;
                Ok((DedupAction::Update, updated))
            }
            (DedupAction::Merge, Some(target)) => {
                let merged = merge_into(&target, &record);
                self.storage
                    .write(&merged, DedupAction::Merge, Some(target.id))
                    .await?;
                Ok((DedupAction::Merge, merged))
            }
            (_, _) => {
                if let Some(relation) = resolution.relation {
                    record.tags.insert(relation);
                }
                let stored_id = self.storage.write(&record, DedupAction::Add, None).await?;
                if stored_id == record.id {
                    return Ok((DedupAction::Add, record));
                }

                // Same fingerprint already stored but not among the neighbours
                self.storage
                    .write(&record, DedupAction::Skip, Some(stored_id))
                    .await?;
                let existing = self.storage.store().get(stored_id).await?.ok_or_else(|| {
                    CuratorError::Storage(format!("Record {stored_id} vanished during ingest"))
                })?;
                Ok((DedupAction::Skip, existing))
            }
        }
    }

    fn validate<'a>(&self, content: &'a str) -> Result<&'a str> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CuratorError::Validation(
                "Candidate content is empty".to_string(),
            ));
        }
        let length = content.chars().count();
        if length > self.config.ingest.max_content_chars {
            return Err(CuratorError::Validation(format!(
                "Candidate content has {length} characters, limit is {}",
                self.config.ingest.max_content_chars
            )));
        }
        Ok(content)
    }

    /// Embed with the configured timeout; `None` selects the lexical fallback
    async fn embed(&self, content: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let timeout = Duration::from_millis(self.config.embedding.timeout_ms);

        match tokio::time::timeout(timeout, embedder.embed(content)).await {
            Ok(Ok(vector)) if vector.len() == embedder.dimension() && vector.iter().all(|v| v.is_finite()) => {
                Some(vector)
            }
            Ok(Ok(vector)) => {
                warn!(
                    len = vector.len(),
                    expected = embedder.dimension(),
                    "Embedder returned an unusable vector, using lexical matching"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Embedding failed, using lexical matching");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.embedding.timeout_ms,
                    "Embedding timed out, using lexical matching"
                );
                None
            }
        }
    }

    /// Run one eviction sweep now
    pub async fn sweep_now(&self) -> Result<EvictionReport> {
        self.storage
            .sweep(Utc::now(), &self.shutdown.child_token())
            .await
    }

    pub async fn stats(&self) -> Result<CurationStats> {
        let mut stats = self.storage.stats().await?;
        stats.scoring_version = self.snapshots.load().version;
        Ok(stats)
    }

    /// Record a retrieval access of a stored memory
    pub async fn touch(&self, id: Uuid) -> Result<bool> {
        self.storage.touch(id).await
    }

    /// Fold usefulness feedback for a category into the scoring snapshot.
    /// Returns the version of the published snapshot.
    pub async fn record_feedback(&self, category: &CategoryPath, useful: bool) -> Result<u64> {
        let published = self.feedback.record(category, useful);
        if let Some(path) = &self.scoring_file {
            published.save(path).await?;
        }
        Ok(published.version)
    }

    /// Scheduler for background sweeps, stopped by [`Self::shutdown`]
    pub fn scheduler(&self) -> SweepScheduler {
        SweepScheduler::new(
            Arc::clone(&self.storage),
            &self.config.sweep,
            self.shutdown.child_token(),
        )
    }

    /// Cancel running sweeps and the scheduler
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for CurationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurationPipeline")
            .field("store", &self.storage.store().name())
            .field("embedder", &self.embedder.is_some())
            .field("scoring_version", &self.snapshots.load().version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::ContextProfile;
    use crate::testing::{MockEmbedder, UnavailableEmbedder};
    use std::str::FromStr;

    fn pipeline(embedder: Option<Arc<dyn Embedder>>) -> CurationPipeline {
        CurationPipeline::new(Config::default(), Arc::new(InMemoryStore::new()), embedder).unwrap()
    }

    fn candidate(content: &str) -> Candidate {
        Candidate::new(content, ContextProfile::AutonomousCoding)
    }

    mod validation {
        use super::*;

        #[tokio::test]
        async fn test_rejects_blank_content() {
            let pipeline = pipeline(Some(Arc::new(MockEmbedder::new())));
            for content in ["", "   \n\t"] {
                let err = pipeline.ingest(candidate(content)).await.unwrap_err();
                assert!(matches!(err, CuratorError::Validation(_)));
            }
            assert_eq!(pipeline.storage().store().count().await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_rejects_oversized_content() {
            let mut config = Config::default();
            config.ingest.max_content_chars = 10;
            let pipeline =
                CurationPipeline::new(config, Arc::new(InMemoryStore::new()), None).unwrap();
            let err = pipeline
                .ingest(candidate("this is longer than ten characters"))
                .await
                .unwrap_err();
            assert!(matches!(err, CuratorError::Validation(_)));
        }

        #[test]
        fn test_rejects_dimension_mismatch() {
            let mut config = Config::default();
            config.embedding.dimension = 8;
            let result = CurationPipeline::new(
                config,
                Arc::new(InMemoryStore::new()),
                Some(Arc::new(MockEmbedder::new())),
            );
            assert!(matches!(result, Err(CuratorError::Config(_))));
        }
    }

    #[tokio::test]
    async fn test_add_stores_classified_record() {
        let pipeline = pipeline(Some(Arc::new(MockEmbedder::new())));
        let outcome = pipeline
            .ingest(candidate("Use async/await for I/O-bound tasks in Rust"))
            .await
            .unwrap();

        assert_eq!(outcome.action, DedupAction::Add);
        assert!(!outcome.degraded);
        let stored = pipeline
            .storage()
            .store()
            .get(outcome.memory_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.category_path, outcome.category_path);
        assert_eq!(stored.embedding.len(), 384);
        assert!(!stored.fingerprint.is_empty());
        assert!((0.0..=1.0).contains(&stored.confidence));
    }

    #[tokio::test]
    async fn test_unavailable_embedder_degrades() {
        let pipeline = pipeline(Some(Arc::new(UnavailableEmbedder)));
        let outcome = pipeline
            .ingest(candidate("Use async/await for I/O-bound tasks in Rust"))
            .await
            .unwrap();

        assert_eq!(outcome.action, DedupAction::Add);
        assert!(outcome.degraded);
        let stored = pipeline
            .storage()
            .store()
            .get(outcome.memory_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.degraded);
        assert!(!stored.has_embedding());
    }

    #[tokio::test]
    async fn test_feedback_bumps_stats_version() {
        let pipeline = pipeline(None);
        let category = CategoryPath::from_str("development/testing").unwrap();
        assert_eq!(pipeline.record_feedback(&category, true).await.unwrap(), 1);
        assert_eq!(pipeline.record_feedback(&category, false).await.unwrap(), 2);
        assert_eq!(pipeline.stats().await.unwrap().scoring_version, 2);
    }

    #[tokio::test]
    async fn test_scoring_file_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SCORING_FILE);
        let category = CategoryPath::from_str("development/testing").unwrap();

        let first = pipeline(None).with_scoring_file(path.clone()).await.unwrap();
        first.record_feedback(&category, true).await.unwrap();
        first.record_feedback(&category, true).await.unwrap();

        let second = pipeline(None).with_scoring_file(path).await.unwrap();
        let snapshot = second.snapshot();
        assert_eq!(snapshot.version, 2);
        assert!(snapshot.historical_factor(&category) > 0.5);
    }

    #[tokio::test]
    async fn test_touch_unknown_id() {
        let pipeline = pipeline(None);
        assert!(!pipeline.touch(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_sweep_now() {
        let pipeline = pipeline(None);
        pipeline.shutdown();
        let report = pipeline.sweep_now().await.unwrap();
        assert!(report.purged_ids.is_empty());
    }
}
