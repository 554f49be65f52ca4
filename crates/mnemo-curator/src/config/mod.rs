use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CuratorError, Result};
use crate::memory::types::{CategoryPath, ContextProfile};
use crate::storage::eviction::EvictionStrategy;

/// Main configuration structure for the curator
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage backend and write retry policy
    #[serde(default)]
    pub storage: StorageConfig,
    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Category classification
    #[serde(default)]
    pub categorizer: CategorizerConfig,
    /// Tag rule acceptance
    #[serde(default)]
    pub tagger: TaggerConfig,
    /// Confidence scoring and feedback adaptation
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Deduplication thresholds and similarity weights
    #[serde(default)]
    pub dedup: DedupConfig,
    /// Per-category retention policies
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Eviction sweep scheduling
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Candidate validation limits
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| CuratorError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CuratorError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Load from an explicit path, else the first default location that
    /// exists, else built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".mnemo").join("curator.toml")),
            dirs::config_dir().map(|c| c.join("mnemo").join("curator.toml")),
            Some(PathBuf::from("curator.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Reject values that would break scoring or eviction invariants
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(CuratorError::Config(format!("{name} must be in [0, 1], got {v}")))
            }
        };

        unit("categorizer.min_confidence", self.categorizer.min_confidence)?;
        unit("tagger.acceptance_threshold", self.tagger.acceptance_threshold)?;
        unit("scoring.feedback_alpha", self.scoring.feedback_alpha)?;
        unit("dedup.default_threshold", self.dedup.default_threshold)?;
        unit("dedup.refinement_margin", self.dedup.refinement_margin)?;
        let penalty = self.dedup.degraded_confidence_penalty;
        if !(penalty > 0.0 && penalty <= 1.0) {
            return Err(CuratorError::Config(format!(
                "dedup.degraded_confidence_penalty must be in (0, 1], got {penalty}"
            )));
        }
        for (category, threshold) in &self.dedup.category_thresholds {
            category.parse::<CategoryPath>()?;
            unit(&format!("dedup.category_thresholds.{category}"), *threshold)?;
        }

        let floor = |name: &str, policy: &RetentionPolicy| {
            if policy.min_count > policy.max_records {
                Err(CuratorError::Config(format!(
                    "{name}: min_count {} exceeds max_records {}",
                    policy.min_count, policy.max_records
                )))
            } else {
                Ok(())
            }
        };
        floor("retention.default", &self.retention.default)?;
        for (category, policy) in &self.retention.categories {
            category.parse::<CategoryPath>()?;
            floor(&format!("retention.categories.{category}"), policy)?;
        }
        if self.dedup.partition_shards == 0 {
            return Err(CuratorError::Config(
                "dedup.partition_shards must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which store backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process-local, lost on exit
    Memory,
    /// LanceDB tables under `data_dir`
    #[default]
    Lance,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Base directory for LanceDB tables
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Attempts after the first failed write
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    /// Backoff before the first retry; doubled per attempt
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
            write_retries: default_write_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".mnemo").join("curator"))
        .unwrap_or_else(|| PathBuf::from(".mnemo/curator"))
}

fn default_write_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    50
}

/// Embedding model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Disable to always run the lexical fallback
    #[serde(default = "default_embedding_enabled")]
    pub enabled: bool,
    /// Embedding dimension size
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Per-call timeout before falling back to lexical matching
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: default_embedding_enabled(),
            dimension: default_embedding_dimension(),
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

fn default_embedding_enabled() -> bool {
    true
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_embedding_timeout_ms() -> u64 {
    2000
}

/// Category classification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CategorizerConfig {
    /// Below this classification confidence the candidate is uncategorized
    #[serde(default = "default_categorizer_min_confidence")]
    pub min_confidence: f32,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_categorizer_min_confidence(),
        }
    }
}

fn default_categorizer_min_confidence() -> f32 {
    0.3
}

/// Tag rule configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TaggerConfig {
    /// Rule confidence a tag must exceed to be emitted
    #[serde(default = "default_tagger_acceptance_threshold")]
    pub acceptance_threshold: f32,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_tagger_acceptance_threshold(),
        }
    }
}

fn default_tagger_acceptance_threshold() -> f32 {
    0.5
}

/// Relative weights of the four confidence factors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    #[serde(default = "default_weight_extraction")]
    pub extraction: f32,
    #[serde(default = "default_weight_quality")]
    pub quality: f32,
    #[serde(default = "default_weight_context")]
    pub context: f32,
    #[serde(default = "default_weight_history")]
    pub history: f32,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            extraction: default_weight_extraction(),
            quality: default_weight_quality(),
            context: default_weight_context(),
            history: default_weight_history(),
        }
    }
}

fn default_weight_extraction() -> f32 {
    0.3
}

fn default_weight_quality() -> f32 {
    0.3
}

fn default_weight_context() -> f32 {
    0.2
}

fn default_weight_history() -> f32 {
    0.2
}

/// Confidence scoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Initial factor weights; adapted at runtime from feedback
    #[serde(default)]
    pub weights: FactorWeights,
    /// Smoothing factor of the per-category feedback EMA
    #[serde(default = "default_feedback_alpha")]
    pub feedback_alpha: f32,
    /// Feedback events between weight adaptations (0 disables adaptation)
    #[serde(default = "default_adapt_every")]
    pub adapt_every: u32,
    /// Step size of one weight adaptation
    #[serde(default = "default_adapt_rate")]
    pub adapt_rate: f32,
    /// Multiplier applied when classification fell back to uncategorized
    #[serde(default = "default_uncategorized_penalty")]
    pub uncategorized_penalty: f32,
    /// Per-profile category weight overrides: profile -> category prefix -> weight
    #[serde(default)]
    pub profile_overrides: HashMap<ContextProfile, HashMap<String, f32>>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            feedback_alpha: default_feedback_alpha(),
            adapt_every: default_adapt_every(),
            adapt_rate: default_adapt_rate(),
            uncategorized_penalty: default_uncategorized_penalty(),
            profile_overrides: HashMap::new(),
        }
    }
}

fn default_feedback_alpha() -> f32 {
    0.2
}

fn default_adapt_every() -> u32 {
    20
}

fn default_adapt_rate() -> f32 {
    0.05
}

fn default_uncategorized_penalty() -> f32 {
    0.8
}

/// Deduplication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Neighbours fetched per candidate
    #[serde(default = "default_dedup_top_k")]
    pub top_k: usize,
    /// Duplicate threshold when no category override applies
    #[serde(default = "default_dedup_threshold")]
    pub default_threshold: f32,
    /// Width of the progressive-refinement band below the threshold
    #[serde(default = "default_refinement_margin")]
    pub refinement_margin: f32,
    /// Threshold overrides keyed by category prefix
    #[serde(default)]
    pub category_thresholds: HashMap<String, f32>,
    /// Weight of embedding cosine similarity in the composite
    #[serde(default = "default_embedding_weight")]
    pub embedding_weight: f32,
    /// Weight of lexical token overlap in the composite
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
    /// Added when both texts share a structural pattern
    #[serde(default = "default_structural_bonus")]
    pub structural_bonus: f32,
    /// Threshold increase for lexical-only matching
    #[serde(default = "default_fallback_threshold_raise")]
    pub fallback_threshold_raise: f32,
    /// Fraction of confidence removed for lexical-only matches
    #[serde(default = "default_degraded_confidence_penalty")]
    pub degraded_confidence_penalty: f32,
    /// Number of partition lock shards
    #[serde(default = "default_partition_shards")]
    pub partition_shards: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            top_k: default_dedup_top_k(),
            default_threshold: default_dedup_threshold(),
            refinement_margin: default_refinement_margin(),
            category_thresholds: HashMap::new(),
            embedding_weight: default_embedding_weight(),
            lexical_weight: default_lexical_weight(),
            structural_bonus: default_structural_bonus(),
            fallback_threshold_raise: default_fallback_threshold_raise(),
            degraded_confidence_penalty: default_degraded_confidence_penalty(),
            partition_shards: default_partition_shards(),
        }
    }
}

impl DedupConfig {
    /// Threshold for a category: most specific configured prefix wins
    pub fn threshold_for(&self, category: &CategoryPath) -> f32 {
        category
            .ancestors()
            .iter()
            .find_map(|prefix| self.category_thresholds.get(prefix).copied())
            .unwrap_or(self.default_threshold)
    }
}

fn default_dedup_top_k() -> usize {
    10
}

fn default_dedup_threshold() -> f32 {
    0.85
}

fn default_refinement_margin() -> f32 {
    0.15
}

fn default_embedding_weight() -> f32 {
    0.6
}

fn default_lexical_weight() -> f32 {
    0.4
}

fn default_structural_bonus() -> f32 {
    0.1
}

fn default_fallback_threshold_raise() -> f32 {
    0.1
}

fn default_degraded_confidence_penalty() -> f32 {
    0.15
}

fn default_partition_shards() -> usize {
    64
}

/// Retention rules for one category
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RetentionPolicy {
    /// Never evict below this many records
    #[serde(default = "default_min_count")]
    pub min_count: usize,
    /// Records older than this become eviction candidates
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    /// Capacity above which the lowest ranked records become candidates
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Confidence at or above which a record is protected
    #[serde(default = "default_protect_confidence")]
    pub protect_confidence: f32,
    /// Access count at or above which a record is protected
    #[serde(default = "default_protect_access_count")]
    pub protect_access_count: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            min_count: default_min_count(),
            max_age_days: default_max_age_days(),
            max_records: default_max_records(),
            protect_confidence: default_protect_confidence(),
            protect_access_count: default_protect_access_count(),
        }
    }
}

fn default_min_count() -> usize {
    10
}

fn default_max_age_days() -> i64 {
    90
}

fn default_max_records() -> usize {
    1000
}

fn default_protect_confidence() -> f32 {
    0.85
}

fn default_protect_access_count() -> u32 {
    10
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetentionConfig {
    /// Policy for categories without an override
    #[serde(default)]
    pub default: RetentionPolicy,
    /// Overrides keyed by category prefix
    #[serde(default)]
    pub categories: HashMap<String, RetentionPolicy>,
}

impl RetentionConfig {
    /// Policy for a category: most specific configured prefix wins
    pub fn policy_for(&self, category: &CategoryPath) -> RetentionPolicy {
        category
            .ancestors()
            .iter()
            .find_map(|prefix| self.categories.get(prefix).copied())
            .unwrap_or(self.default)
    }

    /// Prefix whose records share one retention budget: the most specific
    /// configured prefix, else the category's partition
    pub fn scope_for(&self, category: &CategoryPath) -> String {
        category
            .ancestors()
            .into_iter()
            .find(|prefix| self.categories.contains_key(prefix))
            .unwrap_or_else(|| category.partition())
    }
}

/// Relative weights of the hybrid eviction strategy
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct HybridWeights {
    #[serde(default = "default_hybrid_weight")]
    pub lru: f32,
    #[serde(default = "default_hybrid_weight")]
    pub priority: f32,
    #[serde(default = "default_hybrid_weight")]
    pub context: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            lru: default_hybrid_weight(),
            priority: default_hybrid_weight(),
            context: default_hybrid_weight(),
        }
    }
}

fn default_hybrid_weight() -> f32 {
    1.0 / 3.0
}

/// Eviction sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Run the background scheduler
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
    /// Seconds between scheduled sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Seconds between utilisation checks
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Soft deadline for one sweep
    #[serde(default = "default_sweep_deadline_secs")]
    pub deadline_secs: u64,
    /// Maximum records purged in one atomic batch
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: usize,
    /// Purge selection strategy
    #[serde(default)]
    pub strategy: EvictionStrategy,
    #[serde(default)]
    pub hybrid_weights: HybridWeights,
    /// Fraction of `max_records` that triggers an early sweep
    #[serde(default = "default_utilization_trigger")]
    pub utilization_trigger: f32,
    /// Profile used by the context-aware strategy
    #[serde(default)]
    pub active_profile: ContextProfile,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval_secs(),
            check_interval_secs: default_check_interval_secs(),
            deadline_secs: default_sweep_deadline_secs(),
            batch_size: default_sweep_batch_size(),
            strategy: EvictionStrategy::default(),
            hybrid_weights: HybridWeights::default(),
            utilization_trigger: default_utilization_trigger(),
            active_profile: ContextProfile::default(),
        }
    }
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_sweep_deadline_secs() -> u64 {
    30
}

fn default_sweep_batch_size() -> usize {
    100
}

fn default_utilization_trigger() -> f32 {
    0.9
}

/// Candidate validation limits
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Longest accepted candidate, in characters
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_max_content_chars() -> usize {
    8000
}
