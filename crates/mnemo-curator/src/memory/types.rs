//! Memory types for the curation pipeline
//!
//! Defines the persisted `MemoryRecord` and the supporting value types that
//! flow between the categorizer, tagger, scorer, deduplicator and storage.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CuratorError, Result};

/// Maximum number of labels in a category path
pub const MAX_CATEGORY_DEPTH: usize = 4;

/// Fixed top level of the taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopCategory {
    Development,
    Troubleshooting,
    Operations,
    Knowledge,
}

impl TopCategory {
    pub const ALL: [TopCategory; 4] = [
        TopCategory::Development,
        TopCategory::Troubleshooting,
        TopCategory::Operations,
        TopCategory::Knowledge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopCategory::Development => "development",
            TopCategory::Troubleshooting => "troubleshooting",
            TopCategory::Operations => "operations",
            TopCategory::Knowledge => "knowledge",
        }
    }
}

impl FromStr for TopCategory {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        TopCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CuratorError::Validation(format!("Unknown top-level category: {s}")))
    }
}

/// Ordered list of 1-4 taxonomy labels, top level first.
///
/// Construction validates depth and the top-level label, so every
/// `CategoryPath` in the system satisfies the taxonomy shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CategoryPath(Vec<String>);

impl CategoryPath {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() || labels.len() > MAX_CATEGORY_DEPTH {
            return Err(CuratorError::Validation(format!(
                "Category path must have 1-{MAX_CATEGORY_DEPTH} labels, got {}",
                labels.len()
            )));
        }
        TopCategory::from_str(&labels[0])?;
        if labels.iter().any(|l| l.is_empty() || l.contains('/')) {
            return Err(CuratorError::Validation(format!(
                "Invalid category label in {labels:?}"
            )));
        }
        Ok(Self(labels))
    }

    /// Fallback path used when nothing matches with enough confidence
    pub fn uncategorized() -> Self {
        Self(vec!["knowledge".to_string(), "uncategorized".to_string()])
    }

    pub fn top(&self) -> TopCategory {
        // Validated at construction
        TopCategory::from_str(&self.0[0]).unwrap_or(TopCategory::Knowledge)
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_uncategorized(&self) -> bool {
        self.0.len() >= 2 && self.0[0] == "knowledge" && self.0[1] == "uncategorized"
    }

    /// Prefix made of the first `depth` labels, joined with `/`
    pub fn prefix(&self, depth: usize) -> String {
        self.0[..depth.clamp(1, self.0.len())].join("/")
    }

    /// Partition key used for neighbour lookup and locking (first two labels)
    pub fn partition(&self) -> String {
        self.prefix(2)
    }

    /// True if this path lies under the `/`-joined `prefix`
    pub fn is_under(&self, prefix: &str) -> bool {
        let joined = self.to_string();
        joined == prefix || joined.starts_with(&format!("{prefix}/"))
    }

    /// All ancestor prefixes from most to least specific (including self)
    pub fn ancestors(&self) -> Vec<String> {
        (1..=self.0.len()).rev().map(|d| self.prefix(d)).collect()
    }
}

impl fmt::Display for CategoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for CategoryPath {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.split('/').map(str::to_string).collect())
    }
}

impl TryFrom<Vec<String>> for CategoryPath {
    type Error = CuratorError;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<CategoryPath> for Vec<String> {
    fn from(path: CategoryPath) -> Self {
        path.0
    }
}

/// Lifecycle state of a record with respect to eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    Active,
    EvictionCandidate,
    Purged,
}

impl RetentionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionClass::Active => "active",
            RetentionClass::EvictionCandidate => "eviction_candidate",
            RetentionClass::Purged => "purged",
        }
    }
}

impl FromStr for RetentionClass {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(RetentionClass::Active),
            "eviction_candidate" => Ok(RetentionClass::EvictionCandidate),
            "purged" => Ok(RetentionClass::Purged),
            other => Err(CuratorError::Serialization(format!(
                "Unknown retention class: {other}"
            ))),
        }
    }
}

/// Current usage mode, biasing scoring and eviction toward relevant categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextProfile {
    #[default]
    AutonomousCoding,
    InteractiveDebugging,
    KnowledgeBuilding,
}

impl ContextProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextProfile::AutonomousCoding => "autonomous_coding",
            ContextProfile::InteractiveDebugging => "interactive_debugging",
            ContextProfile::KnowledgeBuilding => "knowledge_building",
        }
    }
}

impl FromStr for ContextProfile {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.replace('-', "_").as_str() {
            "autonomous_coding" => Ok(ContextProfile::AutonomousCoding),
            "interactive_debugging" => Ok(ContextProfile::InteractiveDebugging),
            "knowledge_building" => Ok(ContextProfile::KnowledgeBuilding),
            other => Err(CuratorError::Validation(format!(
                "Unknown context profile: {other}"
            ))),
        }
    }
}

/// Identifiers of the conversation a candidate came from.
///
/// Only used for context-aware scoring and eviction, never for uniqueness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    pub session_id: Option<String>,
    pub file_path: Option<String>,
}

impl SourceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }
}

/// Semantic shape of a memory's content, used by the deduplicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructuralPattern {
    ErrorReport,
    Solution,
    Implementation,
    Optimization,
    General,
}

impl StructuralPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructuralPattern::ErrorReport => "error-report",
            StructuralPattern::Solution => "solution",
            StructuralPattern::Implementation => "implementation",
            StructuralPattern::Optimization => "optimization",
            StructuralPattern::General => "general",
        }
    }
}

impl FromStr for StructuralPattern {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error-report" => Ok(StructuralPattern::ErrorReport),
            "solution" => Ok(StructuralPattern::Solution),
            "implementation" => Ok(StructuralPattern::Implementation),
            "optimization" => Ok(StructuralPattern::Optimization),
            "general" => Ok(StructuralPattern::General),
            other => Err(CuratorError::Serialization(format!(
                "Unknown structural pattern: {other}"
            ))),
        }
    }
}

/// A single memory unit persisted by the curator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier, immutable after creation
    pub id: Uuid,
    /// Memory text, never empty
    pub content: String,
    /// Vector embedding; empty if written while the embedder was unavailable
    pub embedding: Vec<f32>,
    /// Taxonomy classification
    pub category_path: CategoryPath,
    /// Estimated reliability/usefulness in [0, 1]
    pub confidence: f32,
    /// Semantic, technology, context, quality and relationship tags
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    pub source_context: SourceContext,
    pub retention_class: RetentionClass,
    /// Structural pattern the content was classified as
    pub pattern: StructuralPattern,
    /// Dedup fingerprint (category + normalized content hash + pattern)
    pub fingerprint: String,
    /// Written through the lexical-only fallback path
    pub degraded: bool,
}

impl MemoryRecord {
    /// Create a new active record with fresh timestamps
    pub fn new(content: String, embedding: Vec<f32>, category_path: CategoryPath) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content,
            embedding,
            category_path,
            confidence: 0.5,
            tags: BTreeSet::new(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            source_context: SourceContext::default(),
            retention_class: RetentionClass::Active,
            pattern: StructuralPattern::General,
            fingerprint: String::new(),
            degraded: false,
        }
    }

    /// Mark this record as accessed, updating access count and timestamp
    pub fn mark_accessed(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = Utc::now();
    }

    /// Update the confidence, clamping into [0, 1] and mapping NaN to 0.5
    pub fn set_confidence(&mut self, confidence: f32) {
        self.confidence = if confidence.is_nan() {
            0.5
        } else {
            confidence.clamp(0.0, 1.0)
        };
    }

    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }

    /// Copy the fields an UPDATE or MERGE decides from `decided`.
    ///
    /// Identity, creation time, source and `access_count` stay as stored;
    /// `last_accessed_at` only moves forward.
    pub fn apply_content(&mut self, decided: &MemoryRecord) {
        self.content.clone_from(&decided.content);
        self.embedding.clone_from(&decided.embedding);
        self.category_path = decided.category_path.clone();
        self.confidence = decided.confidence;
        self.tags.clone_from(&decided.tags);
        self.retention_class = decided.retention_class;
        self.pattern = decided.pattern;
        self.fingerprint.clone_from(&decided.fingerprint);
        self.degraded = decided.degraded;
        self.last_accessed_at = self.last_accessed_at.max(decided.last_accessed_at);
    }
}

/// Deduplicator decision for a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DedupAction {
    Add,
    Update,
    Merge,
    Skip,
}

impl DedupAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupAction::Add => "ADD",
            DedupAction::Update => "UPDATE",
            DedupAction::Merge => "MERGE",
            DedupAction::Skip => "SKIP",
        }
    }
}

impl fmt::Display for DedupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate fact handed to the pipeline by the upstream extractor
#[derive(Debug, Clone)]
pub struct Candidate {
    pub content: String,
    pub context_profile: ContextProfile,
    pub source_context: SourceContext,
    /// Confidence reported by the fact extractor, if any
    pub extraction_confidence: Option<f32>,
}

impl Candidate {
    pub fn new(content: impl Into<String>, context_profile: ContextProfile) -> Self {
        Self {
            content: content.into(),
            context_profile,
            source_context: SourceContext::default(),
            extraction_confidence: None,
        }
    }

    pub fn with_source(mut self, source_context: SourceContext) -> Self {
        self.source_context = source_context;
        self
    }

    pub fn with_extraction_confidence(mut self, confidence: f32) -> Self {
        self.extraction_confidence = Some(confidence);
        self
    }
}

/// Result of ingesting one candidate
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub action: DedupAction,
    /// Stored record the candidate ended up in (new, updated or existing)
    pub memory_id: Uuid,
    pub confidence: f32,
    pub category_path: CategoryPath,
    pub tags: Vec<String>,
    /// Matched without embeddings
    pub degraded: bool,
}
