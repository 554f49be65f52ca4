//! Similarity-based deduplication
//!
//! The [`Deduplicator`] compares a candidate against its nearest neighbours
//! in the same category partition and decides whether it is new, a
//! refinement, a weaker restatement or an exact duplicate.

pub mod fingerprint;
pub mod lock;
pub mod pattern;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use tracing::debug;

use crate::config::DedupConfig;
use crate::error::Result;
use crate::memory::types::{
    CategoryPath, DedupAction, MemoryRecord, RetentionClass, StructuralPattern,
};
use crate::storage::MemoryStore;
use crate::tagger::is_relationship_tag;
use crate::text::{jaccard, overlap_ratio, tokens};

use pattern::{earns_bonus, specificity};

/// Upper bound for the raised lexical-only threshold
const MAX_FALLBACK_THRESHOLD: f32 = 0.99;

/// What the deduplicator knows about a candidate
#[derive(Debug, Clone, Copy)]
pub struct DedupCandidate<'a> {
    pub content: &'a str,
    /// `None` when the embedder was unavailable
    pub embedding: Option<&'a [f32]>,
    pub category_path: &'a CategoryPath,
    pub pattern: StructuralPattern,
}

/// Composite similarity of a candidate to one neighbour.
///
/// Both scores blend the same cosine and structural bonus and differ only
/// in the lexical term, so `score <= containment` always holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    /// Symmetric score with Jaccard token overlap; only this one can make
    /// a candidate an exact duplicate
    pub score: f32,
    /// Score with token containment (shared over the smaller set); a terse
    /// note inside a detailed rewrite reaches 1.0 here
    pub containment: f32,
}

/// A neighbour with its composite similarity to the candidate
#[derive(Debug, Clone)]
pub struct ScoredNeighbor {
    pub record: MemoryRecord,
    pub similarity: f32,
    pub containment: f32,
}

impl ScoredNeighbor {
    pub fn new(record: MemoryRecord, similarity: Similarity) -> Self {
        Self {
            record,
            similarity: similarity.score,
            containment: similarity.containment,
        }
    }
}

/// Decision for one candidate
#[derive(Debug, Clone)]
pub struct Resolution {
    pub action: DedupAction,
    /// Existing record the action applies to (SKIP, UPDATE, MERGE) or
    /// relates to (ADD with a relationship tag)
    pub target: Option<MemoryRecord>,
    /// Relationship tag for an ADD next to a complementary neighbour
    pub relation: Option<String>,
    pub similarity: f32,
    pub threshold: f32,
    /// Decided on lexical similarity alone
    pub degraded: bool,
}

impl Resolution {
    fn add(threshold: f32, degraded: bool) -> Self {
        Self {
            action: DedupAction::Add,
            target: None,
            relation: None,
            similarity: 0.0,
            threshold,
            degraded,
        }
    }

    pub fn target_id(&self) -> Option<uuid::Uuid> {
        self.target.as_ref().map(|r| r.id)
    }
}

pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Duplicate threshold for a category, raised for lexical-only matching
    pub fn threshold(&self, category: &CategoryPath, degraded: bool) -> f32 {
        let base = self.config.threshold_for(category);
        if degraded {
            (base + self.config.fallback_threshold_raise).min(MAX_FALLBACK_THRESHOLD)
        } else {
            base
        }
    }

    /// Weighted blend of cosine similarity and token overlap, plus the
    /// structural bonus. Lexical overlap alone when `cosine` is `None`.
    pub fn composite_similarity(
        &self,
        candidate_tokens: &BTreeSet<String>,
        candidate_pattern: StructuralPattern,
        neighbor: &MemoryRecord,
        cosine: Option<f32>,
    ) -> Similarity {
        let neighbor_tokens = tokens(&neighbor.content);
        let bonus = if earns_bonus(candidate_pattern, neighbor.pattern) {
            self.config.structural_bonus
        } else {
            0.0
        };
        Similarity {
            score: self.blend(jaccard(candidate_tokens, &neighbor_tokens), cosine, bonus),
            containment: self.blend(
                overlap_ratio(candidate_tokens, &neighbor_tokens),
                cosine,
                bonus,
            ),
        }
    }

    fn blend(&self, lexical: f32, cosine: Option<f32>, bonus: f32) -> f32 {
        let base = match cosine {
            Some(cosine) => {
                let ew = self.config.embedding_weight.max(0.0);
                let lw = self.config.lexical_weight.max(0.0);
                if ew + lw <= 0.0 {
                    lexical
                } else {
                    (ew * cosine + lw * lexical) / (ew + lw)
                }
            }
            None => lexical,
        };

        let similarity = base + bonus;
        if similarity.is_finite() {
            similarity.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Fetch neighbours from the candidate's partition and decide.
    ///
    /// Callers hold the partition lock across this call and the write.
    pub async fn resolve(&self, candidate: &DedupCandidate<'_>, store: &dyn MemoryStore) -> Result<Resolution> {
        let partition = candidate.category_path.partition();
        let candidate_tokens = tokens(candidate.content);
        let degraded = candidate.embedding.is_none();

        let mut scored: Vec<ScoredNeighbor> = match candidate.embedding {
            Some(vector) => store
                .nearest(vector, &partition, self.config.top_k)
                .await?
                .into_iter()
                .map(|n| {
                    let similarity = self.composite_similarity(
                        &candidate_tokens,
                        candidate.pattern,
                        &n.record,
                        Some(n.similarity),
                    );
                    ScoredNeighbor::new(n.record, similarity)
                })
                .collect(),
            None => store
                .list_by_category(&partition)
                .await?
                .into_iter()
                .map(|record| {
                    let similarity =
                        self.composite_similarity(&candidate_tokens, candidate.pattern, &record, None);
                    ScoredNeighbor::new(record, similarity)
                })
                .collect(),
        };

        scored.sort_by(|a, b| by_containment(b, a).then_with(|| by_score(b, a)));
        scored.truncate(self.config.top_k);

        let threshold = self.threshold(candidate.category_path, degraded);
        let resolution = self.decide(candidate, scored, threshold, degraded);
        debug!(
            action = %resolution.action,
            partition = %partition,
            similarity = resolution.similarity,
            threshold,
            degraded,
            target = ?resolution.target_id(),
            "Dedup decision"
        );
        Ok(resolution)
    }

    /// Pure decision over scored neighbours.
    ///
    /// Priority: exact duplicate, then progressive refinement, then a
    /// complementary ADD, then a plain ADD. Only the symmetric score can
    /// discard a candidate as a duplicate; containment decides whether it
    /// refines or relates to a neighbour.
    pub fn decide(
        &self,
        candidate: &DedupCandidate<'_>,
        neighbors: Vec<ScoredNeighbor>,
        threshold: f32,
        degraded: bool,
    ) -> Resolution {
        let band_floor = (threshold - self.config.refinement_margin).max(0.0);
        let same_pattern = |n: &&ScoredNeighbor| n.record.pattern == candidate.pattern;

        let pick = |action: DedupAction, n: &ScoredNeighbor, similarity: f32, relation: Option<String>| {
            Resolution {
                action,
                target: Some(n.record.clone()),
                relation,
                similarity,
                threshold,
                degraded,
            }
        };

        if let Some(n) = neighbors
            .iter()
            .filter(same_pattern)
            .filter(|n| n.similarity >= threshold)
            .max_by(|a, b| by_score(a, b))
        {
            return pick(DedupAction::Skip, n, n.similarity, None);
        }

        // Every same-pattern neighbour is below the duplicate threshold here
        if let Some(n) = neighbors
            .iter()
            .filter(same_pattern)
            .filter(|n| n.containment >= band_floor)
            .max_by(|a, b| by_containment(a, b))
        {
            // The candidate is always the newer statement, so ties refine
            let action = if specificity(candidate.content) >= specificity(&n.record.content) {
                DedupAction::Update
            } else {
                DedupAction::Merge
            };
            return pick(action, n, n.containment, None);
        }

        if let Some(n) = neighbors
            .iter()
            .filter(|n| n.containment >= threshold)
            .max_by(|a, b| by_containment(a, b))
        {
            let relation = relation_tag(candidate.pattern, &n.record);
            return pick(DedupAction::Add, n, n.containment, Some(relation));
        }

        let mut resolution = Resolution::add(threshold, degraded);
        resolution.similarity = neighbors
            .iter()
            .map(|n| n.similarity)
            .fold(0.0, f32::max);
        resolution
    }
}

fn by_score(a: &ScoredNeighbor, b: &ScoredNeighbor) -> Ordering {
    a.similarity.partial_cmp(&b.similarity).unwrap_or(Ordering::Equal)
}

fn by_containment(a: &ScoredNeighbor, b: &ScoredNeighbor) -> Ordering {
    a.containment
        .partial_cmp(&b.containment)
        .unwrap_or(Ordering::Equal)
}

/// Relationship tag for a complementary ADD
pub fn relation_tag(candidate: StructuralPattern, neighbor: &MemoryRecord) -> String {
    if candidate == StructuralPattern::Solution && neighbor.pattern == StructuralPattern::ErrorReport {
        format!("solves:{}", neighbor.id)
    } else {
        format!("complements:{}", neighbor.id)
    }
}

/// UPDATE: `incoming` replaces the content of `existing` in place.
///
/// Identity, creation time and access history are kept; the previous
/// version is recorded as a `supersedes:` tag. An `incoming` record
/// without an embedding keeps the stored vector, so the record stays
/// reachable by nearest-neighbour lookup; it is still flagged `degraded`.
pub fn refine(existing: &MemoryRecord, incoming: &MemoryRecord) -> MemoryRecord {
    let mut updated = incoming.clone();
    if !incoming.has_embedding() {
        updated.embedding = existing.embedding.clone();
    }
    updated.id = existing.id;
    updated.created_at = existing.created_at;
    updated.access_count = existing.access_count;
    updated.last_accessed_at = incoming.last_accessed_at.max(existing.last_accessed_at);
    updated.retention_class = RetentionClass::Active;

    updated.tags.extend(
        existing
            .tags
            .iter()
            .filter(|t| is_relationship_tag(t) && !t.starts_with("supersedes:"))
            .cloned(),
    );
    let previous: String = existing.fingerprint.chars().take(12).collect();
    if !previous.is_empty() {
        updated.tags.insert(format!("supersedes:{previous}"));
    }
    updated
}

/// MERGE: `existing` keeps its content and absorbs the tags and the higher
/// confidence of `incoming`.
pub fn merge_into(existing: &MemoryRecord, incoming: &MemoryRecord) -> MemoryRecord {
    let mut merged = existing.clone();
    merged.tags.extend(
        incoming
            .tags
            .iter()
            .filter(|t| !is_relationship_tag(t))
            .cloned(),
    );

    let merges = existing
        .tags
        .iter()
        .find_map(|t| t.strip_prefix("merged:").and_then(|n| n.parse::<u32>().ok()))
        .unwrap_or(0);
    merged.tags.retain(|t| !t.starts_with("merged:"));
    merged.tags.insert(format!("merged:{}", merges + 1));

    merged.confidence = existing.confidence.max(incoming.confidence);
    merged.retention_class = RetentionClass::Active;
    merged
}
