//! Multi-factor confidence scoring
//!
//! Four factors, each normalised to [0, 1], combined with the weights of the
//! current [`ScoringSnapshot`]:
//!
//! 1. extraction confidence reported upstream (classification confidence
//!    when absent)
//! 2. a content-quality heuristic
//! 3. a context boost from per-profile category tables
//! 4. the historical usefulness of the category
//!
//! `score()` is pure given its inputs and the snapshot.

pub mod context;
pub mod feedback;
pub mod snapshot;

use crate::config::{FactorWeights, ScoringConfig};
use crate::memory::types::{CategoryPath, ContextProfile};
use crate::text::{count_phrases, tokens, word_haystack};

pub use context::ContextTable;
pub use feedback::FeedbackAggregator;
pub use snapshot::{NEUTRAL_PRIOR, ScoringSnapshot, SnapshotHandle};

/// Tokens at which the specificity part of the quality factor saturates
const SPECIFIC_TOKEN_COUNT: f32 = 15.0;

const EXAMPLE_PHRASES: &[&str] = &["for example", "for instance", "e g", "such as", "example"];
const HEDGE_PHRASES: &[&str] = &[
    "maybe", "might", "perhaps", "probably", "possibly", "not sure", "i think", "i guess",
];
const CONTRADICTION_PHRASES: &[&str] = &["but actually", "or maybe not", "not always", "or not"];

/// Inputs to [`ConfidenceScorer::score`] for one candidate
#[derive(Debug, Clone)]
pub struct ScoreInput<'a> {
    pub content: &'a str,
    pub category_path: &'a CategoryPath,
    pub classification_confidence: f32,
    /// Classification fell back to the uncategorized path
    pub low_confidence: bool,
    pub context_profile: ContextProfile,
    pub extraction_confidence: Option<f32>,
}

/// Individual factor values before weighting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factors {
    pub extraction: f32,
    pub quality: f32,
    pub context: f32,
    pub history: f32,
}

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    context: ContextTable,
    uncategorized_penalty: f32,
}

impl ConfidenceScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            context: ContextTable::new(config.profile_overrides.clone()),
            uncategorized_penalty: unit_or_neutral(config.uncategorized_penalty),
        }
    }

    pub fn factors(&self, input: &ScoreInput<'_>, snapshot: &ScoringSnapshot) -> Factors {
        Factors {
            extraction: unit_or_neutral(
                input
                    .extraction_confidence
                    .unwrap_or(input.classification_confidence),
            ),
            quality: quality_factor(input.content),
            context: self
                .context
                .weight(input.context_profile, input.category_path),
            history: unit_or_neutral(snapshot.historical_factor(input.category_path)),
        }
    }

    /// Confidence in [0, 1]; never NaN
    pub fn score(&self, input: &ScoreInput<'_>, snapshot: &ScoringSnapshot) -> f32 {
        let factors = self.factors(input, snapshot);
        let mut score = combine(&factors, &snapshot.weights);
        if input.low_confidence {
            score *= self.uncategorized_penalty;
        }
        unit_or_neutral(score)
    }
}

/// Weighted mean of the factors; 0.5 when no usable weight is configured
pub fn combine(factors: &Factors, weights: &FactorWeights) -> f32 {
    let pairs = [
        (weights.extraction, factors.extraction),
        (weights.quality, factors.quality),
        (weights.context, factors.context),
        (weights.history, factors.history),
    ];
    let mut total = 0.0;
    let mut sum = 0.0;
    for (weight, value) in pairs {
        let weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
        total += weight;
        sum += weight * unit_or_neutral(value);
    }
    if total <= f32::EPSILON {
        return NEUTRAL_PRIOR;
    }
    unit_or_neutral(sum / total)
}

/// Content-quality heuristic: specificity, concrete examples or code,
/// minus hedging and self-contradiction.
pub fn quality_factor(content: &str) -> f32 {
    let haystack = word_haystack(content);
    let token_count = tokens(content).len() as f32;

    let mut quality = 0.4 + 0.3 * (token_count / SPECIFIC_TOKEN_COUNT).min(1.0);
    if looks_like_code(content) {
        quality += 0.1;
    }
    if count_phrases(&haystack, EXAMPLE_PHRASES) > 0 {
        quality += 0.1;
    }
    if content.chars().any(|c| c.is_ascii_digit()) {
        quality += 0.05;
    }
    let hedges = count_phrases(&haystack, HEDGE_PHRASES).min(2) as f32;
    quality -= 0.15 * hedges;
    if count_phrases(&haystack, CONTRADICTION_PHRASES) > 0 {
        quality -= 0.1;
    }
    unit_or_neutral(quality)
}

/// Multiplicative penalty for candidates matched without embeddings.
/// Strictly lowers any positive score when `penalty` is in (0, 1].
pub fn apply_degraded_penalty(score: f32, penalty: f32) -> f32 {
    let penalty = if penalty.is_finite() { penalty.clamp(0.0, 1.0) } else { 0.0 };
    unit_or_neutral(score * (1.0 - penalty))
}

fn looks_like_code(content: &str) -> bool {
    content.contains('`')
        || content.contains("::")
        || content.contains("()")
        || content.contains("=>")
        || content.contains("->")
}

/// Clamp into [0, 1], mapping NaN and infinities to the neutral prior
pub fn unit_or_neutral(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        NEUTRAL_PRIOR
    }
}
