//! Folding usefulness feedback into the scoring snapshot

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{FactorWeights, ScoringConfig};
use crate::memory::types::CategoryPath;
use crate::scoring::snapshot::{NEUTRAL_PRIOR, ScoringSnapshot, SnapshotHandle};

/// Upper bound for the adapted history weight, as a share of the total
const MAX_HISTORY_SHARE: f32 = 0.5;

/// Mean feedback must differ from the prior by at least this much to adapt
const DISAGREEMENT_THRESHOLD: f32 = 0.1;

/// Maintains the per-category feedback EMA and periodically adapts the
/// factor weights. Every call publishes a new snapshot.
#[derive(Debug, Clone)]
pub struct FeedbackAggregator {
    handle: Arc<SnapshotHandle>,
    alpha: f32,
    adapt_every: u32,
    adapt_rate: f32,
}

impl FeedbackAggregator {
    pub fn new(handle: Arc<SnapshotHandle>, config: &ScoringConfig) -> Self {
        Self {
            handle,
            alpha: config.feedback_alpha.clamp(0.0, 1.0),
            adapt_every: config.adapt_every,
            adapt_rate: config.adapt_rate.max(0.0),
        }
    }

    pub fn record(&self, category: &CategoryPath, useful: bool) -> Arc<ScoringSnapshot> {
        let key = category.to_string();
        let observed = if useful { 1.0 } else { 0.0 };

        let published = self.handle.publish(|current| {
            let mut next = current.clone();
            let previous = next
                .category_feedback
                .get(&key)
                .copied()
                .unwrap_or(NEUTRAL_PRIOR);
            let ema = self.alpha * observed + (1.0 - self.alpha) * previous;
            next.category_feedback.insert(key.clone(), ema);
            next.feedback_events += 1;

            if self.adapt_every > 0 && next.feedback_events % u64::from(self.adapt_every) == 0 {
                next.weights = adapt_weights(&next.weights, &next.category_feedback, self.adapt_rate);
            }
            next
        });

        tracing::debug!(
            category = %category,
            useful,
            version = published.version,
            "Recorded feedback"
        );
        published
    }
}

/// Shift weight toward the historical factor when feedback, on average,
/// disagrees with the neutral prior. The weight total is preserved.
pub fn adapt_weights(
    weights: &FactorWeights,
    feedback: &HashMap<String, f32>,
    rate: f32,
) -> FactorWeights {
    if feedback.is_empty() {
        return *weights;
    }
    let mean = feedback.values().sum::<f32>() / feedback.len() as f32;
    if !mean.is_finite() || (mean - NEUTRAL_PRIOR).abs() < DISAGREEMENT_THRESHOLD {
        return *weights;
    }

    let total = weights.extraction + weights.quality + weights.context + weights.history;
    if !total.is_finite() || total <= f32::EPSILON {
        return *weights;
    }

    let history = (weights.history + rate * total).min(MAX_HISTORY_SHARE * total);
    let others = total - weights.history;
    if history <= weights.history || others <= f32::EPSILON {
        return *weights;
    }
    let scale = (total - history) / others;

    let adapted = FactorWeights {
        extraction: weights.extraction * scale,
        quality: weights.quality * scale,
        context: weights.context * scale,
        history,
    };
    tracing::info!(
        history_weight = adapted.history,
        mean_feedback = mean,
        "Adapted scoring weights"
    );
    adapted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn aggregator(adapt_every: u32) -> (Arc<SnapshotHandle>, FeedbackAggregator) {
        let handle = Arc::new(SnapshotHandle::new(ScoringSnapshot::new(
            FactorWeights::default(),
        )));
        let config = ScoringConfig {
            adapt_every,
            ..ScoringConfig::default()
        };
        let aggregator = FeedbackAggregator::new(Arc::clone(&handle), &config);
        (handle, aggregator)
    }

    #[test]
    fn test_ema_update() {
        let (handle, agg) = aggregator(0);
        let path = CategoryPath::from_str("development/testing").unwrap();

        agg.record(&path, true);
        let snap = handle.load();
        // 0.2 * 1.0 + 0.8 * 0.5
        assert!((snap.category_feedback["development/testing"] - 0.6).abs() < 1e-6);
        assert_eq!(snap.version, 1);
        assert_eq!(snap.weights, FactorWeights::default());
    }

    #[test]
    fn test_negative_feedback_adapts_weights_after_window() {
        let (handle, agg) = aggregator(20);
        let path = CategoryPath::from_str("operations/deployment").unwrap();

        for _ in 0..19 {
            agg.record(&path, false);
        }
        assert_eq!(handle.load().weights, FactorWeights::default());

        agg.record(&path, false);
        let snap = handle.load();
        assert_eq!(snap.version, 20);
        assert!(snap.weights.history > FactorWeights::default().history);

        let total = snap.weights.extraction
            + snap.weights.quality
            + snap.weights.context
            + snap.weights.history;
        assert!((total - 1.0).abs() < 1e-5, "total weight preserved, got {total}");
    }

    #[test]
    fn test_agreeing_feedback_leaves_weights() {
        let mut feedback = HashMap::new();
        feedback.insert("development".to_string(), 0.52);
        let weights = FactorWeights::default();
        assert_eq!(adapt_weights(&weights, &feedback, 0.05), weights);
    }

    #[test]
    fn test_history_share_is_capped() {
        let mut feedback = HashMap::new();
        feedback.insert("knowledge".to_string(), 0.0);
        let mut weights = FactorWeights::default();
        for _ in 0..100 {
            weights = adapt_weights(&weights, &feedback, 0.05);
        }
        assert!(weights.history <= 0.5 + 1e-5);
    }
}
