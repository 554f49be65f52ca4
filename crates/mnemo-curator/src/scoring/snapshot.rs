//! Versioned, copy-on-write scoring state

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::FactorWeights;
use crate::error::Result;
use crate::memory::types::CategoryPath;

/// Neutral prior used when a category has no feedback history
pub const NEUTRAL_PRIOR: f32 = 0.5;

/// Everything `score()` reads besides its direct inputs.
///
/// Snapshots are immutable once published; adaptation builds a new one with
/// `version + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringSnapshot {
    pub version: u64,
    pub weights: FactorWeights,
    /// EMA of usefulness feedback keyed by full category path
    pub category_feedback: HashMap<String, f32>,
    /// Feedback events folded in so far
    pub feedback_events: u64,
}

impl ScoringSnapshot {
    pub fn new(weights: FactorWeights) -> Self {
        Self {
            version: 0,
            weights,
            category_feedback: HashMap::new(),
            feedback_events: 0,
        }
    }

    /// Historical factor for a category: the most specific ancestor with
    /// feedback, else the neutral prior
    pub fn historical_factor(&self, category: &CategoryPath) -> f32 {
        category
            .ancestors()
            .iter()
            .find_map(|prefix| self.category_feedback.get(prefix).copied())
            .filter(|v| v.is_finite())
            .unwrap_or(NEUTRAL_PRIOR)
    }

    /// Read a snapshot saved by [`Self::save`]; `None` if the file is absent
    pub async fn load_from(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write as JSON through a temporary file and rename
    pub async fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(self)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Shared handle publishing snapshots atomically.
///
/// Readers clone the `Arc` and score against a stable version; writers swap
/// in a new snapshot under the write lock.
#[derive(Debug)]
pub struct SnapshotHandle {
    current: RwLock<Arc<ScoringSnapshot>>,
}

impl SnapshotHandle {
    pub fn new(snapshot: ScoringSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn load(&self) -> Arc<ScoringSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Replace the current snapshot as-is, keeping its version
    pub fn restore(&self, snapshot: ScoringSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Build the next snapshot from the current one and publish it.
    /// The version is bumped here; `update` must not touch it.
    pub fn publish<F>(&self, update: F) -> Arc<ScoringSnapshot>
    where
        F: FnOnce(&ScoringSnapshot) -> ScoringSnapshot,
    {
        let mut guard = self.current.write();
        let mut next = update(&guard);
        next.version = guard.version + 1;
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        next
    }
}
