//! Tombstone records for purged memories
//!
//! A tombstone is written for every record a sweep purges, preserving enough
//! metadata to explain what was lost and why.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::types::CategoryPath;

/// Why a sweep marked a record as an eviction candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Older than the category's maximum age
    Expired,
    /// Category held more records than its configured capacity
    CapacityPressure,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::CapacityPressure => "capacity_pressure",
        }
    }
}

/// A tombstone record for a purged memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tombstone {
    /// Identifier of the purged record
    pub original_id: Uuid,
    /// Category the record lived in
    pub category_path: CategoryPath,
    /// When the purge was committed
    pub purged_at: DateTime<Utc>,
    /// Creation time of the purged record
    pub approximate_date: DateTime<Utc>,
    /// Confidence the record had when it was purged
    pub confidence: f32,
    pub reason: EvictionReason,
    /// Name of the purge selection strategy in effect
    pub strategy: String,
}

impl Tombstone {
    pub fn new(
        original_id: Uuid,
        category_path: CategoryPath,
        approximate_date: DateTime<Utc>,
        confidence: f32,
        reason: EvictionReason,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            original_id,
            category_path,
            purged_at: Utc::now(),
            approximate_date,
            confidence,
            reason,
            strategy: strategy.into(),
        }
    }
}

impl fmt::Display for Tombstone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason_str = match self.reason {
            EvictionReason::Expired => "exceeding its maximum age",
            EvictionReason::CapacityPressure => "category capacity pressure",
        };

        write!(
            f,
            "A {} memory from {} (confidence {:.2}) was purged by the {} strategy due to {}.",
            self.category_path,
            self.approximate_date.format("%B %Y"),
            self.confidence,
            self.strategy,
            reason_str
        )
    }
}
