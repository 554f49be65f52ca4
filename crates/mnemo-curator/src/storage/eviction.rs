//! Retention policy evaluation and purge selection
//!
//! The [`Evictor`] is pure: it ranks records and decides which ones become
//! eviction candidates. The [`StorageManager`](super::StorageManager)
//! persists the marks and commits purges.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{HybridWeights, RetentionConfig, RetentionPolicy, SweepConfig};
use crate::memory::tombstone::EvictionReason;
use crate::memory::types::{ContextProfile, MemoryRecord, RetentionClass};
use crate::scoring::context::ContextTable;

/// How purge candidates are ranked within a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStrategy {
    /// Least recently accessed first
    Lru,
    /// Lowest confidence and access count first
    Priority,
    /// Least relevant to the active context profile first
    ContextAware,
    /// Weighted blend of the other three
    #[default]
    Hybrid,
}

impl EvictionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionStrategy::Lru => "lru",
            EvictionStrategy::Priority => "priority",
            EvictionStrategy::ContextAware => "context_aware",
            EvictionStrategy::Hybrid => "hybrid",
        }
    }
}

/// One record selected for eviction
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEviction {
    pub id: Uuid,
    /// Retention scope the record was counted in
    pub scope: String,
    /// Lock partition of the record
    pub partition: String,
    pub reason: EvictionReason,
    pub keep_score: f32,
}

/// Outcome of evaluating every scope against its policy
#[derive(Debug, Clone, Default)]
pub struct EvictionPlan {
    /// Selected records, lowest keep score first within each scope
    pub candidates: Vec<PlannedEviction>,
    /// Records marked in an earlier sweep that no longer qualify
    pub released: Vec<Uuid>,
    /// Record count per scope at planning time
    pub scope_counts: BTreeMap<String, usize>,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.released.is_empty()
    }
}

/// Ranks records and applies retention policies.
#[derive(Debug, Clone)]
pub struct Evictor {
    strategy: EvictionStrategy,
    weights: HybridWeights,
    profile: ContextProfile,
    context: ContextTable,
    retention: RetentionConfig,
}

impl Evictor {
    pub fn new(sweep: &SweepConfig, retention: &RetentionConfig, context: ContextTable) -> Self {
        Self {
            strategy: sweep.strategy,
            weights: sweep.hybrid_weights,
            profile: sweep.active_profile,
            context,
            retention: retention.clone(),
        }
    }

    pub fn strategy(&self) -> EvictionStrategy {
        self.strategy
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    /// Higher score = keep longer. Always in [0, 1].
    pub fn keep_score(&self, record: &MemoryRecord, now: DateTime<Utc>) -> f32 {
        let score = match self.strategy {
            EvictionStrategy::Lru => lru_score(record, now),
            EvictionStrategy::Priority => priority_score(record),
            EvictionStrategy::ContextAware => self.context_score(record),
            EvictionStrategy::Hybrid => {
                let w = self.weights;
                let total = w.lru.max(0.0) + w.priority.max(0.0) + w.context.max(0.0);
                if total <= 0.0 {
                    lru_score(record, now)
                } else {
                    (w.lru.max(0.0) * lru_score(record, now)
                        + w.priority.max(0.0) * priority_score(record)
                        + w.context.max(0.0) * self.context_score(record))
                        / total
                }
            }
        };
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.5
        }
    }

    fn context_score(&self, record: &MemoryRecord) -> f32 {
        self.context.weight(self.profile, &record.category_path)
    }

    /// Protected records are never selected, whatever their age or rank
    pub fn is_protected(&self, record: &MemoryRecord, policy: &RetentionPolicy) -> bool {
        record.confidence >= policy.protect_confidence
            || record.access_count >= policy.protect_access_count
    }

    pub fn is_expired(&self, record: &MemoryRecord, policy: &RetentionPolicy, now: DateTime<Utc>) -> bool {
        now - record.created_at > Duration::days(policy.max_age_days)
    }

    /// Whether `record` still qualifies for purging when its scope holds
    /// `scope_count` records. Used to revalidate a candidate at commit time.
    pub fn qualifies(
        &self,
        record: &MemoryRecord,
        scope_count: usize,
        now: DateTime<Utc>,
    ) -> Option<EvictionReason> {
        let policy = self.retention.policy_for(&record.category_path);
        if scope_count <= policy.min_count || self.is_protected(record, &policy) {
            return None;
        }
        if self.is_expired(record, &policy, now) {
            Some(EvictionReason::Expired)
        } else if scope_count > policy.max_records {
            Some(EvictionReason::CapacityPressure)
        } else {
            None
        }
    }

    /// Evaluate every retention scope present in `records`
    pub fn plan(&self, records: &[MemoryRecord], now: DateTime<Utc>) -> EvictionPlan {
        let mut scopes: BTreeMap<String, Vec<&MemoryRecord>> = BTreeMap::new();
        for record in records {
            scopes
                .entry(self.retention.scope_for(&record.category_path))
                .or_default()
                .push(record);
        }

        let mut plan = EvictionPlan::default();
        for (scope, members) in scopes {
            plan.scope_counts.insert(scope.clone(), members.len());
            let selected = self.plan_scope(&scope, &members, now);

            let chosen: HashSet<Uuid> = selected.iter().map(|p| p.id).collect();
            plan.released.extend(
                members
                    .iter()
                    .filter(|r| r.retention_class == RetentionClass::EvictionCandidate)
                    .filter(|r| !chosen.contains(&r.id))
                    .map(|r| r.id),
            );
            plan.candidates.extend(selected);
        }
        plan
    }

    fn plan_scope(&self, scope: &str, members: &[&MemoryRecord], now: DateTime<Utc>) -> Vec<PlannedEviction> {
        // Every member of a scope shares the policy of the scope's prefix
        let policy = members
            .first()
            .map(|r| self.retention.policy_for(&r.category_path))
            .unwrap_or(self.retention.default);

        let count = members.len();
        let allowance = count.saturating_sub(policy.min_count);
        if allowance == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<PlannedEviction> = members
            .iter()
            .filter(|r| !self.is_protected(r, &policy))
            .map(|r| PlannedEviction {
                id: r.id,
                scope: scope.to_string(),
                partition: r.category_path.partition(),
                reason: if self.is_expired(r, &policy, now) {
                    EvictionReason::Expired
                } else {
                    EvictionReason::CapacityPressure
                },
                keep_score: self.keep_score(r, now),
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.keep_score
                .partial_cmp(&b.keep_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let excess = count.saturating_sub(policy.max_records);
        let mut capacity_taken = 0;
        let mut selected: Vec<PlannedEviction> = ranked
            .into_iter()
            .filter(|p| match p.reason {
                EvictionReason::Expired => true,
                EvictionReason::CapacityPressure => {
                    capacity_taken += 1;
                    capacity_taken <= excess
                }
            })
            .collect();

        // Expired records claim the allowance before capacity-only picks
        selected.sort_by_key(|p| p.reason != EvictionReason::Expired);
        selected.truncate(allowance);
        selected
    }
}

fn lru_score(record: &MemoryRecord, now: DateTime<Utc>) -> f32 {
    let hours = (now - record.last_accessed_at).num_hours().max(0) as f32;
    1.0 / (1.0 + hours / 24.0)
}

fn priority_score(record: &MemoryRecord) -> f32 {
    let access = 1.0 - 1.0 / (1.0 + record.access_count as f32);
    0.7 * record.confidence + 0.3 * access
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::CategoryPath;
    use std::str::FromStr;

    fn record(category: &str, age_days: i64, confidence: f32) -> MemoryRecord {
        let mut r = MemoryRecord::new(
            format!("note {age_days}"),
            Vec::new(),
            CategoryPath::from_str(category).unwrap(),
        );
        let at = Utc::now() - Duration::days(age_days);
        r.created_at = at;
        r.last_accessed_at = at;
        r.confidence = confidence;
        r
    }

    fn evictor(strategy: EvictionStrategy, retention: RetentionConfig) -> Evictor {
        let sweep = SweepConfig {
            strategy,
            ..SweepConfig::default()
        };
        Evictor::new(&sweep, &retention, ContextTable::default())
    }

    fn retention(min_count: usize, max_age_days: i64, max_records: usize) -> RetentionConfig {
        RetentionConfig {
            default: RetentionPolicy {
                min_count,
                max_age_days,
                max_records,
                ..RetentionPolicy::default()
            },
            ..RetentionConfig::default()
        }
    }

    mod scoring {
        use super::*;

        #[test]
        fn test_lru_prefers_recent() {
            let e = evictor(EvictionStrategy::Lru, RetentionConfig::default());
            let now = Utc::now();
            let fresh = record("knowledge/concept", 0, 0.5);
            let stale = record("knowledge/concept", 30, 0.5);
            assert!(e.keep_score(&fresh, now) > e.keep_score(&stale, now));
        }

        #[test]
        fn test_priority_prefers_confident_and_used() {
            let e = evictor(EvictionStrategy::Priority, RetentionConfig::default());
            let now = Utc::now();
            let low = record("knowledge/concept", 1, 0.2);
            let mut used = record("knowledge/concept", 1, 0.2);
            used.access_count = 5;
            let high = record("knowledge/concept", 1, 0.8);
            assert!(e.keep_score(&high, now) > e.keep_score(&low, now));
            assert!(e.keep_score(&used, now) > e.keep_score(&low, now));
        }

        #[test]
        fn test_context_aware_follows_profile() {
            let e = evictor(EvictionStrategy::ContextAware, RetentionConfig::default());
            let now = Utc::now();
            let dev = record("development/testing", 1, 0.5);
            let knowledge = record("knowledge/concept", 1, 0.5);
            assert!(e.keep_score(&dev, now) > e.keep_score(&knowledge, now));
        }

        #[test]
        fn test_hybrid_stays_in_unit_range() {
            let e = evictor(EvictionStrategy::Hybrid, RetentionConfig::default());
            let mut r = record("operations/deployment", 400, 1.0);
            r.access_count = u32::MAX;
            let score = e.keep_score(&r, Utc::now());
            assert!((0.0..=1.0).contains(&score));
        }
    }

    mod planning {
        use super::*;

        #[test]
        fn test_min_count_floor_blocks_eviction() {
            let e = evictor(EvictionStrategy::Hybrid, retention(5, 30, 1000));
            let records: Vec<_> = (0..5)
                .map(|i| record("operations/deployment", 100 + i, 0.3))
                .collect();
            let plan = e.plan(&records, Utc::now());
            assert!(plan.candidates.is_empty());
            assert_eq!(plan.scope_counts["operations/deployment"], 5);
        }

        #[test]
        fn test_expired_above_floor_selected() {
            let e = evictor(EvictionStrategy::Lru, retention(2, 30, 1000));
            let mut records: Vec<_> = (0..4)
                .map(|i| record("development/testing", 60 + i, 0.3))
                .collect();
            records.push(record("development/testing", 1, 0.3));

            let plan = e.plan(&records, Utc::now());
            assert_eq!(plan.candidates.len(), 3);
            assert!(
                plan.candidates
                    .iter()
                    .all(|p| p.reason == EvictionReason::Expired)
            );
            // Oldest access goes first under lru
            assert_eq!(plan.candidates[0].id, records[3].id);
        }

        #[test]
        fn test_protected_records_never_selected() {
            let e = evictor(EvictionStrategy::Hybrid, retention(0, 30, 1000));
            let confident = record("knowledge/concept", 200, 0.9);
            let mut popular = record("knowledge/concept", 200, 0.1);
            popular.access_count = 10;
            let plain = record("knowledge/concept", 200, 0.1);

            let plan = e.plan(&[confident, popular, plain.clone()], Utc::now());
            let ids: Vec<_> = plan.candidates.iter().map(|p| p.id).collect();
            assert_eq!(ids, vec![plain.id]);
        }

        #[test]
        fn test_capacity_pressure_selects_excess() {
            let e = evictor(EvictionStrategy::Priority, retention(1, 365, 3));
            let records: Vec<_> = [0.1, 0.2, 0.3, 0.4, 0.5]
                .into_iter()
                .map(|c| record("development/architecture", 1, c))
                .collect();

            let plan = e.plan(&records, Utc::now());
            assert_eq!(plan.candidates.len(), 2);
            assert!(
                plan.candidates
                    .iter()
                    .all(|p| p.reason == EvictionReason::CapacityPressure)
            );
            assert_eq!(plan.candidates[0].id, records[0].id);
            assert_eq!(plan.candidates[1].id, records[1].id);
        }

        #[test]
        fn test_expired_wins_allowance_over_capacity() {
            let e = evictor(EvictionStrategy::Priority, retention(3, 30, 3));
            let mut records: Vec<_> = [0.1, 0.2, 0.3]
                .into_iter()
                .map(|c| record("development/architecture", 1, c))
                .collect();
            let expired = record("development/architecture", 60, 0.6);
            records.push(expired.clone());

            let plan = e.plan(&records, Utc::now());
            assert_eq!(plan.candidates.len(), 1);
            assert_eq!(plan.candidates[0].id, expired.id);
            assert_eq!(plan.candidates[0].reason, EvictionReason::Expired);
        }

        #[test]
        fn test_stale_marks_released() {
            let e = evictor(EvictionStrategy::Hybrid, retention(0, 30, 1000));
            let mut refreshed = record("knowledge/concept", 1, 0.3);
            refreshed.retention_class = RetentionClass::EvictionCandidate;

            let plan = e.plan(&[refreshed.clone()], Utc::now());
            assert!(plan.candidates.is_empty());
            assert_eq!(plan.released, vec![refreshed.id]);
        }

        #[test]
        fn test_scopes_follow_configured_prefixes() {
            let mut config = retention(0, 30, 1000);
            config.categories.insert(
                "operations/deployment".to_string(),
                RetentionPolicy {
                    min_count: 5,
                    max_age_days: 30,
                    ..RetentionPolicy::default()
                },
            );
            let e = evictor(EvictionStrategy::Hybrid, config);
            let records = vec![
                record("operations/deployment/docker", 100, 0.3),
                record("operations/deployment/kubernetes", 100, 0.3),
                record("operations/monitoring", 100, 0.3),
            ];

            let plan = e.plan(&records, Utc::now());
            assert_eq!(plan.scope_counts["operations/deployment"], 2);
            assert_eq!(plan.candidates.len(), 1);
            assert_eq!(plan.candidates[0].scope, "operations/monitoring");
        }
    }

    mod revalidation {
        use super::*;

        #[test]
        fn test_qualifies_respects_floor_and_protection() {
            let e = evictor(EvictionStrategy::Hybrid, retention(2, 30, 1000));
            let now = Utc::now();
            let old = record("knowledge/concept", 100, 0.3);
            assert_eq!(e.qualifies(&old, 3, now), Some(EvictionReason::Expired));
            assert_eq!(e.qualifies(&old, 2, now), None);

            let mut rescued = old.clone();
            rescued.access_count = 10;
            assert_eq!(e.qualifies(&rescued, 3, now), None);

            let young = record("knowledge/concept", 1, 0.3);
            assert_eq!(e.qualifies(&young, 3, now), None);
            assert_eq!(
                e.qualifies(&young, 1001, now),
                Some(EvictionReason::CapacityPressure)
            );
        }
    }
}
