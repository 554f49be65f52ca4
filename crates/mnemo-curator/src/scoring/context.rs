//! Per-profile category weights for the context boost factor

use std::collections::HashMap;

use crate::memory::types::{CategoryPath, ContextProfile, TopCategory};

/// Weight used when neither the built-in table nor an override covers a category
pub const DEFAULT_CONTEXT_WEIGHT: f32 = 0.5;

/// Built-in weight of a top-level branch under a profile
pub fn builtin_weight(profile: ContextProfile, top: TopCategory) -> f32 {
    use ContextProfile::*;
    use TopCategory::*;

    match (profile, top) {
        (AutonomousCoding, Development) => 0.9,
        (AutonomousCoding, Operations) => 0.7,
        (AutonomousCoding, Troubleshooting) => 0.6,
        (AutonomousCoding, Knowledge) => 0.5,
        (InteractiveDebugging, Troubleshooting) => 0.9,
        (InteractiveDebugging, Development) => 0.6,
        (InteractiveDebugging, Operations) => 0.6,
        (InteractiveDebugging, Knowledge) => 0.4,
        (KnowledgeBuilding, Knowledge) => 0.9,
        (KnowledgeBuilding, Development) => 0.6,
        (KnowledgeBuilding, Troubleshooting) => 0.5,
        (KnowledgeBuilding, Operations) => 0.5,
    }
}

/// Context weight tables: built-in per-branch weights refined by
/// configured overrides keyed by category prefix.
#[derive(Debug, Clone, Default)]
pub struct ContextTable {
    overrides: HashMap<ContextProfile, HashMap<String, f32>>,
}

impl ContextTable {
    pub fn new(overrides: HashMap<ContextProfile, HashMap<String, f32>>) -> Self {
        Self { overrides }
    }

    /// Relevance of `category` under `profile`, in [0, 1]
    pub fn weight(&self, profile: ContextProfile, category: &CategoryPath) -> f32 {
        let configured = self.overrides.get(&profile).and_then(|table| {
            category
                .ancestors()
                .iter()
                .find_map(|prefix| table.get(prefix).copied())
        });

        let weight = match configured {
            Some(w) => w,
            None if category.is_uncategorized() => DEFAULT_CONTEXT_WEIGHT,
            None => builtin_weight(profile, category.top()),
        };
        if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            DEFAULT_CONTEXT_WEIGHT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_builtin_weights_follow_profile() {
        let table = ContextTable::default();
        let error = CategoryPath::from_str("troubleshooting/error").unwrap();
        assert!(
            table.weight(ContextProfile::InteractiveDebugging, &error)
                > table.weight(ContextProfile::KnowledgeBuilding, &error)
        );
        assert_eq!(
            table.weight(ContextProfile::AutonomousCoding, &CategoryPath::uncategorized()),
            DEFAULT_CONTEXT_WEIGHT
        );
    }

    #[test]
    fn test_overrides_win_by_most_specific_prefix() {
        let mut knowledge = HashMap::new();
        knowledge.insert("development".to_string(), 0.2);
        knowledge.insert("development/testing".to_string(), 1.0);
        let mut overrides = HashMap::new();
        overrides.insert(ContextProfile::KnowledgeBuilding, knowledge);
        let table = ContextTable::new(overrides);

        let testing = CategoryPath::from_str("development/testing/rust").unwrap();
        let impl_path = CategoryPath::from_str("development/implementation").unwrap();
        assert_eq!(table.weight(ContextProfile::KnowledgeBuilding, &testing), 1.0);
        assert_eq!(table.weight(ContextProfile::KnowledgeBuilding, &impl_path), 0.2);
        assert_eq!(table.weight(ContextProfile::AutonomousCoding, &testing), 0.9);
    }
}
