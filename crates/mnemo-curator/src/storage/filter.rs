//! Filter criteria for listing stored records
//!
//! The same filter is evaluated in process by [`RecordFilter::matches`]
//! and pushed down to LanceDB as a SQL `WHERE` clause.

use crate::memory::types::{MemoryRecord, RetentionClass};

/// Filter criteria for record listings.
///
/// All fields are optional - when `None`, that filter is not applied.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Category equals this prefix or lies beneath it
    pub category_prefix: Option<String>,
    pub retention_class: Option<RetentionClass>,
    pub fingerprint: Option<String>,
    /// Only records stored with an embedding
    pub embedded_only: bool,
}

impl RecordFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.category_prefix = Some(prefix.into());
        self
    }

    pub fn with_retention_class(mut self, class: RetentionClass) -> Self {
        self.retention_class = Some(class);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn embedded_only(mut self) -> Self {
        self.embedded_only = true;
        self
    }

    /// In-process evaluation
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(prefix) = &self.category_prefix {
            if !record.category_path.is_under(prefix) {
                return false;
            }
        }
        if let Some(class) = self.retention_class {
            if record.retention_class != class {
                return false;
            }
        }
        if let Some(fingerprint) = &self.fingerprint {
            if &record.fingerprint != fingerprint {
                return false;
            }
        }
        !self.embedded_only || record.has_embedding()
    }

    /// Build a SQL WHERE clause from this filter.
    /// Returns `None` if no filters are set.
    pub fn to_sql_clause(&self) -> Option<String> {
        let mut conditions = Vec::new();

        if let Some(prefix) = &self.category_prefix {
            let prefix = escape(prefix);
            conditions.push(format!(
                "(category = '{prefix}' OR category LIKE '{}/%')",
                escape_like(&prefix)
            ));
        }

        if let Some(class) = self.retention_class {
            conditions.push(format!("retention_class = '{}'", class.as_str()));
        }

        if let Some(fingerprint) = &self.fingerprint {
            conditions.push(format!("fingerprint = '{}'", escape(fingerprint)));
        }

        if self.embedded_only {
            conditions.push("has_embedding = true".to_string());
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.category_prefix.is_none()
            && self.retention_class.is_none()
            && self.fingerprint.is_none()
            && !self.embedded_only
    }
}

/// Escape a value for use inside a single-quoted SQL string literal
pub fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

fn escape_like(value: &str) -> String {
    value.replace('%', "\\%").replace('_', "\\_")
}

/// `id IN (...)` clause for a batch of ids
pub fn id_in_clause(ids: &[uuid::Uuid]) -> String {
    let list = ids
        .iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("id IN ({list})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::CategoryPath;
    use std::str::FromStr;

    #[test]
    fn test_empty_filter() {
        let filter = RecordFilter::new();
        assert!(filter.is_empty());
        assert!(filter.to_sql_clause().is_none());
    }

    #[test]
    fn test_category_prefix_clause() {
        let filter = RecordFilter::new().with_category_prefix("operations/deployment");
        assert_eq!(
            filter.to_sql_clause().unwrap(),
            "(category = 'operations/deployment' OR category LIKE 'operations/deployment/%')"
        );
    }

    #[test]
    fn test_like_wildcards_are_escaped() {
        let filter = RecordFilter::new().with_category_prefix("development/best_practice");
        let sql = filter.to_sql_clause().unwrap();
        assert!(sql.contains("LIKE 'development/best\\_practice/%'"));
    }

    #[test]
    fn test_combined_filters() {
        let filter = RecordFilter::new()
            .with_category_prefix("knowledge")
            .with_retention_class(RetentionClass::EvictionCandidate)
            .with_fingerprint("it's")
            .embedded_only();

        let sql = filter.to_sql_clause().unwrap();
        assert!(sql.contains("retention_class = 'eviction_candidate'"));
        assert!(sql.contains("fingerprint = 'it''s'"));
        assert!(sql.contains("has_embedding = true"));
        assert_eq!(sql.matches(" AND ").count(), 3);
    }

    #[test]
    fn test_in_process_matching() {
        let mut record = MemoryRecord::new(
            "x".to_string(),
            Vec::new(),
            CategoryPath::from_str("operations/deployment/docker").unwrap(),
        );
        record.fingerprint = "abc".to_string();

        assert!(RecordFilter::new().with_category_prefix("operations").matches(&record));
        assert!(!RecordFilter::new().with_category_prefix("operations/deploy").matches(&record));
        assert!(RecordFilter::new().with_fingerprint("abc").matches(&record));
        assert!(!RecordFilter::new().embedded_only().matches(&record));
        assert!(
            !RecordFilter::new()
                .with_retention_class(RetentionClass::EvictionCandidate)
                .matches(&record)
        );
    }

    #[test]
    fn test_id_in_clause() {
        let id = uuid::Uuid::nil();
        assert_eq!(
            id_in_clause(&[id]),
            "id IN ('00000000-0000-0000-0000-000000000000')"
        );
    }
}
