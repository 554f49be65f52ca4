//! Rule-based tagging of candidate memories
//!
//! Tags come from a static, ordered list of [`TagRule`]s. Each rule looks at
//! the content, the category and the source context and proposes zero or
//! more tags with a rule confidence; proposals at or below the acceptance
//! threshold are dropped. Relationship tags are not produced here; the
//! deduplicator adds them once it knows the neighbour.

pub mod rules;

use std::collections::BTreeSet;

use crate::config::TaggerConfig;
use crate::memory::types::{CategoryPath, SourceContext};
use crate::text::word_haystack;

pub use rules::{RULES, TagRule};

/// Input shared by every rule for one candidate
pub struct TagInput<'a> {
    pub content: &'a str,
    /// `crate::text::word_haystack` of `content`
    pub haystack: String,
    pub category_path: &'a CategoryPath,
    pub source: &'a SourceContext,
}

impl<'a> TagInput<'a> {
    pub fn new(content: &'a str, category_path: &'a CategoryPath, source: &'a SourceContext) -> Self {
        Self {
            content,
            haystack: word_haystack(content),
            category_path,
            source,
        }
    }
}

/// Applies [`RULES`] in order and keeps tags whose rule is confident enough
#[derive(Debug, Clone)]
pub struct Tagger {
    acceptance_threshold: f32,
}

impl Tagger {
    pub fn new(config: &TaggerConfig) -> Self {
        Self {
            acceptance_threshold: config.acceptance_threshold,
        }
    }

    pub fn tag(
        &self,
        content: &str,
        category_path: &CategoryPath,
        source: &SourceContext,
    ) -> BTreeSet<String> {
        let input = TagInput::new(content, category_path, source);
        let mut tags = BTreeSet::new();

        for rule in RULES.iter() {
            let Some((proposed, confidence)) = rule.matches(&input) else {
                continue;
            };
            if confidence > self.acceptance_threshold {
                tags.extend(proposed);
            } else {
                tracing::trace!(
                    rule = rule.name(),
                    confidence,
                    "Tag rule below acceptance threshold"
                );
            }
        }

        tags
    }
}

/// Prefixes of tags that describe links to other memories
pub const RELATIONSHIP_PREFIXES: [&str; 4] = ["supersedes:", "complements:", "solves:", "merged:"];

/// True for tags produced by deduplication rather than by the rule list
pub fn is_relationship_tag(tag: &str) -> bool {
    RELATIONSHIP_PREFIXES.iter().any(|p| tag.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn tagger() -> Tagger {
        Tagger::new(&TaggerConfig::default())
    }

    fn path(s: &str) -> CategoryPath {
        CategoryPath::from_str(s).unwrap()
    }

    #[test]
    fn test_semantic_and_technology_tags() {
        let tags = tagger().tag(
            "Use tokio::spawn for concurrent async work",
            &path("development/best-practice/tokio/async"),
            &SourceContext::new(),
        );
        assert!(tags.contains("topic:async"), "tags: {tags:?}");
        assert!(tags.contains("tech:tokio"));
        assert!(tags.contains("contains-code"));
        assert!(tags.contains("topic:guideline"));
    }

    #[test]
    fn test_quality_tags() {
        let tags = tagger().tag(
            "Maybe the panic comes from the pool, e.g. when the connection error is retried",
            &path("troubleshooting/error"),
            &SourceContext::new(),
        );
        assert!(tags.contains("contains-error"));
        assert!(tags.contains("hedged"));
        assert!(tags.contains("has-example"));
        assert!(!tags.contains("verified"));
    }

    #[test]
    fn test_context_tags() {
        let source = SourceContext::new()
            .with_session("sess-42")
            .with_file("src/main.rs");
        let tags = tagger().tag("Prefer small functions", &path("development/best-practice"), &source);
        assert!(tags.contains("session:sess-42"));
        assert!(tags.contains("file:src/main.rs"));
        assert!(tags.contains("tech:rust"), "extension implies rust: {tags:?}");
    }

    #[test]
    fn test_acceptance_threshold_filters_weak_rules() {
        let uncategorized = CategoryPath::uncategorized();
        let default_tags = tagger().tag("Something vague", &uncategorized, &SourceContext::new());
        assert!(!default_tags.contains("needs-review"));

        let lenient = Tagger::new(&TaggerConfig {
            acceptance_threshold: 0.3,
        });
        let lenient_tags = lenient.tag("Something vague", &uncategorized, &SourceContext::new());
        assert!(lenient_tags.contains("needs-review"));
    }

    #[test]
    fn test_tagging_is_deterministic() {
        let text = "Fixed the sqlite lock error by enabling WAL, verified in staging";
        let p = path("troubleshooting/error/sqlite");
        let a = tagger().tag(text, &p, &SourceContext::new());
        let b = tagger().tag(text, &p, &SourceContext::new());
        assert_eq!(a, b);
        assert!(a.contains("verified"));
        assert!(a.contains("tech:sqlite"));
    }

    #[test]
    fn test_relationship_tag_detection() {
        assert!(is_relationship_tag("solves:1234"));
        assert!(is_relationship_tag("merged:2"));
        assert!(!is_relationship_tag("topic:async"));
    }
}
