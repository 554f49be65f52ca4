use std::sync::LazyLock;

use regex::Regex;

use super::TagInput;
use crate::categorizer::detect_technologies;
use crate::text::has_phrase;

static CODE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"`[^`]+`|\w+::\w+|\w+\([^)]*\)|=>|->|\{[^}]*\}").ok());

static ERROR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(error|errors|exception|panic|panics|panicked|traceback|segfault|failed)\b|\bE\d{4}\b").ok()
});

static VERIFIED_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(verified|confirmed|tested|works now|fixed)\b").ok()
});

static EXAMPLE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(e\.g\.|\bfor (example|instance)\b|\bsuch as\b)").ok()
});

static HEDGE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(maybe|might|perhaps|probably|possibly|not sure|i think)\b").ok()
});

/// One tagging rule. Closed set, evaluated in the static order of [`RULES`].
pub enum TagRule {
    /// Any whole-word phrase present
    Keyword {
        phrases: &'static [&'static str],
        tags: &'static [&'static str],
        confidence: f32,
    },
    /// Regular expression over the raw content
    Regex {
        name: &'static str,
        pattern: &'static LazyLock<Option<Regex>>,
        tags: &'static [&'static str],
        confidence: f32,
    },
    /// Category lies under `prefix`
    CategoryPrefix {
        prefix: &'static str,
        tags: &'static [&'static str],
        confidence: f32,
    },
    /// `tech:*` tags from the shared technology dictionary
    TechnologyLookup { confidence: f32 },
    /// `session:*` and `file:*` tags from the source context
    Context { confidence: f32 },
}

impl TagRule {
    pub fn name(&self) -> &'static str {
        match self {
            TagRule::Keyword { tags, .. } => tags.first().copied().unwrap_or("keyword"),
            TagRule::Regex { name, .. } => *name,
            TagRule::CategoryPrefix { prefix, .. } => *prefix,
            TagRule::TechnologyLookup { .. } => "technology",
            TagRule::Context { .. } => "context",
        }
    }

    /// Proposed tags and the rule confidence, or `None` if the rule does not apply
    pub fn matches(&self, input: &TagInput<'_>) -> Option<(Vec<String>, f32)> {
        match self {
            TagRule::Keyword {
                phrases,
                tags,
                confidence,
            } => phrases
                .iter()
                .any(|p| has_phrase(&input.haystack, p))
                .then(|| (owned(tags), *confidence)),
            TagRule::Regex {
                pattern,
                tags,
                confidence,
                ..
            } => pattern
                .as_ref()
                .is_some_and(|re| re.is_match(input.content))
                .then(|| (owned(tags), *confidence)),
            TagRule::CategoryPrefix {
                prefix,
                tags,
                confidence,
            } => input
                .category_path
                .is_under(prefix)
                .then(|| (owned(tags), *confidence)),
            TagRule::TechnologyLookup { confidence } => {
                let techs = detect_technologies(&input.haystack, input.source.file_path.as_deref());
                (!techs.is_empty()).then(|| {
                    (
                        techs.into_iter().map(|t| format!("tech:{t}")).collect(),
                        *confidence,
                    )
                })
            }
            TagRule::Context { confidence } => {
                let mut tags = Vec::new();
                if let Some(session) = &input.source.session_id {
                    tags.push(format!("session:{session}"));
                }
                if let Some(file) = &input.source.file_path {
                    tags.push(format!("file:{file}"));
                }
                (!tags.is_empty()).then_some((tags, *confidence))
            }
        }
    }
}

fn owned(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|t| t.to_string()).collect()
}

pub static RULES: &[TagRule] = &[
    TagRule::Keyword {
        phrases: &[
            "async", "await", "concurrency", "concurrent", "future", "futures", "spawn",
            "thread", "threads",
        ],
        tags: &["topic:async"],
        confidence: 0.8,
    },
    TagRule::Keyword {
        phrases: &["error handling", "result", "unwrap", "exception", "exceptions"],
        tags: &["topic:error-handling"],
        confidence: 0.7,
    },
    TagRule::Keyword {
        phrases: &["test", "tests", "mock", "mocks", "assert", "coverage", "fixture"],
        tags: &["topic:testing"],
        confidence: 0.8,
    },
    TagRule::Keyword {
        phrases: &[
            "performance", "latency", "throughput", "faster", "slow", "optimize", "cache",
            "caching", "benchmark",
        ],
        tags: &["topic:performance"],
        confidence: 0.75,
    },
    TagRule::Keyword {
        phrases: &[
            "security", "auth", "authentication", "password", "secret", "secrets",
            "vulnerability", "tls", "encryption",
        ],
        tags: &["topic:security"],
        confidence: 0.8,
    },
    TagRule::Keyword {
        phrases: &[
            "database", "sql", "query", "queries", "index", "migration", "transaction", "schema",
        ],
        tags: &["topic:database"],
        confidence: 0.7,
    },
    TagRule::Keyword {
        phrases: &["deploy", "deployment", "release", "rollout", "docker", "kubernetes", "helm"],
        tags: &["topic:deployment"],
        confidence: 0.75,
    },
    TagRule::Keyword {
        phrases: &["config", "configuration", "settings", "environment variable", "env"],
        tags: &["topic:configuration"],
        confidence: 0.7,
    },
    TagRule::Regex {
        name: "code",
        pattern: &CODE_RE,
        tags: &["contains-code"],
        confidence: 0.8,
    },
    TagRule::Regex {
        name: "error",
        pattern: &ERROR_RE,
        tags: &["contains-error"],
        confidence: 0.75,
    },
    TagRule::Regex {
        name: "verified",
        pattern: &VERIFIED_RE,
        tags: &["verified"],
        confidence: 0.6,
    },
    TagRule::Regex {
        name: "example",
        pattern: &EXAMPLE_RE,
        tags: &["has-example"],
        confidence: 0.7,
    },
    TagRule::Regex {
        name: "hedge",
        pattern: &HEDGE_RE,
        tags: &["hedged"],
        confidence: 0.7,
    },
    TagRule::CategoryPrefix {
        prefix: "development/best-practice",
        tags: &["topic:guideline"],
        confidence: 0.6,
    },
    TagRule::CategoryPrefix {
        prefix: "troubleshooting",
        tags: &["topic:debugging"],
        confidence: 0.6,
    },
    TagRule::CategoryPrefix {
        prefix: "operations",
        tags: &["topic:operations"],
        confidence: 0.55,
    },
    TagRule::CategoryPrefix {
        prefix: "knowledge/decision",
        tags: &["topic:decision"],
        confidence: 0.6,
    },
    TagRule::CategoryPrefix {
        prefix: "knowledge/uncategorized",
        tags: &["needs-review"],
        confidence: 0.4,
    },
    TagRule::TechnologyLookup { confidence: 0.9 },
    TagRule::Context { confidence: 1.0 },
];
