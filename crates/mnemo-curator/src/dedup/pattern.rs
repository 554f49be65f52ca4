//! Structural pattern classification and specificity

use crate::memory::types::StructuralPattern;
use crate::text::{count_phrases, tokens, word_haystack};

const SOLUTION_PHRASES: &[&str] = &[
    "fix", "fixed", "fixes", "resolve", "resolved", "resolves", "solution", "solved",
    "workaround", "to solve",
];

const ERROR_PHRASES: &[&str] = &[
    "error", "errors", "exception", "panic", "panics", "panicked", "crash", "crashes", "fails",
    "failed", "failing", "failure", "cannot", "traceback", "segfault", "stack trace", "broken",
    "bug",
];

const OPTIMIZATION_PHRASES: &[&str] = &[
    "optimize", "optimized", "optimise", "optimization", "faster", "speed up", "speedup",
    "performance", "latency", "throughput", "reduce", "cache", "caching",
];

const IMPLEMENTATION_PHRASES: &[&str] = &[
    "implement", "implemented", "implementing", "implementation", "use", "prefer", "create",
    "build", "write", "add", "define", "how to", "function", "method",
];

/// Semantic shape of `content`. A fix that mentions the error it solves is
/// a solution, so solution markers are checked first.
pub fn classify_pattern(content: &str) -> StructuralPattern {
    let haystack = word_haystack(content);
    if count_phrases(&haystack, SOLUTION_PHRASES) > 0 {
        StructuralPattern::Solution
    } else if count_phrases(&haystack, ERROR_PHRASES) > 0 {
        StructuralPattern::ErrorReport
    } else if count_phrases(&haystack, OPTIMIZATION_PHRASES) > 0 {
        StructuralPattern::Optimization
    } else if count_phrases(&haystack, IMPLEMENTATION_PHRASES) > 0 {
        StructuralPattern::Implementation
    } else {
        StructuralPattern::General
    }
}

/// Rough measure of how specific a statement is: distinct content tokens,
/// plus a bonus for inline code and concrete numbers.
pub fn specificity(content: &str) -> usize {
    let mut score = tokens(content).len();
    if content.contains('`') || content.contains("::") || content.contains("()") {
        score += 2;
    }
    if content.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    }
    score
}

/// True if a structural match earns the similarity bonus
pub fn earns_bonus(a: StructuralPattern, b: StructuralPattern) -> bool {
    a == b && a != StructuralPattern::General
}
