//! Text normalization and similarity primitives
//!
//! Shared by the categorizer, tagger, scorer and deduplicator so that every
//! stage tokenizes content the same way.

use std::collections::BTreeSet;

const MIN_TOKEN_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "are", "was", "were", "has",
    "have", "had", "but", "not", "you", "your", "its", "our", "they", "them", "then", "than",
    "when", "what", "which", "who", "will", "would", "can", "could", "should", "there", "their",
    "these", "those", "been", "being", "also", "just", "use", "using", "via", "per", "all", "any",
];

/// Lowercase, collapse whitespace and strip trailing punctuation.
///
/// Two candidates that differ only in case, spacing or a trailing period
/// normalize to the same string.
pub fn normalize(content: &str) -> String {
    let collapsed = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '.' | '!' | '?' | ';' | ','))
        .to_string()
}

/// Content-bearing tokens: lowercase alphanumeric runs (plus `_`),
/// at least three characters, stop words removed.
pub fn tokens(content: &str) -> BTreeSet<String> {
    content
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Containment ratio: shared tokens over the smaller token set.
///
/// A terse statement fully contained in a longer rewrite scores 1.0, so
/// this measures relatedness, not sameness. Use [`jaccard`] to test
/// whether two texts say the same thing.
pub fn overlap_ratio(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    shared as f32 / smaller as f32
}

/// Jaccard similarity of two token sets
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Cosine similarity clamped to [0, 1]; 0 for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a * norm_b);
    if sim.is_nan() { 0.0 } else { sim.clamp(0.0, 1.0) }
}

/// Lowercased content with every non-alphanumeric run replaced by a single
/// space and padded with a space on both ends.
///
/// Phrases are matched against this form as ` phrase `, so `use` matches
/// "Use async/await" but not "because".
pub fn word_haystack(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 2);
    out.push(' ');
    for c in content.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
        } else if !out.ends_with(' ') {
            out.push(' ');
        }
    }
    if !out.ends_with(' ') {
        out.push(' ');
    }
    out
}

/// True if the whole-word `phrase` occurs in a `word_haystack`
pub fn has_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.contains(&format!(" {phrase} "))
}

/// Number of `phrases` occurring in a `word_haystack`
pub fn count_phrases(haystack: &str, phrases: &[&str]) -> usize {
    phrases.iter().filter(|p| has_phrase(haystack, p)).count()
}

/// Byte offset of the first occurrence of `phrase` in a `word_haystack`
pub fn phrase_position(haystack: &str, phrase: &str) -> Option<usize> {
    haystack.find(&format!(" {phrase} "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize("  Use  async/await for I/O-bound tasks. "),
            "use async/await for i/o-bound tasks"
        );
        assert_eq!(normalize("Hello"), normalize("hello!"));
    }

    #[test]
    fn test_tokens_filters_short_and_stop_words() {
        let t = tokens("Use the async runtime for I/O");
        assert!(t.contains("async"));
        assert!(t.contains("runtime"));
        assert!(!t.contains("the"));
        assert!(!t.contains("use"));
        assert!(!t.contains("i"));
    }

    #[test]
    fn test_overlap_ratio_subset_is_one() {
        let a = tokens("exponential backoff retry");
        let b = tokens("retry with exponential backoff and jitter");
        assert_eq!(overlap_ratio(&a, &b), 1.0);
        assert_eq!(overlap_ratio(&a, &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_jaccard() {
        let a = tokens("alpha beta gamma");
        let b = tokens("alpha beta delta");
        assert!((jaccard(&a, &b) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_word_haystack_matches_whole_words() {
        let hay = word_haystack("Use async/await for I/O-bound tasks, because it scales.");
        assert_eq!(hay, " use async await for i o bound tasks because it scales ");
        assert!(has_phrase(&hay, "use"));
        assert!(has_phrase(&hay, "async await"));
        assert!(!has_phrase(&hay, "cause"));
        assert_eq!(count_phrases(&hay, &["use", "tasks", "missing"]), 2);
        assert!(phrase_position(&hay, "use").unwrap() < phrase_position(&hay, "tasks").unwrap());
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
    }
}
