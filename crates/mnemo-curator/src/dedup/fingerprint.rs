use sha2::{Digest, Sha256};

use crate::memory::types::{CategoryPath, StructuralPattern};
use crate::text::normalize;

/// Dedup fingerprint: SHA-256 over category, normalised content and pattern.
///
/// Two candidates that differ only in case, whitespace or trailing
/// punctuation share a fingerprint.
pub fn fingerprint(category: &CategoryPath, content: &str, pattern: StructuralPattern) -> String {
    let material = format!("{}\n{}\n{}", category, normalize(content), pattern.as_str());
    format!("{:x}", Sha256::digest(material.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_fingerprint_ignores_formatting() {
        let path = CategoryPath::from_str("development/best-practice").unwrap();
        let a = fingerprint(&path, "Use async/await for I/O-bound tasks", StructuralPattern::Implementation);
        let b = fingerprint(&path, "  use async/await   for I/O-bound tasks. ", StructuralPattern::Implementation);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_category_and_pattern() {
        let dev = CategoryPath::from_str("development/best-practice").unwrap();
        let ops = CategoryPath::from_str("operations/deployment").unwrap();
        let text = "Pin the base image digest";
        assert_ne!(
            fingerprint(&dev, text, StructuralPattern::General),
            fingerprint(&ops, text, StructuralPattern::General)
        );
        assert_ne!(
            fingerprint(&dev, text, StructuralPattern::General),
            fingerprint(&dev, text, StructuralPattern::Implementation)
        );
    }
}
