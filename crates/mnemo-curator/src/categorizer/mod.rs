//! Hierarchical classification of candidate memories
//!
//! Keyword matching against a fixed four-level taxonomy:
//! branch / sub-category / technology / facet.

pub mod taxonomy;

use crate::config::CategorizerConfig;
use crate::memory::types::{CategoryPath, SourceContext};
use crate::text::{count_phrases, has_phrase, phrase_position, word_haystack};

use taxonomy::{BRANCHES, EXTENSIONS, FACETS, GENERAL_LABEL, TECHNOLOGIES};

/// Keyword hits at which classification confidence saturates at 1.0
const SATURATION_HITS: f32 = 3.0;

/// Output of [`Categorizer::classify`]
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category_path: CategoryPath,
    /// Normalised score of the winning branch, in [0, 1]
    pub confidence: f32,
    /// Nothing matched above the minimum confidence; path is the fallback
    pub low_confidence: bool,
    /// Canonical technology names, primary first
    pub technologies: Vec<String>,
}

/// Pattern/keyword classifier. Stateless apart from its threshold, so one
/// instance is shared by every concurrent ingestion.
#[derive(Debug, Clone)]
pub struct Categorizer {
    min_confidence: f32,
}

impl Categorizer {
    pub fn new(config: &CategorizerConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
        }
    }

    pub fn classify(&self, content: &str, source: &SourceContext) -> Classification {
        let haystack = word_haystack(content);
        let technologies = detect_technologies(&haystack, source.file_path.as_deref());

        let mut best: Option<(usize, usize, Option<&'static str>)> = None;
        for (index, branch) in BRANCHES.iter().enumerate() {
            let branch_hits = count_phrases(&haystack, branch.phrases);
            let (sub_label, sub_hits) = branch
                .subs
                .iter()
                .map(|sub| (sub.label, count_phrases(&haystack, sub.phrases)))
                .fold((None, 0), |acc, (label, hits)| {
                    if hits > acc.1 { (Some(label), hits) } else { acc }
                });
            let hits = branch_hits + sub_hits;
            if hits > best.map(|(_, h, _)| h).unwrap_or(0) {
                best = Some((index, hits, sub_label));
            }
        }

        let Some((index, hits, sub_label)) = best else {
            return Self::fallback(0.0, technologies);
        };

        let confidence = (hits as f32 / SATURATION_HITS).min(1.0);
        if confidence < self.min_confidence {
            return Self::fallback(confidence, technologies);
        }

        let branch = &BRANCHES[index];
        let mut labels = vec![
            branch.top.as_str().to_string(),
            sub_label.unwrap_or(GENERAL_LABEL).to_string(),
        ];
        if let Some(primary) = technologies.first() {
            labels.push(primary.clone());
            if let Some(facet) = detect_facet(&haystack) {
                labels.push(facet.to_string());
            }
        }

        let category_path = match CategoryPath::new(labels) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "Built an invalid category path, using fallback");
                return Self::fallback(confidence, technologies);
            }
        };

        tracing::trace!(category = %category_path, confidence, "Classified candidate");

        Classification {
            category_path,
            confidence,
            low_confidence: false,
            technologies,
        }
    }

    fn fallback(confidence: f32, technologies: Vec<String>) -> Classification {
        Classification {
            category_path: CategoryPath::uncategorized(),
            confidence,
            low_confidence: true,
            technologies,
        }
    }
}

/// Canonical technologies mentioned in `haystack` or implied by the file
/// extension. The extension's technology comes first, the rest follow in
/// order of first mention.
pub fn detect_technologies(haystack: &str, file_path: Option<&str>) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    if let Some(tech) = file_path.and_then(extension_technology) {
        found.push(tech.to_string());
    }

    let mut mentioned: Vec<(usize, &str)> = TECHNOLOGIES
        .iter()
        .filter_map(|(alias, canonical)| {
            phrase_position(haystack, alias).map(|pos| (pos, *canonical))
        })
        .collect();
    mentioned.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    for (_, canonical) in mentioned {
        if !found.iter().any(|t| t == canonical) {
            found.push(canonical.to_string());
        }
    }
    found
}

fn extension_technology(file_path: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(file_path)
        .extension()?
        .to_str()?
        .to_lowercase();
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, tech)| *tech)
}

fn detect_facet(haystack: &str) -> Option<&'static str> {
    FACETS
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|p| has_phrase(haystack, p)))
        .map(|(label, _)| *label)
}
