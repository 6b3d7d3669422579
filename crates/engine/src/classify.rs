//! Scene-classifier seam and the content-hash keyed suggestion cache.

use std::path::Path;

use thiserror::Error;

use iocat_core::ContentHash;
use iocat_storage::CachedClassification;

#[derive(Debug, Clone, PartialEq)]
pub struct TagSuggestion {
    pub tag: String,
    pub confidence: f32,
}

impl TagSuggestion {
    pub fn new(tag: impl Into<String>, confidence: f32) -> Self {
        Self {
            tag: tag.into(),
            confidence,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier {classifier} failed on {path}: {reason}")]
    Failed {
        classifier: String,
        path: String,
        reason: String,
    },

    #[error("classifier unavailable: {0}")]
    Unavailable(String),
}

/// Produces tag suggestions for an image file, most confident first.
pub trait Classifier {
    /// Stable name, stored alongside cached results.
    fn name(&self) -> &str;

    fn classify(&self, path: &Path) -> Result<Vec<TagSuggestion>, ClassifierError>;
}

pub fn content_hash(bytes: &[u8]) -> ContentHash {
    ContentHash::from_bytes(*blake3::hash(bytes).as_bytes())
}

/// Tags worth applying: confidence at or above `threshold`, highest first,
/// at most `max_tags`, duplicates and blanks dropped.
pub fn select_tags(suggestions: &[TagSuggestion], threshold: f32, max_tags: usize) -> Vec<String> {
    let mut ranked: Vec<&TagSuggestion> = suggestions
        .iter()
        .filter(|s| s.confidence >= threshold && !s.tag.trim().is_empty())
        .collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut tags: Vec<String> = Vec::new();
    for suggestion in ranked {
        if tags.len() >= max_tags {
            break;
        }
        let tag = suggestion.tag.trim().to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

pub(crate) fn to_cache_record(
    content_hash: ContentHash,
    classifier: &str,
    suggestions: &[TagSuggestion],
    recorded_at: i64,
) -> CachedClassification {
    CachedClassification {
        content_hash,
        classifier: classifier.to_string(),
        suggestions: suggestions
            .iter()
            .map(|s| (s.tag.clone(), s.confidence))
            .collect(),
        recorded_at,
    }
}

pub(crate) fn from_cache_record(record: &CachedClassification) -> Vec<TagSuggestion> {
    record
        .suggestions
        .iter()
        .map(|(tag, confidence)| TagSuggestion::new(tag.clone(), *confidence))
        .collect()
}
