//! The `SpecChunk` value type and its scoring metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normative keywords used for chunk priority scoring and summarization.
pub const NORMATIVE_KEYWORDS: &[&str] = &["must", "shall", "required", "requirement"];

/// A token-bounded slice of the specification text.
///
/// Immutable once created; the packer only reads chunks after chunking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecChunk {
    /// Ordinal position within the chunk sequence
    pub index: usize,
    /// Total number of chunks in the sequence
    pub total: usize,
    /// Raw text content
    pub content: String,
    /// Estimated token count (soft bound, see `TokenEstimator`)
    pub tokens: usize,
    /// Section labels found inside this chunk (markdown heading titles)
    pub sections: Vec<String>,
    /// Priority score 0-5, from normative-keyword density and headings
    pub priority: u8,
    /// Opaque metadata: source line range, keywords, oversized flag
    pub metadata: BTreeMap<String, String>,
}

impl SpecChunk {
    /// Keywords extracted at chunking time, from the `keywords` metadata entry.
    pub fn keywords(&self) -> Vec<&str> {
        self.metadata
            .get("keywords")
            .map(|k| k.split(',').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Whether this chunk was accepted over the budget because it could not
    /// be split below the minimum-split floor.
    pub fn is_oversized(&self) -> bool {
        self.metadata.get("oversized").map(String::as_str) == Some("true")
    }

    /// Case-insensitive check for a section label match.
    pub fn has_section(&self, label: &str) -> bool {
        let needle = label.to_lowercase();
        self.sections.iter().any(|s| {
            let s = s.to_lowercase();
            s == needle || s.contains(&needle) || needle.contains(&s)
        })
    }
}

/// Compute a 0-5 priority score for a block of spec text.
///
/// Headings contribute 1 point; each distinct normative keyword present
/// contributes 1 more, capped at 5.
pub fn score_priority(content: &str) -> u8 {
    let lower = content.to_lowercase();
    let mut score: u8 = 0;
    if content.lines().any(|l| l.trim_start().starts_with('#')) {
        score += 1;
    }
    for kw in NORMATIVE_KEYWORDS {
        if lower.contains(kw) {
            score += 1;
        }
    }
    score.min(5)
}
