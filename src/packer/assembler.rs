//! Budget-bounded context assembly over loaded chunks.
//!
//! Scoring, greedy packing, and the compressed-summary fallback live here.
//! Assembly never errors: low-priority material that does not fit is simply
//! omitted, which is documented behavior.

use std::collections::HashMap;
use tracing::debug;

use super::chunk::{NORMATIVE_KEYWORDS, SpecChunk};
use super::tokens::TokenEstimator;

/// Score awarded when a required section matches a chunk's section label.
const SECTION_MATCH_SCORE: i64 = 10;
/// Score per phase keyword found in the chunk's extracted keyword list.
const KEYWORD_LIST_SCORE: i64 = 5;
/// Score per phase keyword found in the raw chunk content.
const CONTENT_MATCH_SCORE: i64 = 2;

/// Assembles a phase-scoped context string under a hard token budget.
///
/// Tracks per-chunk access counts across calls: chunks included in earlier
/// assemblies are preferred on ties, so frequently useful material stays in.
#[derive(Debug, Default)]
pub struct ContextAssembler {
    access_counts: HashMap<usize, u64>,
}

impl ContextAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a context for `phase_name` from `chunks`, never exceeding
    /// `budget_tokens` (per the estimator's soft bound).
    pub fn assemble(
        &mut self,
        chunks: &[SpecChunk],
        estimator: &TokenEstimator,
        phase_name: &str,
        required_sections: &[String],
        budget_tokens: usize,
    ) -> String {
        let phase_keywords = phase_keywords(phase_name);

        let mut scored: Vec<(i64, &SpecChunk)> = chunks
            .iter()
            .filter_map(|chunk| {
                let score = self.score_chunk(chunk, required_sections, &phase_keywords);
                // Zero-score chunks stay eligible only when the caller did
                // not constrain the sections.
                if score == 0 && !required_sections.is_empty() {
                    None
                } else {
                    Some((score, chunk))
                }
            })
            .collect();

        scored.sort_by(|(sa, ca), (sb, cb)| {
            sb.cmp(sa).then_with(|| {
                let aa = self.access_counts.get(&ca.index).copied().unwrap_or(0);
                let ab = self.access_counts.get(&cb.index).copied().unwrap_or(0);
                ab.cmp(&aa).then_with(|| ca.index.cmp(&cb.index))
            })
        });

        let mut output = String::new();
        let mut running_tokens = 0usize;
        let mut included: Vec<usize> = Vec::new();

        for (score, chunk) in &scored {
            // The joining newline after each inclusion counts as a token.
            if running_tokens + chunk.tokens + 1 <= budget_tokens {
                output.push_str(&chunk.content);
                output.push('\n');
                running_tokens += chunk.tokens + 1;
                included.push(chunk.index);
                continue;
            }

            // The whole chunk does not fit: try a compressed summary, then
            // stop either way. Never force inclusion past the budget.
            let summary = summarize_chunk(chunk);
            let summary_tokens = estimator.estimate(&summary);
            if !summary.is_empty() && running_tokens + summary_tokens + 1 <= budget_tokens {
                output.push_str(&summary);
                output.push('\n');
                included.push(chunk.index);
                debug!(
                    chunk = chunk.index,
                    score, "included compressed summary of chunk that did not fit whole"
                );
            }
            break;
        }

        for index in included {
            *self.access_counts.entry(index).or_insert(0) += 1;
        }

        output
    }

    /// Number of times a chunk has been included in an assembled context.
    pub fn access_count(&self, chunk_index: usize) -> u64 {
        self.access_counts.get(&chunk_index).copied().unwrap_or(0)
    }

    fn score_chunk(
        &self,
        chunk: &SpecChunk,
        required_sections: &[String],
        phase_keywords: &[String],
    ) -> i64 {
        let mut score = 0i64;

        if required_sections.iter().any(|s| chunk.has_section(s)) {
            score += SECTION_MATCH_SCORE;
        }

        let chunk_keywords = chunk.keywords();
        let content_lower = chunk.content.to_lowercase();
        for kw in phase_keywords {
            if chunk_keywords.iter().any(|c| c == kw) {
                score += KEYWORD_LIST_SCORE;
            }
            if content_lower.contains(kw.as_str()) {
                score += CONTENT_MATCH_SCORE;
            }
        }

        score
    }
}

/// Derive scoring keywords from a phase name: lowercase words of 4+ letters.
fn phase_keywords(phase_name: &str) -> Vec<String> {
    phase_name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Compress a chunk to its headings plus normative lines.
fn summarize_chunk(chunk: &SpecChunk) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in chunk.content.lines() {
        let trimmed = line.trim_start();
        let lower = line.to_lowercase();
        if trimmed.starts_with('#') || NORMATIVE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            lines.push(line);
        }
    }
    lines.join("\n")
}
