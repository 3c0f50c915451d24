//! Chunking strategies for specification text.
//!
//! All strategies produce `SpecChunk`s whose estimated token count stays
//! under `max_chunk_tokens`, except units that cannot be split below the
//! paragraph floor: those are accepted as oversized chunks with a warning
//! rather than failing the build.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

use super::chunk::{SpecChunk, score_priority};
use super::tokens::TokenEstimator;

/// Units at or below this estimated token count are never split further.
pub const MIN_SPLIT_TOKENS: usize = 48;

/// Maximum number of keywords recorded per chunk.
const MAX_KEYWORDS: usize = 12;

/// Strategy used to slice the specification text into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Split at markdown section markers, greedily packing sections
    #[default]
    Semantic,
    /// Fixed-size windows over raw lines, ignoring structure
    SlidingWindow,
    /// One chunk per top-level document section
    SectionBased,
}

impl std::fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkStrategy::Semantic => write!(f, "semantic"),
            ChunkStrategy::SlidingWindow => write!(f, "sliding_window"),
            ChunkStrategy::SectionBased => write!(f, "section_based"),
        }
    }
}

impl std::str::FromStr for ChunkStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "semantic" => Ok(ChunkStrategy::Semantic),
            "sliding_window" => Ok(ChunkStrategy::SlidingWindow),
            "section_based" => Ok(ChunkStrategy::SectionBased),
            _ => anyhow::bail!(
                "Invalid chunk strategy '{}'. Valid values: semantic, sliding_window, section_based",
                s
            ),
        }
    }
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*$").unwrap())
}

/// A contiguous slice of the source text with its line range.
#[derive(Debug, Clone)]
struct Unit {
    text: String,
    start_line: usize,
    end_line: usize,
}

/// A chunk under construction, before indices and totals are known.
#[derive(Debug, Default)]
struct DraftChunk {
    content: String,
    start_line: usize,
    end_line: usize,
    oversized: bool,
}

/// Splits specification text into token-bounded chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    estimator: TokenEstimator,
    max_chunk_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    /// Create a chunker with the given budgets.
    pub fn new(estimator: TokenEstimator, max_chunk_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            estimator,
            max_chunk_tokens: max_chunk_tokens.max(1),
            overlap_tokens,
        }
    }

    /// Chunk `text` with the given strategy.
    ///
    /// Never fails: the worst case is an oversized chunk, which is logged
    /// and flagged in metadata. Empty input yields an empty sequence.
    pub fn chunk(&self, text: &str, strategy: ChunkStrategy) -> Vec<SpecChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let drafts = match strategy {
            ChunkStrategy::Semantic => self.pack_units(&split_at_headings(text, 6)),
            ChunkStrategy::SlidingWindow => self.sliding_window(text),
            ChunkStrategy::SectionBased => self.section_based(text),
        };

        self.finalize(drafts)
    }

    /// Greedily pack consecutive units into chunks under the token budget,
    /// seeding each flushed chunk's successor with a backward overlap.
    fn pack_units(&self, units: &[Unit]) -> Vec<DraftChunk> {
        let mut drafts: Vec<DraftChunk> = Vec::new();
        let mut current = DraftChunk::default();
        let mut current_tokens = 0usize;

        for unit in units {
            let unit_tokens = self.estimator.estimate(&unit.text);

            if unit_tokens > self.max_chunk_tokens {
                // Flush whatever is pending, then split the oversized unit
                // at paragraph boundaries with the same pack/overlap logic.
                if !current.content.is_empty() {
                    drafts.push(current);
                    current = DraftChunk::default();
                    current_tokens = 0;
                }
                drafts.extend(self.split_oversized_unit(unit));
                continue;
            }

            if current_tokens + unit_tokens > self.max_chunk_tokens && !current.content.is_empty() {
                let overlap = self.backward_overlap(&current.content);
                let overlap_tokens = self.estimator.estimate(&overlap);
                drafts.push(current);
                // The seed must leave room for the unit that forced the
                // flush; when it would not, the successor starts bare.
                if overlap_tokens + unit_tokens > self.max_chunk_tokens {
                    current = DraftChunk::default();
                    current_tokens = 0;
                } else {
                    current = DraftChunk {
                        content: overlap,
                        start_line: unit.start_line,
                        end_line: unit.end_line,
                        oversized: false,
                    };
                    current_tokens = overlap_tokens;
                }
            }

            if current.content.is_empty() {
                current.start_line = unit.start_line;
            } else if !current.content.ends_with('\n') {
                current.content.push('\n');
                current_tokens = self.estimator.estimate(&current.content);
            }
            current.content.push_str(&unit.text);
            current.end_line = unit.end_line;
            current_tokens += unit_tokens;
        }

        if !current.content.trim().is_empty() {
            drafts.push(current);
        }

        drafts
    }

    /// Split a unit that exceeds the budget at paragraph boundaries.
    ///
    /// Paragraphs are the floor: a paragraph that still does not fit (or a
    /// unit already at or below `MIN_SPLIT_TOKENS`) is accepted as an
    /// oversized chunk with a warning.
    fn split_oversized_unit(&self, unit: &Unit) -> Vec<DraftChunk> {
        let unit_tokens = self.estimator.estimate(&unit.text);
        if unit_tokens <= MIN_SPLIT_TOKENS {
            warn!(
                tokens = unit_tokens,
                budget = self.max_chunk_tokens,
                "accepting oversized unit below the minimum-split floor"
            );
            return vec![DraftChunk {
                content: unit.text.clone(),
                start_line: unit.start_line,
                end_line: unit.end_line,
                oversized: true,
            }];
        }

        let paragraphs = split_paragraphs(unit);
        let mut drafts = Vec::new();
        let mut pending: Vec<Unit> = Vec::new();

        for para in paragraphs {
            let para_tokens = self.estimator.estimate(&para.text);
            if para_tokens > self.max_chunk_tokens {
                if !pending.is_empty() {
                    drafts.extend(self.pack_units(&pending));
                    pending.clear();
                }
                warn!(
                    tokens = para_tokens,
                    budget = self.max_chunk_tokens,
                    line = para.start_line,
                    "accepting oversized paragraph; splitting below paragraph level is not attempted"
                );
                drafts.push(DraftChunk {
                    content: para.text,
                    start_line: para.start_line,
                    end_line: para.end_line,
                    oversized: true,
                });
            } else {
                pending.push(para);
            }
        }
        if !pending.is_empty() {
            drafts.extend(self.pack_units(&pending));
        }

        drafts
    }

    /// Fixed-size windows over raw lines with backward-overlap seeding.
    fn sliding_window(&self, text: &str) -> Vec<DraftChunk> {
        let units: Vec<Unit> = text
            .lines()
            .enumerate()
            .map(|(i, line)| Unit {
                text: line.to_string(),
                start_line: i + 1,
                end_line: i + 1,
            })
            .collect();
        self.pack_units(&units)
    }

    /// One chunk per top-level section; oversized sections fall back to the
    /// same paragraph splitting as the semantic strategy.
    fn section_based(&self, text: &str) -> Vec<DraftChunk> {
        let sections = split_at_headings(text, 1);
        let mut drafts = Vec::new();
        for section in &sections {
            let tokens = self.estimator.estimate(&section.text);
            if tokens > self.max_chunk_tokens {
                drafts.extend(self.split_oversized_unit(section));
            } else {
                drafts.push(DraftChunk {
                    content: section.text.clone(),
                    start_line: section.start_line,
                    end_line: section.end_line,
                    oversized: false,
                });
            }
        }
        drafts
    }

    /// Scan backward from the end of `content`, accumulating whole lines
    /// until `overlap_tokens` is reached.
    fn backward_overlap(&self, content: &str) -> String {
        if self.overlap_tokens == 0 {
            return String::new();
        }

        let mut lines: Vec<&str> = Vec::new();
        let mut tokens = 0usize;
        for line in content.lines().rev() {
            lines.push(line);
            tokens += self.estimator.estimate(line);
            if tokens >= self.overlap_tokens {
                break;
            }
        }
        lines.reverse();
        let mut overlap = lines.join("\n");
        if !overlap.is_empty() {
            overlap.push('\n');
        }
        overlap
    }

    /// Assign indices, totals, token counts, section labels, keywords, and
    /// priority scores to the finished drafts.
    fn finalize(&self, drafts: Vec<DraftChunk>) -> Vec<SpecChunk> {
        let total = drafts.len();
        drafts
            .into_iter()
            .enumerate()
            .map(|(index, draft)| {
                let tokens = self.estimator.estimate(&draft.content);
                let sections = extract_section_labels(&draft.content);
                let priority = score_priority(&draft.content);

                let mut metadata = BTreeMap::new();
                metadata.insert("line_start".to_string(), draft.start_line.to_string());
                metadata.insert("line_end".to_string(), draft.end_line.to_string());
                metadata.insert(
                    "keywords".to_string(),
                    extract_keywords(&draft.content).join(","),
                );
                if draft.oversized {
                    metadata.insert("oversized".to_string(), "true".to_string());
                }

                SpecChunk {
                    index,
                    total,
                    content: draft.content,
                    tokens,
                    sections,
                    priority,
                    metadata,
                }
            })
            .collect()
    }
}

/// Split text into units at markdown headings of level <= `max_level`.
///
/// Preamble before the first heading becomes its own unit.
fn split_at_headings(text: &str, max_level: usize) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut start_line = 1usize;

    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let is_boundary = heading_re()
            .captures(line)
            .is_some_and(|c| c[1].len() <= max_level);

        if is_boundary && !current.iter().all(|l| l.trim().is_empty()) {
            units.push(Unit {
                text: current.join("\n"),
                start_line,
                end_line: line_no - 1,
            });
            current.clear();
            start_line = line_no;
        } else if is_boundary {
            current.clear();
            start_line = line_no;
        }
        current.push(line);
    }

    if !current.iter().all(|l| l.trim().is_empty()) {
        units.push(Unit {
            text: current.join("\n"),
            start_line,
            end_line: text.lines().count(),
        });
    }

    units
}

/// Split a unit at blank-line paragraph boundaries.
fn split_paragraphs(unit: &Unit) -> Vec<Unit> {
    let mut paragraphs: Vec<Unit> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut start_line = unit.start_line;

    for (i, line) in unit.text.lines().enumerate() {
        let line_no = unit.start_line + i;
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(Unit {
                    text: current.join("\n"),
                    start_line,
                    end_line: line_no - 1,
                });
                current.clear();
            }
            start_line = line_no + 1;
        } else {
            if current.is_empty() {
                start_line = line_no;
            }
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(Unit {
            text: current.join("\n"),
            start_line,
            end_line: unit.end_line,
        });
    }

    paragraphs
}

/// Extract markdown heading titles as section labels.
pub fn extract_section_labels(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| heading_re().captures(line).map(|c| c[2].to_string()))
        .collect()
}

/// Extract lowercase content keywords for scoring (longest-first frequency
/// is overkill here; distinct words of 5+ letters suffice).
fn extract_keywords(content: &str) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut keywords = Vec::new();
    for word in content.split(|c: char| !c.is_alphanumeric()) {
        if word.len() < 5 || !word.chars().all(|c| c.is_alphabetic()) {
            continue;
        }
        let lower = word.to_lowercase();
        if seen.insert(lower.clone()) {
            keywords.push(lower);
            if keywords.len() >= MAX_KEYWORDS {
                break;
            }
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_tokens: usize, overlap: usize) -> Chunker {
        Chunker::new(TokenEstimator::default(), max_tokens, overlap)
    }

    fn spec_text() -> String {
        let mut text = String::new();
        text.push_str("# Overview\n\nThe system must orchestrate builds.\n\n");
        text.push_str("## Scheduler\n\n");
        for i in 0..30 {
            text.push_str(&format!(
                "The scheduler shall order task number {} by priority and effort.\n",
                i
            ));
        }
        text.push_str("\n## Checkpoints\n\nCheckpoints are required after every phase.\n");
        text
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        for strategy in [
            ChunkStrategy::Semantic,
            ChunkStrategy::SlidingWindow,
            ChunkStrategy::SectionBased,
        ] {
            assert!(chunker(100, 10).chunk("", strategy).is_empty());
            assert!(chunker(100, 10).chunk("  \n\n  ", strategy).is_empty());
        }
    }

    #[test]
    fn test_all_strategies_respect_budget_unless_oversized() {
        let text = spec_text();
        for strategy in [
            ChunkStrategy::Semantic,
            ChunkStrategy::SlidingWindow,
            ChunkStrategy::SectionBased,
        ] {
            let chunks = chunker(80, 10).chunk(&text, strategy);
            assert!(!chunks.is_empty(), "strategy {} produced nothing", strategy);
            for chunk in &chunks {
                assert!(
                    chunk.tokens <= 80 || chunk.is_oversized(),
                    "strategy {} produced a {}-token chunk without the oversized flag",
                    strategy,
                    chunk.tokens
                );
            }
        }
    }

    #[test]
    fn test_indices_and_totals_are_consistent() {
        let chunks = chunker(60, 8).chunk(&spec_text(), ChunkStrategy::Semantic);
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.total, total);
        }
    }

    #[test]
    fn test_no_content_is_lost() {
        // Every source line must appear in at least one chunk.
        let text = spec_text();
        let chunks = chunker(60, 8).chunk(&text, ChunkStrategy::Semantic);
        let combined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            assert!(combined.contains(line), "line lost: {}", line);
        }
    }

    #[test]
    fn test_overlap_between_split_chunks() {
        // A single oversized section split into windows should share its
        // configured overlap between consecutive chunks.
        let mut text = String::from("# Big\n\n");
        for i in 0..60 {
            text.push_str(&format!("line number {} with some filler text\n", i));
        }
        let chunks = chunker(50, 12).chunk(&text, ChunkStrategy::SlidingWindow);
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let tail = pair[0].content.lines().next_back().unwrap();
            assert!(
                pair[1].content.contains(tail),
                "chunk {} does not start with the tail of chunk {}",
                pair[1].index,
                pair[0].index
            );
        }
    }

    #[test]
    fn test_oversized_paragraph_accepted_with_flag() {
        // One giant unbreakable paragraph: accepted, flagged, warned.
        let text = format!("# Section\n\n{}\n", "word ".repeat(600));
        let chunks = chunker(50, 5).chunk(&text, ChunkStrategy::Semantic);
        assert!(chunks.iter().any(|c| c.is_oversized()));
    }

    #[test]
    fn test_section_based_one_chunk_per_top_level_section() {
        let text = "# One\n\nshort body\n\n# Two\n\nshort body\n";
        let chunks = chunker(1000, 10).chunk(text, ChunkStrategy::SectionBased);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].sections, vec!["One"]);
        assert_eq!(chunks[1].sections, vec!["Two"]);
    }

    #[test]
    fn test_section_based_keeps_subsections_with_their_parent() {
        // Subsections belong to the enclosing top-level section, not to
        // chunks of their own.
        let text = "# Top\n\nintro\n\n## Sub one\n\nbody\n\n## Sub two\n\nbody\n";
        let chunks = chunker(1000, 10).chunk(text, ChunkStrategy::SectionBased);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sections, vec!["Top", "Sub one", "Sub two"]);
    }

    #[test]
    fn test_semantic_splits_large_sections_at_subsection_boundaries() {
        // A top-level section over budget whose subsections each fit must
        // break at the subsection headings, keeping each heading with its
        // own body.
        let mut text = String::from("# Top\n\n");
        for name in ["alpha", "beta", "gamma"] {
            let body = format!("{} detail ", name).repeat(25);
            text.push_str(&format!("## Sub {}\n\n{}\n\n", name, body));
        }
        let chunks = chunker(200, 0).chunk(&text, ChunkStrategy::Semantic);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| !c.is_oversized()));
        for name in ["alpha", "beta", "gamma"] {
            let heading = format!("Sub {}", name);
            let body = format!("{} detail", name);
            assert!(
                chunks.iter().any(|c| {
                    c.sections.iter().any(|s| *s == heading) && c.content.contains(&body)
                }),
                "subsection {} was split from its body",
                name
            );
        }
    }

    #[test]
    fn test_overlap_seed_never_busts_the_budget() {
        // Lines near the budget with a large overlap: the seeded overlap
        // must not push the successor chunk past the limit.
        let mut text = String::new();
        for i in 0..6 {
            text.push_str(&format!("{} {}\n", i, "filler ".repeat(40)));
        }
        let chunks = chunker(100, 40).chunk(&text, ChunkStrategy::SlidingWindow);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(
                chunk.tokens <= 100,
                "chunk {} holds {} tokens against a budget of 100",
                chunk.index,
                chunk.tokens
            );
        }
    }

    #[test]
    fn test_semantic_packs_small_sections_together() {
        let text = "# A\n\ntiny\n\n## B\n\ntiny\n\n## C\n\ntiny\n";
        let chunks = chunker(1000, 10).chunk(text, ChunkStrategy::Semantic);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sections, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_line_metadata_present() {
        let chunks = chunker(60, 8).chunk(&spec_text(), ChunkStrategy::Semantic);
        for chunk in &chunks {
            let start: usize = chunk.metadata["line_start"].parse().unwrap();
            let end: usize = chunk.metadata["line_end"].parse().unwrap();
            assert!(start <= end);
        }
    }

    #[test]
    fn test_keywords_extracted() {
        let chunks = chunker(1000, 0).chunk(
            "# Scheduler\n\nThe scheduler orders tasks by priority.\n",
            ChunkStrategy::Semantic,
        );
        assert!(chunks[0].keywords().contains(&"scheduler"));
        assert!(chunks[0].keywords().contains(&"priority"));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "semantic".parse::<ChunkStrategy>().unwrap(),
            ChunkStrategy::Semantic
        );
        assert_eq!(
            "sliding-window".parse::<ChunkStrategy>().unwrap(),
            ChunkStrategy::SlidingWindow
        );
        assert_eq!(
            "section_based".parse::<ChunkStrategy>().unwrap(),
            ChunkStrategy::SectionBased
        );
        assert!("frequency".parse::<ChunkStrategy>().is_err());
    }
}
