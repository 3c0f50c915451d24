//! Context packer: chunks specification text under a token budget and
//! re-assembles phase-scoped context strings.
//!
//! The packer is pure, synchronous computation. None of its operations
//! raise on malformed input; the worst cases are an oversized chunk
//! (warned and flagged) or an assembled context that omits low-priority
//! material (documented behavior, not an error).

pub mod assembler;
pub mod chunk;
pub mod chunker;
pub mod tokens;

pub use assembler::ContextAssembler;
pub use chunk::SpecChunk;
pub use chunker::{ChunkStrategy, Chunker, MIN_SPLIT_TOKENS};
pub use tokens::TokenEstimator;

use crate::config::BuildConfig;

/// Facade over chunking and assembly, configured once per build.
#[derive(Debug)]
pub struct ContextPacker {
    estimator: TokenEstimator,
    chunker: Chunker,
    strategy: ChunkStrategy,
    effective_budget: usize,
    chunks: Vec<SpecChunk>,
    assembler: ContextAssembler,
}

impl ContextPacker {
    /// Create a packer from the build configuration.
    pub fn new(config: &BuildConfig) -> Self {
        let estimator = TokenEstimator::new(config.chars_per_token);
        Self {
            estimator,
            chunker: Chunker::new(estimator, config.max_chunk_tokens, config.overlap_tokens),
            strategy: config.chunk_strategy,
            effective_budget: config.effective_context_budget(),
            chunks: Vec::new(),
            assembler: ContextAssembler::new(),
        }
    }

    /// Chunk the specification text. Produced once per spec load; calling
    /// again replaces the chunk set.
    pub fn chunk_spec(&mut self, text: &str) -> &[SpecChunk] {
        self.chunks = self.chunker.chunk(text, self.strategy);
        &self.chunks
    }

    /// Assemble a context string for a phase under the effective budget
    /// (`max_context_tokens - reserved_output_tokens`).
    ///
    /// Idempotent and re-callable; the only side effect is access-frequency
    /// bookkeeping used for chunk prioritization.
    pub fn assemble_context(&mut self, phase_name: &str, required_sections: &[String]) -> String {
        self.assembler.assemble(
            &self.chunks,
            &self.estimator,
            phase_name,
            required_sections,
            self.effective_budget,
        )
    }

    /// The loaded chunk set.
    pub fn chunks(&self) -> &[SpecChunk] {
        &self.chunks
    }

    /// The assembly budget in estimated tokens.
    pub fn effective_budget(&self) -> usize {
        self.effective_budget
    }

    /// The estimator used for all packing decisions.
    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;

    fn packer(max_context: usize, reserved: usize, max_chunk: usize) -> ContextPacker {
        let config = BuildConfig {
            max_context_tokens: max_context,
            reserved_output_tokens: reserved,
            max_chunk_tokens: max_chunk,
            overlap_tokens: 8,
            ..BuildConfig::default()
        };
        ContextPacker::new(&config)
    }

    fn spec_text() -> String {
        let mut text = String::from("# Overview\n\nThe build must finish.\n\n");
        for section in ["Packer", "Graph", "Scheduler", "Checkpoints"] {
            text.push_str(&format!("## {}\n\n", section));
            for i in 0..20 {
                text.push_str(&format!("{} requirement line {} shall hold.\n", section, i));
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn test_assembled_context_respects_effective_budget() {
        let mut packer = packer(200, 50, 100);
        packer.chunk_spec(&spec_text());
        assert_eq!(packer.effective_budget(), 150);

        let out = packer.assemble_context("scheduler work", &[]);
        let tokens = packer.estimator().estimate(&out);
        assert!(tokens <= 150 + 1, "assembled {} tokens", tokens);
    }

    #[test]
    fn test_rechunk_replaces_chunks() {
        let mut packer = packer(400, 50, 100);
        packer.chunk_spec(&spec_text());
        let first = packer.chunks().len();
        packer.chunk_spec("# Tiny\n\none line\n");
        assert!(packer.chunks().len() < first);
    }

    #[test]
    fn test_required_sections_steer_assembly() {
        let mut packer = packer(2000, 100, 80);
        packer.chunk_spec(&spec_text());
        let out = packer.assemble_context("checkpoint phase", &["Checkpoints".to_string()]);
        assert!(out.contains("Checkpoints requirement line 0"));
    }
}
