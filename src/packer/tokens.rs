//! Approximate token counting for packing decisions.

/// Default characters-per-token ratio for English/markdown text.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Character-ratio token estimator.
///
/// All packing decisions are based on this estimate, not an exact tokenizer
/// call. The contract is approximate compliance: callers must treat every
/// token budget in the packer as a soft bound against the real LLM tokenizer.
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator {
    /// Create an estimator with the given ratio. Non-positive ratios fall
    /// back to the default.
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    /// Estimate the token count of a piece of text.
    pub fn estimate(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}
