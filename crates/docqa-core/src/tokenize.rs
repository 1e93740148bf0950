//! Token counting.
//!
//! The chunker and the history window both measure text in tokens. An exact
//! tokenizer can be injected through [`Tokenizer`]; without one the chunker
//! counts whitespace-delimited words and the history window uses
//! [`estimate_tokens`].

/// Approximate characters-per-token ratio used by the heuristics.
pub const CHARS_PER_TOKEN: usize = 4;

/// Counts tokens in a piece of text.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Counts whitespace-delimited words. The chunker's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Heuristic token cost: `max(words, chars / 4)`, at least 1 for non-empty text.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Estimate the token cost of `text` without a real tokenizer.
///
/// Returns 0 only for empty (or all-whitespace) input.
pub fn estimate_tokens(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }
    let words = text.split_whitespace().count();
    let by_chars = text.chars().count() / CHARS_PER_TOKEN;
    words.max(by_chars).max(1)
}
