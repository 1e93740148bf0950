//! Line-aware, overlap-aware text chunker.
//!
//! Splits document text into [`TextChunk`]s whose token count (as measured
//! by the configured [`Tokenizer`]) stays within `max_tokens`. The chunker is
//! deterministic and has no side effects: chunking the same text twice
//! yields identical output.
//!
//! # Algorithm
//!
//! 1. Split the text on line boundaries, then each line on whitespace.
//! 2. Any single word longer than `max_tokens × 4` characters (a base64
//!    blob, a minified line) is hard-split into fixed-size slices. A slice
//!    the tokenizer still measures above `max_tokens` is split further into
//!    the longest prefixes that fit.
//! 3. Greedily pack words into the current chunk until adding the next word
//!    would exceed `max_tokens`.
//! 4. On overflow, flush the current chunk and seed the next one with the
//!    trailing `overlap_tokens` of the flushed chunk.
//! 5. Empty input yields no chunks; all-whitespace chunks are never emitted.
//!
//! Words keep their line structure inside a chunk: words from the same line
//! are joined by a space, a new line starts with `\n`.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig { max_tokens: 3, overlap_tokens: 1 });
//! let chunks = chunker.chunk("one two three four five");
//! assert_eq!(chunks[0].content, "one two three");
//! assert_eq!(chunks[1].content, "three four five");
//! ```

use std::sync::Arc;

use crate::tokenize::{Tokenizer, WordTokenizer, CHARS_PER_TOKEN};

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Upper bound on tokens per chunk. Values below 1 are treated as 1.
    pub max_tokens: usize,
    /// Trailing tokens of a flushed chunk repeated at the head of the next.
    /// Clamped to `max_tokens - 1`.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            overlap_tokens: 40,
        }
    }
}

/// One chunk produced by [`Chunker::chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 0-based position; contiguous across the returned sequence.
    pub index: usize,
    pub content: String,
    pub token_count: usize,
}

#[derive(Debug, Clone)]
struct Piece {
    text: String,
    starts_line: bool,
}

/// Token-bounded chunker with an injectable tokenizer.
#[derive(Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Chunker {
    /// Create a chunker that counts whitespace-delimited words as tokens.
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            tokenizer: Arc::new(WordTokenizer),
        }
    }

    /// Replace the word-count fallback with an exact tokenizer.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    fn max_tokens(&self) -> usize {
        self.config.max_tokens.max(1)
    }

    fn overlap_tokens(&self) -> usize {
        self.config.overlap_tokens.min(self.max_tokens() - 1)
    }

    /// Rune budget for a single word before it is hard-split.
    pub fn max_word_chars(&self) -> usize {
        self.max_tokens() * CHARS_PER_TOKEN
    }

    /// Split `text` into ordered, token-bounded chunks.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let max_tokens = self.max_tokens();
        let overlap = self.overlap_tokens();

        let mut chunks = Vec::new();
        let mut current: Vec<Piece> = Vec::new();
        // Pieces in `current` that were not carried over as overlap.
        let mut fresh = 0usize;

        for line in text.lines() {
            let mut starts_line = true;
            for word in line.split_whitespace() {
                for slice in self.split_word(word) {
                    let piece = Piece {
                        text: slice,
                        starts_line,
                    };
                    starts_line = false;

                    if !current.is_empty() && self.measure(&current, Some(&piece)) > max_tokens {
                        if fresh > 0 {
                            self.emit(&mut chunks, &current);
                            current = self.tail_overlap(&current, overlap);
                        } else {
                            current.clear();
                        }
                        fresh = 0;
                        if !current.is_empty()
                            && self.measure(&current, Some(&piece)) > max_tokens
                        {
                            current.clear();
                        }
                    }

                    current.push(piece);
                    fresh += 1;
                }
            }
        }

        if fresh > 0 {
            self.emit(&mut chunks, &current);
        }

        chunks
    }

    /// Slices of `word` that each fit in `max_tokens` on their own.
    fn split_word(&self, word: &str) -> Vec<String> {
        let max_tokens = self.max_tokens();
        let mut out = Vec::new();
        for slice in split_long_word(word, self.max_word_chars()) {
            if self.tokenizer.count_tokens(&slice) <= max_tokens {
                out.push(slice);
                continue;
            }
            let runes: Vec<char> = slice.chars().collect();
            let mut start = 0;
            while start < runes.len() {
                // Longest prefix that fits; a single rune always makes progress.
                let (mut lo, mut hi) = (1, runes.len() - start);
                while lo < hi {
                    let mid = (lo + hi + 1) / 2;
                    let candidate: String = runes[start..start + mid].iter().collect();
                    if self.tokenizer.count_tokens(&candidate) <= max_tokens {
                        lo = mid;
                    } else {
                        hi = mid - 1;
                    }
                }
                out.push(runes[start..start + lo].iter().collect());
                start += lo;
            }
        }
        out
    }

    fn measure(&self, pieces: &[Piece], extra: Option<&Piece>) -> usize {
        let rendered = render(pieces.iter().chain(extra));
        self.tokenizer.count_tokens(&rendered)
    }

    fn emit(&self, chunks: &mut Vec<TextChunk>, pieces: &[Piece]) {
        let content = render(pieces.iter());
        if content.trim().is_empty() {
            return;
        }
        let token_count = self.tokenizer.count_tokens(&content);
        chunks.push(TextChunk {
            index: chunks.len(),
            content,
            token_count,
        });
    }

    /// Longest suffix of `pieces` that fits in `overlap` tokens.
    fn tail_overlap(&self, pieces: &[Piece], overlap: usize) -> Vec<Piece> {
        if overlap == 0 {
            return Vec::new();
        }
        let mut take = 0;
        for k in 1..=pieces.len() {
            if self.measure(&pieces[pieces.len() - k..], None) > overlap {
                break;
            }
            take = k;
        }
        pieces[pieces.len() - take..].to_vec()
    }
}

fn render<'a>(pieces: impl Iterator<Item = &'a Piece>) -> String {
    let mut out = String::new();
    for (i, piece) in pieces.enumerate() {
        if i > 0 {
            out.push(if piece.starts_line { '\n' } else { ' ' });
        }
        out.push_str(&piece.text);
    }
    out
}

/// Hard-split a word into slices of at most `max_chars` runes.
fn split_long_word(word: &str, max_chars: usize) -> Vec<String> {
    if word.chars().count() <= max_chars {
        return vec![word.to_string()];
    }
    let runes: Vec<char> = word.chars().collect();
    runes
        .chunks(max_chars.max(1))
        .map(|slice| slice.iter().collect())
        .collect()
}
