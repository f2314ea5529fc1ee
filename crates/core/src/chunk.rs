use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash::content_hash;

pub const DEFAULT_CHUNK_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Upper bound on characters per chunk. Zero is treated as one.
    pub max_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_CHARS,
        }
    }
}

/// One contiguous slice of the source text. `span` is in characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub chunk_index: usize,
    pub text: String,
    pub span: Range<usize>,
}

impl ChunkRecord {
    pub fn char_len(&self) -> usize {
        self.span.end - self.span.start
    }
}

pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn max_chars(&self) -> usize {
        self.config.max_chars.max(1)
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkRecord> {
        let max_chars = self.max_chars();
        let mut chunks = Vec::new();
        let mut byte_start = 0usize;
        let mut char_start = 0usize;
        let mut chars_in_chunk = 0usize;
        for (byte_idx, _) in text.char_indices() {
            if chars_in_chunk == max_chars {
                chunks.push(build_chunk(
                    chunks.len(),
                    &text[byte_start..byte_idx],
                    char_start,
                    chars_in_chunk,
                ));
                byte_start = byte_idx;
                char_start += chars_in_chunk;
                chars_in_chunk = 0;
            }
            chars_in_chunk += 1;
        }
        if chars_in_chunk > 0 {
            chunks.push(build_chunk(
                chunks.len(),
                &text[byte_start..],
                char_start,
                chars_in_chunk,
            ));
        }
        chunks
    }
}

/// Splits `text` into in-order spans of at most `max_chars` characters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<ChunkRecord> {
    Chunker::new(ChunkConfig { max_chars }).chunk(text)
}

/// Rejects a character span that is inverted or runs past a text of `len` chars.
pub fn check_span(span: &Range<usize>, len: usize) -> Result<()> {
    if span.start > span.end || span.end > len {
        return Err(CoreError::InvalidSpan {
            start: span.start,
            end: span.end,
            len,
        });
    }
    Ok(())
}

fn build_chunk(chunk_index: usize, slice: &str, char_start: usize, len: usize) -> ChunkRecord {
    ChunkRecord {
        id: content_hash(slice),
        chunk_index,
        text: slice.to_string(),
        span: char_start..char_start + len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_fixed_windows() {
        let text = "a".repeat(2500);
        let chunks = chunk_text(&text, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].span, 0..1000);
        assert_eq!(chunks[1].span, 1000..2000);
        assert_eq!(chunks[2].span, 2000..2500);
        assert_eq!(chunks[2].char_len(), 500);
    }

    #[test]
    fn identical_text_shares_ids() {
        let chunks = chunk_text("abcabc", 3);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, chunks[1].id);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn multibyte_text_never_splits_a_code_point() {
        let text = "héllo wörld 日本語のテキスト";
        let chunks = chunk_text(text, 4);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 4));
        assert_eq!(chunks.last().unwrap().span.end, text.chars().count());
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn chunk_spans_pass_the_span_check() {
        let text = "x".repeat(25);
        for chunk in chunk_text(&text, 10) {
            check_span(&chunk.span, 25).unwrap();
        }
        assert!(matches!(
            check_span(&(20..26), 25),
            Err(CoreError::InvalidSpan { end: 26, len: 25, .. })
        ));
        assert!(check_span(&(5..4), 25).is_err());
        check_span(&(0..0), 0).unwrap();
    }

    #[test]
    fn zero_limit_behaves_as_one() {
        let chunks = chunk_text("abc", 0);
        assert_eq!(chunks.len(), 3);
    }
}
