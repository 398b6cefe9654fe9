//! Boundary-preferring sliding-window text splitter.
//!
//! Splits extracted [`TextSegment`]s into overlapping [`Chunk`]s. Each window
//! is at most `chunk_size` characters; the cut point prefers the last
//! paragraph break (`\n\n`) inside the window, then the last line break, then
//! the last space, and finally a hard cut at the window edge. Consecutive
//! chunks share `overlap` characters so sentences straddling a cut stay
//! retrievable.
//!
//! Chunk text is never trimmed: concatenating the chunks of a segment with
//! the overlap removed reproduces the segment exactly. Overlap does not carry
//! across segment boundaries, so a chunk never mixes text from two pages.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Chunk, TextSegment};

#[derive(Debug, Clone)]
pub struct Splitter {
    chunk_size: usize,
    overlap: usize,
}

impl Splitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be > 0".to_string()));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Split a document's segments into chunks with document-wide indices.
    pub fn split_document(
        &self,
        document_id: &str,
        document_name: &str,
        segments: &[TextSegment],
    ) -> Vec<Chunk> {
        let now = Utc::now();
        let mut chunks = Vec::new();

        for segment in segments {
            for piece in self.split_text(&segment.text) {
                chunks.push(Chunk {
                    chunk_id: Uuid::new_v4().to_string(),
                    document_id: document_id.to_string(),
                    document_name: document_name.to_string(),
                    text: piece,
                    source_page: segment.source_page,
                    chunk_index: chunks.len(),
                    total_chunks: 0,
                    created_at: now,
                    embedding: None,
                });
            }
        }

        let total = chunks.len();
        for chunk in &mut chunks {
            chunk.total_chunks = total;
        }
        chunks
    }

    /// Split one text into window-sized pieces. Empty text yields no pieces.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        // Character-based windows so multi-byte text never splits mid-scalar.
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();

        if len <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut pieces = Vec::new();
        let mut start = 0usize;

        while start < len {
            let window_end = (start + self.chunk_size).min(len);

            if window_end == len {
                pieces.push(chars[start..len].iter().collect());
                break;
            }

            let cut = self.find_cut(&chars, start, window_end);
            pieces.push(chars[start..cut].iter().collect());

            // Step back by the overlap unless that would re-cover the whole
            // piece and stall the walk.
            start = if cut - start > self.overlap {
                cut - self.overlap
            } else {
                cut
            };
        }

        pieces
    }

    /// Pick the cut position in `[start, window_end)`: after the last
    /// paragraph break, else after the last line break, else after the last
    /// space, else the window edge.
    fn find_cut(&self, chars: &[char], start: usize, window_end: usize) -> usize {
        let window = &chars[start..window_end];

        let mut last_para = None;
        let mut last_line = None;
        let mut last_space = None;

        for (i, pair) in window.windows(2).enumerate() {
            if pair == ['\n', '\n'] {
                last_para = Some(i);
            }
        }
        for (i, &c) in window.iter().enumerate() {
            if c == '\n' {
                last_line = Some(i);
            } else if c == ' ' {
                last_space = Some(i);
            }
        }

        if let Some(p) = last_para {
            return start + p + 2;
        }
        if let Some(p) = last_line {
            return start + p + 1;
        }
        if let Some(p) = last_space {
            return start + p + 1;
        }
        window_end
    }
}
