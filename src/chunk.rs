//! Fixed-window text chunker.
//!
//! Splits document body text into [`Chunk`]s according to a resolved
//! [`ChunkingStrategy`]: windows of `size` characters advancing by
//! `size - overlap`, so consecutive chunks share their trailing/leading
//! `overlap` characters. Window boundaries are character boundaries, never
//! byte offsets, so multibyte text is always split safely.
//!
//! Each chunk receives a fresh UUID plus a SHA-256 hash of its text for
//! staleness detection downstream.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, ChunkingStrategy};

/// Split text into overlapping fixed-size windows.
/// Returns chunks with contiguous indices starting at 0; never returns an
/// empty list.
pub fn chunk_text(document_id: &str, text: &str, strategy: &ChunkingStrategy) -> Vec<Chunk> {
    let ChunkingStrategy::Fixed { size, overlap } = strategy;
    let step = size - overlap; // > 0 by the strategy invariant

    if text.is_empty() {
        return vec![make_chunk(document_id, 0, text)];
    }

    // Byte offsets of character boundaries, with the end sentinel.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let total_chars = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index: i64 = 0;

    loop {
        let end = (start + size).min(total_chars);
        let piece = &text[bounds[start]..bounds[end]];
        chunks.push(make_chunk(document_id, chunk_index, piece));
        chunk_index += 1;

        if end == total_chars {
            break;
        }
        start += step;
    }

    chunks
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
