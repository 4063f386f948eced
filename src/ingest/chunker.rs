// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! Token-based chunking of heading content.
//!
//! Each heading's raw content is split into overlapping token-bounded
//! windows before embedding. Windows break on line boundaries so every
//! chunk carries an exact line range back into the source document, which
//! is what makes chunk-level citations resolvable.

use crate::llm::tokenizer::Tokenizer;
use crate::utils::error::PlanweaveError;

/// Configuration for chunking heading content.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Maximum number of tokens per chunk.
    pub chunk_size: usize,
    /// Number of tokens to overlap between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 64,
        }
    }
}

impl ChunkConfig {
    /// Create a new chunk configuration with custom values.
    ///
    /// # Errors
    ///
    /// Returns an error if `chunk_overlap >= chunk_size` or the chunk size
    /// is below 50 tokens.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, PlanweaveError> {
        if chunk_overlap >= chunk_size || chunk_size < 50 {
            return Err(PlanweaveError::invalid_chunk_config(chunk_size, chunk_overlap));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

/// One token-bounded window of a heading's content.
#[derive(Debug, Clone)]
pub struct ChunkPiece {
    /// 0-indexed position within the heading.
    pub index: usize,
    pub text: String,
    /// 1-indexed line range in the source document, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub token_count: usize,
}

/// Split heading content into overlapping windows.
///
/// `first_line` is the 1-indexed document line of the content's first line.
/// Content that fits within a single chunk is returned as one piece.
pub fn chunk_content(
    content: &str,
    first_line: usize,
    config: &ChunkConfig,
    tokenizer: &dyn Tokenizer,
) -> Vec<ChunkPiece> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let line_tokens: Vec<usize> = lines.iter().map(|l| tokenizer.count_tokens(l)).collect();
    let total: usize = line_tokens.iter().sum();

    if total <= config.chunk_size {
        return vec![ChunkPiece {
            index: 0,
            text: content.to_string(),
            start_line: first_line,
            end_line: first_line + lines.len() - 1,
            token_count: total,
        }];
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        let mut end = start;
        let mut tokens = 0usize;

        while end < lines.len() {
            let next = tokens + line_tokens[end];
            // A single oversized line still forms a chunk on its own
            if next > config.chunk_size && end > start {
                break;
            }
            tokens = next;
            end += 1;
        }

        pieces.push(ChunkPiece {
            index: pieces.len(),
            text: lines[start..end].join("\n"),
            start_line: first_line + start,
            end_line: first_line + end - 1,
            token_count: tokens,
        });

        if end >= lines.len() {
            break;
        }

        // Walk back from the break point until the overlap budget is met,
        // always advancing by at least one line
        let mut overlap_tokens = 0usize;
        let mut next_start = end;
        while next_start > start + 1 && overlap_tokens < config.chunk_overlap {
            next_start -= 1;
            overlap_tokens += line_tokens[next_start];
        }
        start = next_start.max(start + 1);
    }

    pieces
}
