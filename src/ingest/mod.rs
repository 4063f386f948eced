// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

pub mod chunker;
pub mod markdown;
pub mod pipeline;
pub mod summarize;

pub use chunker::{ChunkConfig, ChunkPiece, chunk_content};
pub use markdown::{DocumentTree, is_rule_document, parse_document, parse_file};
pub use pipeline::{CorpusReport, IngestReport, Ingestor};
