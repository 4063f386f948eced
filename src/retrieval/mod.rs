// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

pub mod engine;
pub mod fusion;
pub mod keywords;
pub mod mmr;

pub use engine::{
    DocumentFilter, Retrieved, RetrievedNeighbor, RetrievalConfig, RetrievalEngine, RetrievalMode,
};
pub use fusion::{RRF_K, reciprocal_rank_fusion};
pub use keywords::extract_keywords;
pub use mmr::{maximal_marginal_relevance, mmr_select};
