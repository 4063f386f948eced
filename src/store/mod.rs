// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

pub mod graph;
pub mod vector;

pub use graph::{DocumentNode, GraphStore, HeadingNode, ParentNode};
pub use vector::{ChunkHit, ChunkMetadata, ChunkRecord, VectorStore, cosine_similarity};

use std::sync::Arc;

/// The two cooperating stores, keyed identically by heading id.
///
/// Ingestion dual-writes; retrieval reads the graph for summaries and the
/// vector store for content chunks.
#[derive(Clone)]
pub struct KnowledgeStore {
    pub graph: Arc<GraphStore>,
    pub vectors: Arc<VectorStore>,
}

impl KnowledgeStore {
    pub fn new(embedding_dimension: usize) -> Self {
        Self {
            graph: Arc::new(GraphStore::new()),
            vectors: Arc::new(VectorStore::new(embedding_dimension)),
        }
    }

    /// Load both stores from a snapshot directory.
    pub fn load(
        dir: &std::path::Path,
        embedding_dimension: usize,
    ) -> Result<Self, crate::utils::error::PlanweaveError> {
        Ok(Self {
            graph: Arc::new(GraphStore::load(dir)?),
            vectors: Arc::new(VectorStore::load(dir, embedding_dimension)?),
        })
    }

    /// Persist both stores to a snapshot directory.
    pub fn save(&self, dir: &std::path::Path) -> Result<(), crate::utils::error::PlanweaveError> {
        self.graph.save(dir)?;
        self.vectors.save(dir)?;
        Ok(())
    }
}
