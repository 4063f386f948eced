//! In-process vector store for chunked heading content.
//!
//! Records are keyed by chunk id and carry the owning heading's node id,
//! so retrieval results resolve back into the graph. Chunks are never
//! updated in place; re-ingesting a document rewrites its chunk set.

use crate::utils::error::PlanweaveError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// Metadata attached to every content chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Owning document name.
    pub source: String,
    pub is_rule: bool,
    /// `doc > section > subsection` path of the owning heading.
    pub hierarchy_path: String,
}

/// A token-bounded slice of a heading's raw content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    /// Owning heading id.
    pub node_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub start_line: usize,
    pub end_line: usize,
    pub metadata: ChunkMetadata,
}

/// A scored search hit.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub record: ChunkRecord,
    /// Cosine similarity in [-1, 1]; callers normalize for ranking.
    pub similarity: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VectorInner {
    /// document name -> its chunks
    by_document: HashMap<String, Vec<ChunkRecord>>,
}

/// Content-chunk vector store with cosine search.
#[derive(Debug, Default)]
pub struct VectorStore {
    dimension: usize,
    inner: RwLock<VectorInner>,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(VectorInner::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Replace all chunks for a document in one transaction.
    pub fn write_document(
        &self,
        document: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), PlanweaveError> {
        for chunk in &chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(PlanweaveError::DimensionMismatch {
                    expected: self.dimension,
                    actual: chunk.embedding.len(),
                });
            }
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| PlanweaveError::Store("vector store lock poisoned".to_string()))?;
        inner.by_document.insert(document.to_string(), chunks);
        Ok(())
    }

    /// Remove a document's chunks, if present.
    pub fn remove_document(&self, document: &str) -> Result<(), PlanweaveError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| PlanweaveError::Store("vector store lock poisoned".to_string()))?;
        inner.by_document.remove(document);
        Ok(())
    }

    /// Top-k chunks by cosine similarity to the query embedding.
    ///
    /// `documents` restricts the search to a document whitelist when
    /// non-empty. Results are sorted by descending similarity.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        documents: Option<&[String]>,
    ) -> Vec<ChunkHit> {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(_) => return Vec::new(),
        };

        let mut hits: Vec<ChunkHit> = inner
            .by_document
            .iter()
            .filter(|(name, _)| match documents {
                Some(allowed) if !allowed.is_empty() => allowed.iter().any(|d| d == *name),
                _ => true,
            })
            .flat_map(|(_, chunks)| chunks.iter())
            .map(|record| ChunkHit {
                record: record.clone(),
                similarity: cosine_similarity(query, &record.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }

    /// Total number of chunks across all documents.
    pub fn count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.by_document.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Number of chunks for one document.
    pub fn count_for(&self, document: &str) -> usize {
        self.inner
            .read()
            .map(|inner| inner.by_document.get(document).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Persist the chunk collections as JSON under `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), PlanweaveError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| PlanweaveError::Store("vector store lock poisoned".to_string()))?;
        std::fs::create_dir_all(dir)?;
        let payload = serde_json::to_vec(&*inner)
            .map_err(|e| PlanweaveError::Store(format!("failed to serialize chunks: {}", e)))?;
        std::fs::write(dir.join("chunks.json"), payload)?;
        Ok(())
    }

    /// Load a store previously written by [`VectorStore::save`].
    pub fn load(dir: &Path, dimension: usize) -> Result<Self, PlanweaveError> {
        let payload = std::fs::read(dir.join("chunks.json"))?;
        let inner: VectorInner = serde_json::from_slice(&payload)
            .map_err(|e| PlanweaveError::Store(format!("corrupt chunk snapshot: {}", e)))?;
        Ok(Self {
            dimension,
            inner: RwLock::new(inner),
        })
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs, which keeps
/// nodes with missing or degenerate embeddings out of the top ranks
/// instead of erroring the whole retrieval.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
