// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-document ingestion: tree production, bottom-up summarization,
//! embedding, chunking, and the dual write into the knowledge store.
//!
//! Each document commits all-or-nothing: any failure after a partial write
//! rolls the document back out of both stores. Distinct documents may be
//! ingested in parallel; writes for one document serialize on the store.

use crate::ingest::chunker::{ChunkConfig, chunk_content};
use crate::ingest::markdown::{self, DocumentTree};
use crate::ingest::summarize::summarize_tree;
use crate::llm::client::LlmClient;
use crate::llm::provider::Embedder;
use crate::llm::tokenizer::Tokenizer;
use crate::store::{ChunkMetadata, ChunkRecord, KnowledgeStore};
use crate::utils::error::PlanweaveError;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// How many documents may ingest concurrently.
const INGEST_WORKERS: usize = 4;

/// Embedding batch size for summaries and chunks.
const EMBED_BATCH: usize = 64;

/// Outcome of ingesting one document.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document: String,
    pub headings: usize,
    pub chunks: usize,
    /// Fraction of headings with a summary embedding; must be 1.0 for the
    /// document to commit.
    pub embedding_coverage: f64,
}

/// Outcome of ingesting a corpus directory.
#[derive(Debug, Default)]
pub struct CorpusReport {
    pub reports: Vec<IngestReport>,
    pub failures: Vec<(String, String)>,
}

pub struct Ingestor {
    store: KnowledgeStore,
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<LlmClient>,
    tokenizer: Arc<dyn Tokenizer>,
    chunk_config: ChunkConfig,
    rule_names: Vec<String>,
}

impl Ingestor {
    pub fn new(
        store: KnowledgeStore,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<LlmClient>,
        tokenizer: Arc<dyn Tokenizer>,
        chunk_config: ChunkConfig,
        rule_names: Vec<String>,
    ) -> Result<Self, PlanweaveError> {
        if embedder.dimension() != store.vectors.dimension() {
            return Err(PlanweaveError::DimensionMismatch {
                expected: store.vectors.dimension(),
                actual: embedder.dimension(),
            });
        }

        Ok(Self {
            store,
            embedder,
            summarizer,
            tokenizer,
            chunk_config,
            rule_names,
        })
    }

    /// Ingest a single parsed document.
    pub async fn ingest_tree(&self, tree: DocumentTree) -> Result<IngestReport, PlanweaveError> {
        let name = tree.document.name.clone();
        tracing::info!(document = %name, headings = tree.headings.len(), "Ingesting document");

        match self.ingest_tree_inner(tree).await {
            Ok(report) => Ok(report),
            Err(err) => {
                // All-or-nothing per document
                let _ = self.store.graph.remove_document(&name);
                let _ = self.store.vectors.remove_document(&name);
                tracing::warn!(document = %name, error = %err, "Ingestion rolled back");
                Err(err)
            }
        }
    }

    async fn ingest_tree_inner(
        &self,
        tree: DocumentTree,
    ) -> Result<IngestReport, PlanweaveError> {
        let DocumentTree {
            document,
            mut headings,
        } = tree;
        let name = document.name.clone();
        let heading_count = headings.len();

        // 1. Bottom-up summaries
        let summaries = summarize_tree(&self.summarizer, &headings).await?;

        // 2. Embed all summaries in batches, in heading order
        let ordered_ids: Vec<String> = headings.iter().map(|h| h.id.clone()).collect();
        let texts: Vec<String> = ordered_ids
            .iter()
            .map(|id| summaries.get(id).cloned().unwrap_or_default())
            .collect();

        let mut summary_vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            summary_vectors.extend(self.embedder.embed_batch(batch).await?);
        }

        let vectors_by_id: HashMap<&str, &Vec<f32>> = ordered_ids
            .iter()
            .map(String::as_str)
            .zip(summary_vectors.iter())
            .collect();

        for heading in &mut headings {
            heading.summary = summaries.get(&heading.id).cloned();
            heading.summary_embedding = vectors_by_id.get(heading.id.as_str()).map(|v| (*v).clone());
        }

        // Coverage gate: every heading must carry a summary and embedding
        let covered = headings
            .iter()
            .filter(|h| h.summary.is_some() && h.summary_embedding.is_some())
            .count();
        let coverage = if heading_count == 0 {
            1.0
        } else {
            covered as f64 / heading_count as f64
        };
        if coverage < 1.0 {
            return Err(PlanweaveError::Store(format!(
                "embedding coverage for '{}' is {:.0}%, expected 100%",
                name,
                coverage * 100.0
            )));
        }

        // 3. Chunk content and embed the chunks
        let mut records: Vec<ChunkRecord> = Vec::new();
        let mut chunk_texts: Vec<String> = Vec::new();
        for heading in &headings {
            let hierarchy_path = hierarchy_path_for(&headings, heading, &name);
            let pieces = chunk_content(
                &heading.content,
                heading.start_line,
                &self.chunk_config,
                self.tokenizer.as_ref(),
            );
            for piece in pieces {
                chunk_texts.push(piece.text.clone());
                records.push(ChunkRecord {
                    chunk_id: format!("{}_c{}", heading.id, piece.index),
                    node_id: heading.id.clone(),
                    text: piece.text,
                    embedding: Vec::new(),
                    start_line: piece.start_line,
                    end_line: piece.end_line,
                    metadata: ChunkMetadata {
                        source: name.clone(),
                        is_rule: document.is_rule,
                        hierarchy_path: hierarchy_path.clone(),
                    },
                });
            }
        }

        let mut chunk_vectors: Vec<Vec<f32>> = Vec::with_capacity(chunk_texts.len());
        for batch in chunk_texts.chunks(EMBED_BATCH) {
            chunk_vectors.extend(self.embedder.embed_batch(batch).await?);
        }
        for (record, vector) in records.iter_mut().zip(chunk_vectors) {
            record.embedding = vector;
        }

        let chunk_count = records.len();

        // 4. Dual write: graph first, then vectors
        self.store.graph.write_document(document, headings)?;
        self.store.vectors.write_document(&name, records)?;

        tracing::info!(
            document = %name,
            headings = heading_count,
            chunks = chunk_count,
            "Document committed"
        );

        Ok(IngestReport {
            document: name,
            headings: heading_count,
            chunks: chunk_count,
            embedding_coverage: coverage,
        })
    }

    /// Ingest one markdown file from disk.
    pub async fn ingest_file(
        &self,
        path: &Path,
        doc_type: &str,
    ) -> Result<IngestReport, PlanweaveError> {
        let tree = markdown::parse_file(path, doc_type, &self.rule_names)?;
        self.ingest_tree(tree).await
    }

    /// Ingest every `*.md` file under `dir`, in parallel across documents.
    ///
    /// Failures are collected per document; fully committed documents stay
    /// committed regardless of later failures.
    pub async fn ingest_directory(&self, dir: &Path, doc_type: &str) -> CorpusReport {
        let mut paths: Vec<std::path::PathBuf> = Vec::new();
        for entry in ignore::WalkBuilder::new(dir).build().flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                paths.push(path.to_path_buf());
            }
        }
        paths.sort();

        tracing::info!(count = paths.len(), dir = %dir.display(), "Scanning corpus");
        let progress = indicatif::ProgressBar::new(paths.len() as u64);

        let results: Vec<(String, Result<IngestReport, PlanweaveError>)> =
            stream::iter(paths.into_iter().map(|path| {
                let progress = progress.clone();
                async move {
                    let label = path.display().to_string();
                    let result = self.ingest_file(&path, doc_type).await;
                    progress.inc(1);
                    (label, result)
                }
            }))
            .buffer_unordered(INGEST_WORKERS)
            .collect()
            .await;

        progress.finish_and_clear();

        let mut report = CorpusReport::default();
        for (label, result) in results {
            match result {
                Ok(doc_report) => report.reports.push(doc_report),
                Err(err) => report.failures.push((label, err.to_string())),
            }
        }
        report.reports.sort_by(|a, b| a.document.cmp(&b.document));
        report
    }
}

fn hierarchy_path_for(
    headings: &[crate::store::HeadingNode],
    heading: &crate::store::HeadingNode,
    document: &str,
) -> String {
    let mut titles = vec![heading.title.clone()];
    let mut current = heading;
    while let Some(parent_id) = &current.parent_id {
        match headings.iter().find(|h| &h.id == parent_id) {
            Some(parent) => {
                titles.push(parent.title.clone());
                current = parent;
            }
            None => break,
        }
    }
    titles.push(document.to_string());
    titles.reverse();
    titles.join(" > ")
}
