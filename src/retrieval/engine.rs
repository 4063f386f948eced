// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! Multi-mode retrieval over the knowledge store.
//!
//! All modes produce the same record shape with scores normalized to
//! [0, 1]. Missing summary embeddings exclude a node from semantic lanes
//! (logged, never fatal); empty result sets are empty lists, never errors.

use crate::llm::provider::Embedder;
use crate::retrieval::fusion::{self, RRF_K};
use crate::retrieval::keywords::{extract_keywords, keyword_overlap};
use crate::retrieval::mmr::mmr_select;
use crate::store::{HeadingNode, KnowledgeStore, ParentNode, cosine_similarity};
use crate::utils::error::PlanweaveError;
use std::collections::HashMap;
use std::sync::Arc;

/// Retrieval strategies; all return the same record shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Keyword matching against heading titles only.
    NodeName,
    /// Semantic search over summary embeddings.
    Summary,
    /// Semantic search over content chunks; chunk hits collapse to their node.
    Content,
    /// Keyword + summary lanes fused with RRF.
    Hybrid,
    /// Hybrid, boosted by the best query similarity among graph relatives.
    GraphExpanded,
    /// Hybrid, with parent and children attached to each result.
    ContextWindow,
}

/// Tuning knobs for the engine; defaults match the configuration surface.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub use_rrf: bool,
    pub use_mmr: bool,
    pub mmr_lambda: f32,
    pub rrf_k: f32,
    pub graph_expansion_depth: usize,
    pub graph_expansion_boost: f32,
    /// When false, context-window mode skips attaching graph relatives.
    pub context_window: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            use_rrf: true,
            use_mmr: true,
            mmr_lambda: 0.7,
            rrf_k: RRF_K,
            graph_expansion_depth: 1,
            graph_expansion_boost: 0.3,
            context_window: true,
        }
    }
}

/// Restricts retrieval to a document whitelist. Documents in
/// `always_include` (guideline documents) bypass the whitelist.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub documents: Vec<String>,
    pub always_include: Vec<String>,
}

impl DocumentFilter {
    pub fn allows(&self, document: &str) -> bool {
        if self.documents.is_empty() {
            return true;
        }
        self.documents.iter().any(|d| d == document)
            || self.always_include.iter().any(|d| d == document)
    }

    /// Document names to pass to the vector store, `None` when unfiltered.
    fn allowed_list(&self) -> Option<Vec<String>> {
        if self.documents.is_empty() {
            return None;
        }
        let mut all = self.documents.clone();
        for doc in &self.always_include {
            if !all.contains(doc) {
                all.push(doc.clone());
            }
        }
        Some(all)
    }
}

/// A graph relative attached to a result in context-window mode.
#[derive(Debug, Clone)]
pub struct RetrievedNeighbor {
    pub node_id: String,
    pub title: String,
    pub summary: Option<String>,
}

/// One retrieval hit.
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub node_id: String,
    pub text: String,
    /// Normalized to [0, 1].
    pub score: f32,
    pub document: String,
    pub title: String,
    pub start_line: usize,
    pub end_line: usize,
    pub is_rule: bool,
    pub parent: Option<RetrievedNeighbor>,
    pub children: Vec<RetrievedNeighbor>,
}

impl Retrieved {
    fn from_heading(heading: &HeadingNode, score: f32, is_rule: bool) -> Self {
        Self {
            node_id: heading.id.clone(),
            text: heading
                .summary
                .clone()
                .unwrap_or_else(|| heading.title.clone()),
            score,
            document: heading.document.clone(),
            title: heading.title.clone(),
            start_line: heading.start_line,
            end_line: heading.end_line,
            is_rule,
            parent: None,
            children: Vec::new(),
        }
    }
}

pub struct RetrievalEngine {
    store: KnowledgeStore,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(store: KnowledgeStore, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve `top_k` records for a query under the given mode.
    pub async fn retrieve(
        &self,
        query: &str,
        mode: RetrievalMode,
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<Retrieved>, PlanweaveError> {
        let results = match mode {
            RetrievalMode::NodeName => self.node_name_lane(query, top_k, filter),
            RetrievalMode::Summary => self.summary_lane(query, top_k, filter).await?,
            RetrievalMode::Content => self.content_lane(query, top_k, filter).await?,
            RetrievalMode::Hybrid => self.hybrid(query, top_k, filter).await?,
            RetrievalMode::GraphExpanded => self.graph_expanded(query, top_k, filter).await?,
            RetrievalMode::ContextWindow => {
                let mut results = self.hybrid(query, top_k, filter).await?;
                if self.config.context_window {
                    for result in &mut results {
                        self.attach_context(result);
                    }
                }
                results
            }
        };

        tracing::debug!(
            query,
            mode = ?mode,
            results = results.len(),
            "Retrieval complete"
        );
        Ok(results)
    }

    /// Keyword matching against heading titles only.
    fn node_name_lane(
        &self,
        query: &str,
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Vec<Retrieved> {
        let keywords = extract_keywords(query);
        let rule_docs = self.rule_document_set();

        let mut hits: Vec<Retrieved> = self
            .store
            .graph
            .all_headings()
            .into_iter()
            .filter(|h| filter.allows(&h.document))
            .filter_map(|h| {
                let score = keyword_overlap(&keywords, &h.title);
                if score > 0.0 {
                    let is_rule = rule_docs.contains(&h.document);
                    Some(Retrieved::from_heading(&h, score, is_rule))
                } else {
                    None
                }
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(top_k);
        hits
    }

    /// Semantic search over summary embeddings.
    async fn summary_lane(
        &self,
        query: &str,
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<Retrieved>, PlanweaveError> {
        let query_embedding = self.embedder.embed(query).await?;
        let rule_docs = self.rule_document_set();

        let mut hits: Vec<Retrieved> = Vec::new();
        for heading in self.store.graph.all_headings() {
            if !filter.allows(&heading.document) {
                continue;
            }
            match &heading.summary_embedding {
                Some(embedding) => {
                    let similarity = cosine_similarity(&query_embedding, embedding);
                    let is_rule = rule_docs.contains(&heading.document);
                    hits.push(Retrieved::from_heading(
                        &heading,
                        normalize_cosine(similarity),
                        is_rule,
                    ));
                }
                None => {
                    tracing::debug!(node_id = %heading.id, "Skipping node without summary embedding");
                }
            }
        }

        sort_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Semantic search over content chunks, collapsed to node identity.
    async fn content_lane(
        &self,
        query: &str,
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<Retrieved>, PlanweaveError> {
        let query_embedding = self.embedder.embed(query).await?;
        let allowed = filter.allowed_list();

        // Over-fetch so collapsing chunks to nodes still fills top_k
        let chunk_hits =
            self.store
                .vectors
                .search(&query_embedding, top_k * 4, allowed.as_deref());

        let mut best_per_node: HashMap<String, Retrieved> = HashMap::new();
        for hit in chunk_hits {
            let score = normalize_cosine(hit.similarity);
            let entry = best_per_node.get(&hit.record.node_id);
            if entry.map_or(true, |existing| score > existing.score) {
                best_per_node.insert(
                    hit.record.node_id.clone(),
                    Retrieved {
                        node_id: hit.record.node_id.clone(),
                        text: hit.record.text.clone(),
                        score,
                        document: hit.record.metadata.source.clone(),
                        title: self
                            .store
                            .graph
                            .heading(&hit.record.node_id)
                            .map(|h| h.title)
                            .unwrap_or_default(),
                        start_line: hit.record.start_line,
                        end_line: hit.record.end_line,
                        is_rule: hit.record.metadata.is_rule,
                        parent: None,
                        children: Vec::new(),
                    },
                );
            }
        }

        let mut hits: Vec<Retrieved> = best_per_node.into_values().collect();
        sort_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Keyword + summary lanes, fused.
    async fn hybrid(
        &self,
        query: &str,
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<Retrieved>, PlanweaveError> {
        // Over-fetch each lane so fusion sees candidates beyond top_k
        let fetch = top_k.saturating_mul(3).max(top_k);

        let keyword_hits = self.keyword_over_summaries(query, fetch, filter);
        let semantic_hits = self.summary_lane(query, fetch, filter).await?;

        let fused = if self.config.use_rrf {
            let lists: Vec<Vec<String>> = vec![
                keyword_hits.iter().map(|r| r.node_id.clone()).collect(),
                semantic_hits.iter().map(|r| r.node_id.clone()).collect(),
            ];
            fusion::normalize_scores(fusion::reciprocal_rank_fusion(&lists, self.config.rrf_k))
        } else {
            // Average the lanes' normalized scores without rank fusion
            let mut scores: HashMap<String, (f32, u32)> = HashMap::new();
            for hit in keyword_hits.iter().chain(semantic_hits.iter()) {
                let entry = scores.entry(hit.node_id.clone()).or_insert((0.0, 0));
                entry.0 += hit.score;
                entry.1 += 1;
            }
            let mut merged: Vec<(String, f32)> = scores
                .into_iter()
                .map(|(id, (sum, n))| (id, sum / n as f32))
                .collect();
            merged.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            merged
        };

        let rule_docs = self.rule_document_set();
        let mut hits: Vec<Retrieved> = fused
            .into_iter()
            .filter_map(|(node_id, score)| {
                self.store.graph.heading(&node_id).map(|heading| {
                    let is_rule = rule_docs.contains(&heading.document);
                    Retrieved::from_heading(&heading, score, is_rule)
                })
            })
            .collect();

        if self.config.use_mmr {
            hits = self.diversify(hits, top_k);
        } else {
            hits.truncate(top_k);
        }

        Ok(hits)
    }

    /// Hybrid with a score boost from the strongest graph relative.
    async fn graph_expanded(
        &self,
        query: &str,
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<Retrieved>, PlanweaveError> {
        let mut hits = self.hybrid(query, top_k, filter).await?;
        let query_embedding = self.embedder.embed(query).await?;

        for hit in &mut hits {
            let mut best_relative: f32 = 0.0;
            for relative in self.relatives(&hit.node_id, self.config.graph_expansion_depth) {
                if let Some(embedding) = &relative.summary_embedding {
                    let similarity =
                        normalize_cosine(cosine_similarity(&query_embedding, embedding));
                    best_relative = best_relative.max(similarity);
                }
            }
            hit.score = (hit.score + self.config.graph_expansion_boost * best_relative).min(1.0);
        }

        sort_hits(&mut hits);
        Ok(hits)
    }

    /// Keyword lane over titles and summaries, for the hybrid fuse.
    fn keyword_over_summaries(
        &self,
        query: &str,
        top_k: usize,
        filter: &DocumentFilter,
    ) -> Vec<Retrieved> {
        let keywords = extract_keywords(query);
        let rule_docs = self.rule_document_set();

        let mut hits: Vec<Retrieved> = self
            .store
            .graph
            .all_headings()
            .into_iter()
            .filter(|h| filter.allows(&h.document))
            .filter_map(|h| {
                let haystack = match &h.summary {
                    Some(summary) => format!("{} {}", h.title, summary),
                    None => h.title.clone(),
                };
                let score = keyword_overlap(&keywords, &haystack);
                if score > 0.0 {
                    let is_rule = rule_docs.contains(&h.document);
                    Some(Retrieved::from_heading(&h, score, is_rule))
                } else {
                    None
                }
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(top_k);
        hits
    }

    /// MMR with fused scores as relevance and summary embeddings for
    /// redundancy; the selected set is re-sorted by score so ranking
    /// stays monotone. With λ = 1 the membership equals the fused top-k.
    fn diversify(&self, hits: Vec<Retrieved>, top_k: usize) -> Vec<Retrieved> {
        if hits.len() <= top_k {
            return hits;
        }

        let relevance: Vec<f32> = hits.iter().map(|hit| hit.score).collect();
        let embeddings: Vec<Vec<f32>> = hits
            .iter()
            .map(|hit| {
                self.store
                    .graph
                    .heading(&hit.node_id)
                    .and_then(|h| h.summary_embedding)
                    .unwrap_or_default()
            })
            .collect();

        let selected = mmr_select(&relevance, &embeddings, top_k, self.config.mmr_lambda);

        let mut diversified: Vec<Retrieved> = selected
            .into_iter()
            .filter_map(|idx| hits.get(idx).cloned())
            .collect();
        sort_hits(&mut diversified);
        diversified
    }

    /// Parent plus descendants down to `depth` levels.
    fn relatives(&self, node_id: &str, depth: usize) -> Vec<HeadingNode> {
        let mut relatives: Vec<HeadingNode> = Vec::new();

        if let Some(ParentNode::Heading(parent)) = self.store.graph.parent_of(node_id) {
            relatives.push(parent);
        }

        let mut frontier = vec![node_id.to_string()];
        for _ in 0..depth.max(1) {
            let mut next = Vec::new();
            for id in &frontier {
                for child in self.store.graph.children_of(id) {
                    next.push(child.id.clone());
                    relatives.push(child);
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }

        relatives
    }

    fn attach_context(&self, result: &mut Retrieved) {
        if let Some(ParentNode::Heading(parent)) = self.store.graph.parent_of(&result.node_id) {
            result.parent = Some(RetrievedNeighbor {
                node_id: parent.id,
                title: parent.title,
                summary: parent.summary,
            });
        }
        result.children = self
            .store
            .graph
            .children_of(&result.node_id)
            .into_iter()
            .map(|child| RetrievedNeighbor {
                node_id: child.id,
                title: child.title,
                summary: child.summary,
            })
            .collect();
    }

    fn rule_document_set(&self) -> std::collections::HashSet<String> {
        self.store
            .graph
            .rule_documents()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }
}

/// Map cosine similarity from [-1, 1] into [0, 1].
fn normalize_cosine(similarity: f32) -> f32 {
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Descending score with a deterministic id tie-break.
fn sort_hits(hits: &mut [Retrieved]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
}
