// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! In-process graph store for the document hierarchy.
//!
//! Holds `DocumentNode`s and `HeadingNode`s joined by subsection-of edges,
//! with the per-heading summary embedding stored on the node itself so
//! semantic reads never consult a second system. Writes replace a whole
//! document atomically; reads take a shared lock.
//!
//! Indexes: heading id, document name, document is_rule.

use crate::utils::error::PlanweaveError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// A whole ingested document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentNode {
    /// Unique document name (stem of the source file).
    pub name: String,
    pub source_path: String,
    /// Category tag (e.g., "protocol", "guideline").
    pub doc_type: String,
    /// True when the name matches a configured rule-name substring.
    pub is_rule: bool,
}

/// A hierarchical section of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadingNode {
    /// Unique id of form `<doc_name>_h<n>`.
    pub id: String,
    pub title: String,
    /// Markdown heading level, 1-6.
    pub level: u8,
    /// 1-indexed, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    /// Raw enclosed text (the heading's own body plus subsections).
    pub content: String,
    /// Owning document name.
    pub document: String,
    /// Parent heading id; `None` for headings attached directly to the document.
    pub parent_id: Option<String>,
    /// LLM-generated summary, filled during ingestion.
    pub summary: Option<String>,
    /// Embedding of the summary, filled during ingestion.
    pub summary_embedding: Option<Vec<f32>>,
}

/// Parent of a heading in the subsection-of hierarchy.
#[derive(Debug, Clone)]
pub enum ParentNode {
    Document(DocumentNode),
    Heading(HeadingNode),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphInner {
    documents: HashMap<String, DocumentNode>,
    headings: HashMap<String, HeadingNode>,
    /// heading id -> child heading ids, in document order
    children: HashMap<String, Vec<String>>,
    /// document name -> top-level heading ids, in document order
    roots: HashMap<String, Vec<String>>,
}

/// Shared graph store. Writes are transactional per document; concurrent
/// writers to the same document serialize on the store lock.
#[derive(Debug, Default)]
pub struct GraphStore {
    inner: RwLock<GraphInner>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a document and its whole heading tree in one transaction.
    ///
    /// Validates tree containment before touching the store: every heading
    /// must belong to the document, child ranges must nest inside their
    /// parent's range, and sibling ranges must not overlap.
    pub fn write_document(
        &self,
        document: DocumentNode,
        headings: Vec<HeadingNode>,
    ) -> Result<(), PlanweaveError> {
        validate_tree(&document, &headings)?;

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut roots: Vec<String> = Vec::new();
        for heading in &headings {
            match &heading.parent_id {
                Some(parent) => children.entry(parent.clone()).or_default().push(heading.id.clone()),
                None => roots.push(heading.id.clone()),
            }
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| PlanweaveError::Store("graph store lock poisoned".to_string()))?;

        remove_document_locked(&mut inner, &document.name);

        for heading in headings {
            inner.headings.insert(heading.id.clone(), heading);
        }
        for (parent, kids) in children {
            inner.children.insert(parent, kids);
        }
        inner.roots.insert(document.name.clone(), roots);
        inner.documents.insert(document.name.clone(), document);

        Ok(())
    }

    /// Remove a document and its headings, if present.
    pub fn remove_document(&self, name: &str) -> Result<(), PlanweaveError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| PlanweaveError::Store("graph store lock poisoned".to_string()))?;
        remove_document_locked(&mut inner, name);
        Ok(())
    }

    /// Look up a heading by id.
    pub fn heading(&self, id: &str) -> Option<HeadingNode> {
        self.inner.read().ok()?.headings.get(id).cloned()
    }

    /// Look up a document by name.
    pub fn document(&self, name: &str) -> Option<DocumentNode> {
        self.inner.read().ok()?.documents.get(name).cloned()
    }

    /// All documents tagged as rules.
    pub fn rule_documents(&self) -> Vec<DocumentNode> {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .documents
                    .values()
                    .filter(|d| d.is_rule)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All document names.
    pub fn document_names(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|inner| inner.documents.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct children of a heading, in document order.
    pub fn children_of(&self, id: &str) -> Vec<HeadingNode> {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .children
                    .get(id)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|cid| inner.headings.get(cid).cloned())
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Top-level headings of a document, in document order.
    pub fn document_roots(&self, name: &str) -> Vec<HeadingNode> {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .roots
                    .get(name)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|hid| inner.headings.get(hid).cloned())
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// The parent of a heading: another heading, or the owning document.
    pub fn parent_of(&self, id: &str) -> Option<ParentNode> {
        let inner = self.inner.read().ok()?;
        let heading = inner.headings.get(id)?;
        match &heading.parent_id {
            Some(parent_id) => inner
                .headings
                .get(parent_id)
                .cloned()
                .map(ParentNode::Heading),
            None => inner
                .documents
                .get(&heading.document)
                .cloned()
                .map(ParentNode::Document),
        }
    }

    /// Every heading in the subtree rooted at `id`, excluding `id` itself.
    /// Depth-first, document order.
    pub fn descendants(&self, id: &str) -> Vec<HeadingNode> {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(_) => return Vec::new(),
        };

        let mut result = Vec::new();
        let mut stack: Vec<String> = inner
            .children
            .get(id)
            .map(|kids| kids.iter().rev().cloned().collect())
            .unwrap_or_default();

        while let Some(current) = stack.pop() {
            if let Some(node) = inner.headings.get(&current) {
                result.push(node.clone());
            }
            if let Some(kids) = inner.children.get(&current) {
                for kid in kids.iter().rev() {
                    stack.push(kid.clone());
                }
            }
        }

        result
    }

    /// Every heading in the store.
    pub fn all_headings(&self) -> Vec<HeadingNode> {
        self.inner
            .read()
            .map(|inner| inner.headings.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Hierarchy path for a heading: `doc > section > subsection`.
    pub fn hierarchy_path(&self, id: &str) -> Option<String> {
        let inner = self.inner.read().ok()?;
        let mut titles = Vec::new();
        let mut current = inner.headings.get(id)?;
        titles.push(current.title.clone());
        while let Some(parent_id) = &current.parent_id {
            current = inner.headings.get(parent_id)?;
            titles.push(current.title.clone());
        }
        titles.push(current.document.clone());
        titles.reverse();
        Some(titles.join(" > "))
    }

    /// Count of headings per document, for ingestion reporting.
    pub fn heading_count(&self, document: &str) -> usize {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .headings
                    .values()
                    .filter(|h| h.document == document)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Persist the graph as JSON under `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), PlanweaveError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| PlanweaveError::Store("graph store lock poisoned".to_string()))?;
        std::fs::create_dir_all(dir)?;
        let payload = serde_json::to_vec(&*inner)
            .map_err(|e| PlanweaveError::Store(format!("failed to serialize graph: {}", e)))?;
        std::fs::write(dir.join("graph.json"), payload)?;
        Ok(())
    }

    /// Load a graph previously written by [`GraphStore::save`].
    pub fn load(dir: &Path) -> Result<Self, PlanweaveError> {
        let payload = std::fs::read(dir.join("graph.json"))?;
        let inner: GraphInner = serde_json::from_slice(&payload)
            .map_err(|e| PlanweaveError::Store(format!("corrupt graph snapshot: {}", e)))?;
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

fn remove_document_locked(inner: &mut GraphInner, name: &str) {
    inner.documents.remove(name);
    inner.roots.remove(name);
    let doomed: Vec<String> = inner
        .headings
        .values()
        .filter(|h| h.document == name)
        .map(|h| h.id.clone())
        .collect();
    for id in doomed {
        inner.headings.remove(&id);
        inner.children.remove(&id);
    }
}

/// Validate the tree invariants for a document's headings.
fn validate_tree(
    document: &DocumentNode,
    headings: &[HeadingNode],
) -> Result<(), PlanweaveError> {
    let by_id: HashMap<&str, &HeadingNode> =
        headings.iter().map(|h| (h.id.as_str(), h)).collect();

    let mut sibling_groups: HashMap<Option<&str>, Vec<&HeadingNode>> = HashMap::new();

    for heading in headings {
        if heading.document != document.name {
            return Err(PlanweaveError::Store(format!(
                "heading {} belongs to document '{}', not '{}'",
                heading.id, heading.document, document.name
            )));
        }
        if heading.start_line > heading.end_line {
            return Err(PlanweaveError::Store(format!(
                "heading {} has inverted line range {}..{}",
                heading.id, heading.start_line, heading.end_line
            )));
        }
        if let Some(parent_id) = &heading.parent_id {
            let parent = by_id.get(parent_id.as_str()).ok_or_else(|| {
                PlanweaveError::Store(format!(
                    "heading {} references missing parent {}",
                    heading.id, parent_id
                ))
            })?;
            if heading.start_line < parent.start_line || heading.end_line > parent.end_line {
                return Err(PlanweaveError::Store(format!(
                    "heading {} range {}..{} escapes parent {} range {}..{}",
                    heading.id,
                    heading.start_line,
                    heading.end_line,
                    parent.id,
                    parent.start_line,
                    parent.end_line
                )));
            }
        }
        sibling_groups
            .entry(heading.parent_id.as_deref())
            .or_default()
            .push(heading);
    }

    for siblings in sibling_groups.values_mut() {
        siblings.sort_by_key(|h| h.start_line);
        for pair in siblings.windows(2) {
            if pair[1].start_line <= pair[0].end_line {
                return Err(PlanweaveError::Store(format!(
                    "sibling headings {} and {} have overlapping ranges",
                    pair[0].id, pair[1].id
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> DocumentNode {
        DocumentNode {
            name: name.to_string(),
            source_path: format!("/corpus/{}.md", name),
            doc_type: "protocol".to_string(),
            is_rule: false,
        }
    }

    fn heading(
        id: &str,
        document: &str,
        parent: Option<&str>,
        level: u8,
        lines: (usize, usize),
    ) -> HeadingNode {
        HeadingNode {
            id: id.to_string(),
            title: format!("Section {}", id),
            level,
            start_line: lines.0,
            end_line: lines.1,
            content: String::new(),
            document: document.to_string(),
            parent_id: parent.map(str::to_string),
            summary: None,
            summary_embedding: None,
        }
    }

    fn sample_store() -> GraphStore {
        let store = GraphStore::new();
        store
            .write_document(
                doc("evac"),
                vec![
                    heading("evac_h1", "evac", None, 1, (1, 30)),
                    heading("evac_h2", "evac", Some("evac_h1"), 2, (5, 18)),
                    heading("evac_h3", "evac", Some("evac_h1"), 2, (19, 30)),
                    heading("evac_h4", "evac", Some("evac_h2"), 3, (10, 18)),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let store = sample_store();
        assert_eq!(store.heading("evac_h2").unwrap().title, "Section evac_h2");
        assert_eq!(store.document("evac").unwrap().doc_type, "protocol");
        assert!(store.heading("evac_h9").is_none());
    }

    #[test]
    fn test_children_and_parent_edges() {
        let store = sample_store();

        let kids = store.children_of("evac_h1");
        assert_eq!(
            kids.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            vec!["evac_h2", "evac_h3"]
        );

        match store.parent_of("evac_h4") {
            Some(ParentNode::Heading(h)) => assert_eq!(h.id, "evac_h2"),
            other => panic!("expected heading parent, got {:?}", other.is_some()),
        }
        match store.parent_of("evac_h1") {
            Some(ParentNode::Document(d)) => assert_eq!(d.name, "evac"),
            other => panic!("expected document parent, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn test_descendants_depth_first() {
        let store = sample_store();
        let subtree: Vec<String> = store
            .descendants("evac_h1")
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(subtree, vec!["evac_h2", "evac_h4", "evac_h3"]);
    }

    #[test]
    fn test_hierarchy_path() {
        let store = sample_store();
        assert_eq!(
            store.hierarchy_path("evac_h4").unwrap(),
            "evac > Section evac_h1 > Section evac_h2 > Section evac_h4"
        );
    }

    #[test]
    fn test_rewrite_replaces_document() {
        let store = sample_store();
        store
            .write_document(
                doc("evac"),
                vec![heading("evac_h1", "evac", None, 1, (1, 10))],
            )
            .unwrap();

        assert!(store.heading("evac_h2").is_none());
        assert_eq!(store.heading_count("evac"), 1);
    }

    #[test]
    fn test_rejects_range_escaping_parent() {
        let store = GraphStore::new();
        let result = store.write_document(
            doc("bad"),
            vec![
                heading("bad_h1", "bad", None, 1, (5, 10)),
                heading("bad_h2", "bad", Some("bad_h1"), 2, (8, 14)),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_overlapping_siblings() {
        let store = GraphStore::new();
        let result = store.write_document(
            doc("bad"),
            vec![
                heading("bad_h1", "bad", None, 1, (1, 10)),
                heading("bad_h2", "bad", None, 1, (10, 20)),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rule_document_scan() {
        let store = sample_store();
        let mut rule = doc("national-guidelines");
        rule.is_rule = true;
        store.write_document(rule, vec![]).unwrap();

        let rules = store.rule_documents();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "national-guidelines");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample_store();
        store.save(dir.path()).unwrap();

        let reloaded = GraphStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.heading_count("evac"), 4);
        assert_eq!(
            reloaded.children_of("evac_h1").len(),
            store.children_of("evac_h1").len()
        );
    }
}
