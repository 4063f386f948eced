//! Markdown document tree producer.
//!
//! Parses one markdown file into a `DocumentNode` plus a forest of
//! `HeadingNode`s with 1-indexed line ranges. A heading's range runs from
//! its own line to the line before the next heading of equal or shallower
//! level, so the parent owns the lines before its first child and child
//! ranges nest inside parent ranges by construction. No LLM involvement.

use crate::store::{DocumentNode, HeadingNode};
use crate::utils::error::PlanweaveError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(#{1,6})\s+(.+?)\s*$").expect("heading pattern is invalid")
});

/// A parsed document: the document node plus its heading forest.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    pub document: DocumentNode,
    pub headings: Vec<HeadingNode>,
}

/// Parse a markdown file from disk.
pub fn parse_file(
    path: &Path,
    doc_type: &str,
    rule_names: &[String],
) -> Result<DocumentTree, PlanweaveError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| PlanweaveError::DocumentParse {
            document: path.display().to_string(),
            message: "path has no usable file stem".to_string(),
        })?
        .to_string();

    let content = std::fs::read_to_string(path)?;
    parse_document(
        &name,
        &path.display().to_string(),
        doc_type,
        &content,
        rule_names,
    )
}

/// Parse markdown text into a document tree.
///
/// `rule_names` is the configured list of substring matchers; the document
/// is tagged `is_rule` when its name contains any of them
/// (case-insensitive).
pub fn parse_document(
    name: &str,
    source_path: &str,
    doc_type: &str,
    content: &str,
    rule_names: &[String],
) -> Result<DocumentTree, PlanweaveError> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Err(PlanweaveError::DocumentParse {
            document: name.to_string(),
            message: "document is empty".to_string(),
        });
    }

    // Locate headings, skipping fenced code blocks
    let mut raw: Vec<(usize, u8, String)> = Vec::new();
    let mut in_fence = false;
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = HEADING_RE.captures(line) {
            let level = caps[1].len() as u8;
            let title = caps[2].to_string();
            raw.push((idx + 1, level, title));
        }
    }

    if raw.is_empty() {
        return Err(PlanweaveError::DocumentParse {
            document: name.to_string(),
            message: "document contains no headings".to_string(),
        });
    }

    let total_lines = lines.len();
    let document = DocumentNode {
        name: name.to_string(),
        source_path: source_path.to_string(),
        doc_type: doc_type.to_string(),
        is_rule: is_rule_document(name, rule_names),
    };

    // A heading's range ends where the next heading at the same or a
    // shallower level begins
    let mut headings: Vec<HeadingNode> = Vec::with_capacity(raw.len());
    for (i, (start_line, level, title)) in raw.iter().enumerate() {
        let end_line = raw
            .iter()
            .skip(i + 1)
            .find(|(_, other_level, _)| other_level <= level)
            .map(|(other_start, _, _)| other_start - 1)
            .unwrap_or(total_lines);

        let body: String = lines[*start_line - 1..end_line].join("\n");

        headings.push(HeadingNode {
            id: format!("{}_h{}", name, i + 1),
            title: title.clone(),
            level: *level,
            start_line: *start_line,
            end_line,
            content: body,
            document: name.to_string(),
            parent_id: None,
            summary: None,
            summary_embedding: None,
        });
    }

    // Parent: nearest earlier heading with a shallower level
    for i in 0..headings.len() {
        let level = headings[i].level;
        let parent = headings[..i]
            .iter()
            .rev()
            .find(|h| h.level < level)
            .map(|h| h.id.clone());
        headings[i].parent_id = parent;
    }

    Ok(DocumentTree { document, headings })
}

/// True when the document name contains any configured rule-name substring,
/// case-insensitive.
pub fn is_rule_document(name: &str, rule_names: &[String]) -> bool {
    let lower = name.to_lowercase();
    rule_names
        .iter()
        .any(|rule| lower.contains(&rule.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Evacuation Protocol
Intro paragraph.

## Immediate Actions
- Sound the alarm

### Floor Wardens
Check each room.

## Assembly Points
Gather at lot B.
";

    #[test]
    fn test_parse_builds_hierarchy() {
        let tree = parse_document("evac", "/corpus/evac.md", "protocol", SAMPLE, &[]).unwrap();
        assert_eq!(tree.document.name, "evac");
        assert_eq!(tree.headings.len(), 4);

        let ids: Vec<&str> = tree.headings.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["evac_h1", "evac_h2", "evac_h3", "evac_h4"]);

        assert_eq!(tree.headings[0].parent_id, None);
        assert_eq!(tree.headings[1].parent_id.as_deref(), Some("evac_h1"));
        assert_eq!(tree.headings[2].parent_id.as_deref(), Some("evac_h2"));
        assert_eq!(tree.headings[3].parent_id.as_deref(), Some("evac_h1"));
    }

    #[test]
    fn test_line_ranges_nest_and_are_disjoint() {
        let tree = parse_document("evac", "/corpus/evac.md", "protocol", SAMPLE, &[]).unwrap();
        let root = &tree.headings[0];
        assert_eq!(root.start_line, 1);
        assert_eq!(root.end_line, 11);

        let immediate = &tree.headings[1];
        let assembly = &tree.headings[3];
        assert_eq!((immediate.start_line, immediate.end_line), (4, 9));
        assert_eq!((assembly.start_line, assembly.end_line), (10, 11));

        // Containment inside the root
        for child in &tree.headings[1..] {
            assert!(child.start_line >= root.start_line);
            assert!(child.end_line <= root.end_line);
        }
        // Siblings do not overlap
        assert!(immediate.end_line < assembly.start_line);
    }

    #[test]
    fn test_content_covers_range() {
        let tree = parse_document("evac", "/corpus/evac.md", "protocol", SAMPLE, &[]).unwrap();
        let wardens = &tree.headings[2];
        assert!(wardens.content.contains("### Floor Wardens"));
        assert!(wardens.content.contains("Check each room."));
        assert!(!wardens.content.contains("Assembly Points"));
    }

    #[test]
    fn test_headings_in_code_fences_ignored() {
        let text = "# Top\n```\n# not a heading\n```\n## Real\nbody\n";
        let tree = parse_document("doc", "/corpus/doc.md", "protocol", text, &[]).unwrap();
        assert_eq!(tree.headings.len(), 2);
        assert_eq!(tree.headings[1].title, "Real");
    }

    #[test]
    fn test_level_skip_parents_to_nearest_shallower() {
        let text = "# Top\n### Deep\nbody\n## Mid\nbody\n";
        let tree = parse_document("doc", "/corpus/doc.md", "protocol", text, &[]).unwrap();
        assert_eq!(tree.headings[1].parent_id.as_deref(), Some("doc_h1"));
        assert_eq!(tree.headings[2].parent_id.as_deref(), Some("doc_h1"));
    }

    #[test]
    fn test_rule_tagging_case_insensitive() {
        assert!(is_rule_document(
            "National-Guidelines-2024",
            &["guidelines".to_string()]
        ));
        assert!(!is_rule_document("evac-protocol", &["guidelines".to_string()]));
    }

    #[test]
    fn test_empty_or_headingless_rejected() {
        assert!(parse_document("doc", "p", "protocol", "", &[]).is_err());
        assert!(parse_document("doc", "p", "protocol", "just prose\n", &[]).is_err());
    }
}
