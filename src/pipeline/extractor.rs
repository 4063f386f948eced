//! Extractor stage: atomic actions and tables from node content.
//!
//! Consumes the per-subject nodes plus the special-protocols bypass list.
//! Node content over the segmentation budget is split markdown-aware
//! (heading boundaries first, token windows as a fallback) and each
//! segment goes through the extraction agent. Actions from bypass nodes
//! are tagged `from_special_protocol`. Ids are assigned after the ordered
//! merge, so output is deterministic for a seeded backend.

use crate::ingest::chunker::{ChunkConfig, chunk_content};
use crate::llm::provider::Message;
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{
    Action, PipelineState, PriorityLevel, Reference, Stage, Table, TableType,
};
use crate::store::HeadingNode;
use crate::utils::error::PlanweaveError;
use futures::stream::{self, StreamExt};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Extraction {
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    tables: Vec<RawTable>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    action_text: String,
    #[serde(default)]
    who: String,
    #[serde(default)]
    when: String,
    #[serde(default = "default_priority")]
    priority_level: PriorityLevel,
    #[serde(default)]
    start_line: usize,
    #[serde(default)]
    end_line: usize,
}

fn default_priority() -> PriorityLevel {
    PriorityLevel::ShortTerm
}

#[derive(Debug, Deserialize)]
struct RawTable {
    table_title: String,
    #[serde(default = "default_table_type")]
    table_type: TableType,
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
    #[serde(default)]
    markdown_content: String,
    /// Indexes into this segment's `actions` list for rows converted to
    /// actions.
    #[serde(default)]
    derived_action_indexes: Vec<usize>,
}

fn default_table_type() -> TableType {
    TableType::Other
}

/// Extraction output of one node, before id assignment.
struct NodeYield {
    node: HeadingNode,
    from_special: bool,
    actions: Vec<RawAction>,
    tables: Vec<(RawTable, Vec<usize>)>,
    failures: Vec<String>,
}

pub async fn run(state: &mut PipelineState, ctx: &StageContext) -> Result<(), PlanweaveError> {
    let feedback = state.take_feedback(Stage::Extractor);

    // Normal nodes across subjects, then the bypass lane. A node in both
    // lists is extracted once, with the bypass tag.
    let special: Vec<String> = state.special_protocols_nodes.clone();
    let mut work: Vec<(String, bool)> = Vec::new();
    for subject in &state.subject_nodes {
        for id in &subject.nodes {
            if special.contains(id) {
                continue;
            }
            if !work.iter().any(|(existing, _)| existing == id) {
                work.push((id.clone(), false));
            }
        }
    }
    for id in &special {
        if !work.iter().any(|(existing, _)| existing == id) {
            work.push((id.clone(), true));
        }
    }

    let handle = ctx.runtime.handle("extractor")?;
    let system = ctx.prompts.system_prompt("extractor", None);

    let yields: Vec<Option<NodeYield>> = stream::iter(work.into_iter().map(|(id, from_special)| {
        let handle = &handle;
        let system = system.as_str();
        let feedback = feedback.as_deref();
        async move {
            let node = match ctx.store.graph.heading(&id) {
                Some(node) => node,
                None => {
                    tracing::warn!(node_id = %id, "Extraction node missing from graph, skipping");
                    return None;
                }
            };
            Some(extract_node(ctx, handle, system, feedback, node, from_special).await)
        }
    }))
    .buffered(ctx.runtime.workers)
    .collect()
    .await;

    // Assign ids after the ordered merge
    let mut actions: Vec<Action> = Vec::new();
    let mut tables: Vec<Table> = Vec::new();

    for node_yield in yields.into_iter().flatten() {
        let NodeYield {
            node,
            from_special,
            actions: raw_actions,
            tables: raw_tables,
            failures,
        } = node_yield;

        for failure in failures {
            state.record_error(Stage::Extractor, "malformed_output", failure);
        }

        let base_index = actions.len();

        for raw in raw_actions {
            let id = format!("act-{}", actions.len() + 1);
            let (start, end) = clamp_range(raw.start_line, raw.end_line, &node);
            actions.push(Action {
                id,
                action_text: raw.action_text,
                who: raw.who,
                when: raw.when,
                priority_level: raw.priority_level,
                reference: Reference {
                    document: node.document.clone(),
                    line_range: (start, end),
                    node_id: node.id.clone(),
                    node_title: node.title.clone(),
                },
                sources: vec![format!("{}:{}:{}-{}", node.document, node.id, start, end)],
                relevance_score: None,
                relevance_rationale: None,
                timing_flagged: false,
                actor_flagged: false,
                merged_from: Vec::new(),
                from_special_protocol: from_special,
            });
        }

        for (raw, action_indexes) in raw_tables {
            let id = format!("tab-{}", tables.len() + 1);
            let extracted_actions = action_indexes
                .into_iter()
                .filter_map(|idx| actions.get(base_index + idx).map(|a| a.id.clone()))
                .collect();
            tables.push(Table {
                id,
                table_title: raw.table_title,
                table_type: raw.table_type,
                headers: raw.headers,
                rows: raw.rows,
                markdown_content: raw.markdown_content,
                reference: Reference {
                    document: node.document.clone(),
                    line_range: (node.start_line, node.end_line),
                    node_id: node.id.clone(),
                    node_title: node.title.clone(),
                },
                extracted_actions,
            });
        }
    }

    tracing::info!(
        actions = actions.len(),
        tables = tables.len(),
        "Extraction complete"
    );
    state.actions = actions;
    state.tables = tables;
    Ok(())
}

async fn extract_node(
    ctx: &StageContext,
    handle: &crate::agents::runtime::AgentHandle,
    system: &str,
    feedback: Option<&str>,
    node: HeadingNode,
    from_special: bool,
) -> NodeYield {
    let segments = segment_markdown(
        &node.content,
        node.start_line,
        ctx.config.extractor_segment_tokens,
        ctx.tokenizer.as_ref(),
    );

    let mut actions: Vec<RawAction> = Vec::new();
    let mut tables: Vec<(RawTable, Vec<usize>)> = Vec::new();
    let mut failures: Vec<String> = Vec::new();

    for (segment_index, (text, first_line)) in segments.iter().enumerate() {
        let numbered = number_lines(text, *first_line);

        let mut user = format!(
            "Source document: {}\nSection: {} (lines {}-{})\n\n\
             <content>\n{}\n</content>\n",
            node.document, node.title, node.start_line, node.end_line, numbered
        );
        if let Some(feedback) = feedback {
            user.push_str(&format!("\nReviewer feedback:\n{}\n", feedback));
        }
        user.push_str(
            "\nExtract every atomic action and structured table. Use the printed line \
             numbers for start_line/end_line. Convert dependencies into actions or table \
             references and fold formulas into the actions that apply them. Respond as \
             JSON: {\"actions\": [{\"action_text\", \"who\", \"when\", \"priority_level\", \
             \"start_line\", \"end_line\"}], \"tables\": [{\"table_title\", \"table_type\", \
             \"headers\", \"rows\", \"markdown_content\", \"derived_action_indexes\"}]}",
        );

        let result: Result<Extraction, _> = handle
            .client
            .complete_structured(
                &format!("extract_{}_{}", node.id, segment_index),
                &[Message::system(system.to_string()), Message::user(user)],
                &handle.options(),
            )
            .await;

        match result {
            Ok(extraction) => {
                let offset = actions.len();
                let table_entries: Vec<(RawTable, Vec<usize>)> = extraction
                    .tables
                    .into_iter()
                    .map(|mut table| {
                        let indexes = std::mem::take(&mut table.derived_action_indexes)
                            .into_iter()
                            .map(|idx| idx + offset)
                            .collect();
                        (table, indexes)
                    })
                    .collect();
                actions.extend(extraction.actions);
                tables.extend(table_entries);
            }
            Err(err) => {
                failures.push(format!(
                    "extraction failed for {} segment {}: {}",
                    node.id, segment_index, err
                ));
            }
        }
    }

    NodeYield {
        node,
        from_special,
        actions,
        tables,
        failures,
    }
}

/// Split content at markdown heading boundaries; token-window any piece
/// still over the budget.
fn segment_markdown(
    content: &str,
    first_line: usize,
    max_tokens: usize,
    tokenizer: &dyn crate::llm::tokenizer::Tokenizer,
) -> Vec<(String, usize)> {
    if tokenizer.count_tokens(content) <= max_tokens {
        return vec![(content.to_string(), first_line)];
    }

    // Break at sub-heading lines
    let lines: Vec<&str> = content.lines().collect();
    let mut cut_points: Vec<usize> = vec![0];
    for (i, line) in lines.iter().enumerate().skip(1) {
        if line.starts_with('#') {
            cut_points.push(i);
        }
    }
    cut_points.push(lines.len());
    cut_points.dedup();

    let mut segments: Vec<(String, usize)> = Vec::new();
    for window in cut_points.windows(2) {
        let (start, end) = (window[0], window[1]);
        if start >= end {
            continue;
        }
        let text = lines[start..end].join("\n");
        let segment_first_line = first_line + start;

        if tokenizer.count_tokens(&text) <= max_tokens {
            segments.push((text, segment_first_line));
        } else {
            // Heading split was not enough, fall back to token windows
            let config = ChunkConfig {
                chunk_size: max_tokens,
                chunk_overlap: 0,
            };
            for piece in chunk_content(&text, segment_first_line, &config, tokenizer) {
                segments.push((piece.text, piece.start_line));
            }
        }
    }

    segments
}

/// Prefix each line with its absolute document line number.
fn number_lines(text: &str, first_line: usize) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{:>5} | {}", first_line + i, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Clamp an LLM-reported line range into the node's range so citations
/// always resolve inside the cited node.
fn clamp_range(start: usize, end: usize, node: &HeadingNode) -> (usize, usize) {
    let start = start.clamp(node.start_line, node.end_line);
    let end = end.clamp(start, node.end_line);
    (start, end)
}
