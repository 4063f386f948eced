//! Phase3 stage: graph traversal and per-subject consolidation.
//!
//! Each refined query acts as a subject. The analyzer's nodes are expanded
//! one level up and through all children, then consolidated per subject.
//! Scoring is pure graph expansion by default (every node scores 1.0); the
//! optional LLM scorer thresholds at `phase3_score_threshold` with a
//! top-K fallback when fewer than `phase3_min_nodes_per_subject` survive.

use crate::llm::provider::Message;
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{PipelineState, Stage, SubjectNodes};
use crate::store::ParentNode;
use crate::utils::error::PlanweaveError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct NodeScores {
    scores: Vec<NodeScore>,
}

#[derive(Debug, Deserialize)]
struct NodeScore {
    node_id: String,
    score: f64,
}

pub async fn run(state: &mut PipelineState, ctx: &StageContext) -> Result<(), PlanweaveError> {
    let feedback = state.take_feedback(Stage::Phase3);

    // Expand every analyzer node: itself, its parent heading, all children
    let mut expanded: Vec<String> = Vec::new();
    for id in &state.node_ids {
        if ctx.store.graph.heading(id).is_none() {
            tracing::warn!(node_id = %id, "Analyzer node missing from graph, skipping");
            continue;
        }
        push_unique(&mut expanded, id.clone());

        if let Some(ParentNode::Heading(parent)) = ctx.store.graph.parent_of(id) {
            push_unique(&mut expanded, parent.id);
        }
        for child in ctx.store.graph.children_of(id) {
            push_unique(&mut expanded, child.id);
        }
    }

    let subjects: Vec<String> = if state.refined_queries.is_empty() {
        vec![state.problem_statement.clone()]
    } else {
        state.refined_queries.clone()
    };

    let mut subject_nodes: Vec<SubjectNodes> = Vec::new();
    for subject in subjects {
        let nodes = if ctx.config.phase3_llm_scoring {
            score_and_filter(ctx, &subject, &expanded, feedback.as_deref()).await?
        } else {
            expanded.clone()
        };

        tracing::debug!(subject = %subject, nodes = nodes.len(), "Subject nodes consolidated");
        subject_nodes.push(SubjectNodes { subject, nodes });
    }

    state.subject_nodes = subject_nodes;
    Ok(())
}

/// LLM relevance scoring with threshold and min-nodes fallback.
async fn score_and_filter(
    ctx: &StageContext,
    subject: &str,
    node_ids: &[String],
    feedback: Option<&str>,
) -> Result<Vec<String>, PlanweaveError> {
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }

    let listing: String = node_ids
        .iter()
        .filter_map(|id| ctx.store.graph.heading(id))
        .map(|h| {
            format!(
                "- id: {} | title: {} | summary: {}",
                h.id,
                h.title,
                h.summary.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let system = ctx.prompts.system_prompt("phase3", None);
    let mut user = format!(
        "<subject>\n{}\n</subject>\n\n<sections>\n{}\n</sections>\n",
        subject, listing
    );
    if let Some(feedback) = feedback {
        user.push_str(&format!("\nReviewer feedback:\n{}\n", feedback));
    }
    user.push_str(
        "\nScore each section's relevance to the subject. Respond as JSON: \
         {\"scores\": [{\"node_id\": \"...\", \"score\": 0.0}]}",
    );

    let handle = ctx.runtime.handle("phase3")?;
    let result: Result<NodeScores, _> = handle
        .client
        .complete_structured(
            "relevance_scores",
            &[Message::system(system), Message::user(user)],
            &handle.options(),
        )
        .await;

    let mut scored: Vec<(String, f64)> = match result {
        Ok(response) => response
            .scores
            .into_iter()
            .filter(|s| node_ids.contains(&s.node_id))
            .map(|s| (s.node_id, s.score))
            .collect(),
        Err(PlanweaveError::MalformedOutput { .. }) => {
            // Scoring is advisory; expansion order stands in for relevance
            tracing::warn!("Phase3 scoring failed, treating all expanded nodes as relevant");
            node_ids.iter().map(|id| (id.clone(), 1.0)).collect()
        }
        Err(err) => return Err(err),
    };

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let passing: Vec<String> = scored
        .iter()
        .filter(|(_, score)| *score >= ctx.config.phase3_score_threshold)
        .map(|(id, _)| id.clone())
        .collect();

    // Fallback: never hand Extractor fewer than the floor when more exist
    let floor = ctx.config.phase3_min_nodes_per_subject;
    if passing.len() < floor {
        tracing::info!(
            passing = passing.len(),
            floor,
            "Below minimum nodes per subject, keeping top nodes by raw score"
        );
        return Ok(scored.into_iter().take(floor).map(|(id, _)| id).collect());
    }

    Ok(passing)
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
