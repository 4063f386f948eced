//! Analyzer stage, in two phases.
//!
//! Phase 1 refines the problem statement into 3-5 retrieval queries using
//! introduction-level context. Phase 2 retrieves candidates for every
//! refined query and has the LLM filter them against a five-criterion
//! framework (domain, functional, actionability, context, stakeholder),
//! batching when the candidate pool is large. Malformed filter output
//! falls back to the top candidates by raw retrieval score.

use crate::agents::runtime::split_batches;
use crate::llm::provider::Message;
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{PipelineState, Stage};
use crate::retrieval::engine::{Retrieved, RetrievalMode};
use crate::utils::error::PlanweaveError;
use futures::stream::{self, StreamExt};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RefinedQueries {
    queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FilteredNodes {
    selected_node_ids: Vec<String>,
}

pub async fn run(state: &mut PipelineState, ctx: &StageContext) -> Result<(), PlanweaveError> {
    let feedback = state.take_feedback(Stage::Analyzer);

    let queries = phase1(state, ctx, feedback.as_deref()).await?;
    tracing::info!(queries = queries.len(), "Analyzer phase 1 complete");
    state.refined_queries = queries;

    let node_ids = phase2(state, ctx, feedback.as_deref()).await?;
    tracing::info!(nodes = node_ids.len(), "Analyzer phase 2 complete");
    state.node_ids = node_ids;

    Ok(())
}

/// Phase 1: seed retrieval, then query refinement.
async fn phase1(
    state: &PipelineState,
    ctx: &StageContext,
    feedback: Option<&str>,
) -> Result<Vec<String>, PlanweaveError> {
    let intro_nodes = ctx
        .retrieval
        .retrieve(
            &state.problem_statement,
            RetrievalMode::Summary,
            ctx.config.top_k_results,
            &ctx.filter,
        )
        .await?;

    let context_block: String = intro_nodes
        .iter()
        .map(|node| format!("- [{}] {}: {}", node.node_id, node.title, node.text))
        .collect::<Vec<_>>()
        .join("\n");

    let system = ctx.prompts.system_prompt("analyzer", None);
    let mut user = format!(
        "<problem_statement>\n{}\n</problem_statement>\n\n\
         <corpus_overview>\n{}\n</corpus_overview>\n",
        state.problem_statement, context_block
    );
    if let Some(feedback) = feedback {
        user.push_str(&format!("\nReviewer feedback:\n{}\n", feedback));
    }
    user.push_str(
        "\nProduce 3-5 refined retrieval queries covering the distinct sub-topics of this \
         problem. Respond as JSON: {\"queries\": [\"...\"]}",
    );

    let handle = ctx.runtime.handle("analyzer")?;
    let result: Result<RefinedQueries, _> = handle
        .client
        .complete_structured(
            "phase1_queries",
            &[Message::system(system), Message::user(user)],
            &handle.options(),
        )
        .await;

    match result {
        Ok(refined) if !refined.queries.is_empty() => {
            let mut queries = refined.queries;
            queries.truncate(5);
            Ok(queries)
        }
        Ok(_) | Err(PlanweaveError::MalformedOutput { .. }) => {
            // Fail-soft: the problem statement itself becomes the one query
            tracing::warn!("Query refinement failed, falling back to the problem statement");
            Ok(vec![state.problem_statement.clone()])
        }
        Err(err) => Err(err),
    }
}

/// Phase 2: retrieve per query, then LLM-filter the candidate pool.
async fn phase2(
    state: &PipelineState,
    ctx: &StageContext,
    feedback: Option<&str>,
) -> Result<Vec<String>, PlanweaveError> {
    let fetch = ctx.config.top_k_results * 2;

    let mut candidates: Vec<Retrieved> = Vec::new();
    for query in &state.refined_queries {
        for hit in ctx
            .retrieval
            .retrieve(query, RetrievalMode::Hybrid, fetch, &ctx.filter)
            .await?
        {
            if !candidates.iter().any(|c| c.node_id == hit.node_id) {
                candidates.push(hit);
            }
        }
    }

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let handle = ctx.runtime.handle("analyzer")?;
    let system = ctx.prompts.system_prompt("analyzer", None);
    let top_k = ctx.config.top_k_results;

    let batches = split_batches(
        candidates,
        ctx.config.analyzer_phase2_batch_size,
        ctx.config.analyzer_phase2_batch_threshold,
    );

    let batch_results: Vec<Vec<String>> = stream::iter(batches.into_iter().enumerate().map(
        |(index, batch)| {
            let handle = &handle;
            let system = system.clone();
            let problem = state.problem_statement.clone();
            let feedback = feedback.map(str::to_string);
            async move {
                filter_batch(handle, &system, &problem, feedback.as_deref(), index, batch, top_k)
                    .await
            }
        },
    ))
    .buffered(ctx.runtime.workers)
    .collect()
    .await;

    // Merge in input order, dropping duplicates across batches
    let mut node_ids: Vec<String> = Vec::new();
    for batch in batch_results {
        for id in batch {
            if !node_ids.contains(&id) {
                node_ids.push(id);
            }
        }
    }
    Ok(node_ids)
}

#[allow(clippy::too_many_arguments)]
async fn filter_batch(
    handle: &crate::agents::runtime::AgentHandle,
    system: &str,
    problem_statement: &str,
    feedback: Option<&str>,
    index: usize,
    batch: Vec<Retrieved>,
    top_k: usize,
) -> Vec<String> {
    let listing: String = batch
        .iter()
        .map(|c| format!("- id: {} | title: {} | summary: {}", c.node_id, c.title, c.text))
        .collect::<Vec<_>>()
        .join("\n");

    let mut user = format!(
        "<problem_statement>\n{}\n</problem_statement>\n\n<candidates>\n{}\n</candidates>\n",
        problem_statement, listing
    );
    if let Some(feedback) = feedback {
        user.push_str(&format!("\nReviewer feedback:\n{}\n", feedback));
    }
    user.push_str(
        "\nSelect the candidate sections that pass the five criteria (domain match, \
         functional match, actionability, context fit, stakeholder fit). Respond as JSON: \
         {\"selected_node_ids\": [\"...\"]}",
    );

    let result: Result<FilteredNodes, _> = handle
        .client
        .complete_structured(
            &format!("phase2_filter_batch_{}", index),
            &[Message::system(system.to_string()), Message::user(user)],
            &handle.options(),
        )
        .await;

    match result {
        Ok(filtered) => {
            // Only ids that were actually in this batch count
            filtered
                .selected_node_ids
                .into_iter()
                .filter(|id| batch.iter().any(|c| &c.node_id == id))
                .collect()
        }
        Err(err) => {
            // Fallback: top candidates of this batch by raw retrieval score
            tracing::warn!(
                batch = index,
                error = %err,
                "Analyzer filter failed, keeping top candidates by score"
            );
            let mut ranked = batch;
            ranked.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            ranked.into_iter().take(top_k).map(|c| c.node_id).collect()
        }
    }
}
