//! Selector stage: relevance filtering against the problem statement.
//!
//! Actions are scored 0-10 in batches; those below the threshold are
//! discarded, except bypass-lane actions (`from_special_protocol`) which
//! always survive. Tables are kept on score or on being referenced by a
//! kept action; `selector_strict_tables` tightens that to both.

use crate::agents::runtime::split_batches;
use crate::llm::provider::Message;
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{Action, PipelineState, Stage, Table};
use crate::utils::error::PlanweaveError;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct ScoreSheet {
    scores: Vec<ScoreEntry>,
}

#[derive(Debug, Deserialize)]
struct ScoreEntry {
    id: String,
    score: f32,
    #[serde(default)]
    rationale: String,
}

pub async fn run(state: &mut PipelineState, ctx: &StageContext) -> Result<(), PlanweaveError> {
    let feedback = state.take_feedback(Stage::Selector);

    if state.actions.is_empty() {
        return Ok(());
    }

    let handle = ctx.runtime.handle("selector")?;
    let system = ctx.prompts.system_prompt("selector", None);

    // Score actions and tables in one pass; both carry unique ids
    let mut items: Vec<(String, String)> = state
        .actions
        .iter()
        .map(|a| (a.id.clone(), a.action_text.clone()))
        .collect();
    items.extend(
        state
            .tables
            .iter()
            .map(|t| (t.id.clone(), format!("[table] {}", t.table_title))),
    );

    let batches = split_batches(items, ctx.config.selector_batch_size, ctx.config.selector_batch_size);

    let results: Vec<Option<ScoreSheet>> =
        stream::iter(batches.into_iter().enumerate().map(|(index, batch)| {
            let handle = &handle;
            let system = system.as_str();
            let problem = state.problem_statement.as_str();
            let feedback = feedback.as_deref();
            async move {
                let listing: String = batch
                    .iter()
                    .map(|(id, text)| format!("- id: {} | {}", id, text))
                    .collect::<Vec<_>>()
                    .join("\n");

                let mut user = format!(
                    "<problem_statement>\n{}\n</problem_statement>\n\n<items>\n{}\n</items>\n",
                    problem, listing
                );
                if let Some(feedback) = feedback {
                    user.push_str(&format!("\nReviewer feedback:\n{}\n", feedback));
                }
                user.push_str(
                    "\nScore each item's relevance to the problem statement from 0 to 10 \
                     with a one-clause rationale. Respond as JSON: {\"scores\": \
                     [{\"id\": \"...\", \"score\": 0, \"rationale\": \"...\"}]}",
                );

                let result: Result<ScoreSheet, _> = handle
                    .client
                    .complete_structured(
                        &format!("score_batch_{}", index),
                        &[Message::system(system.to_string()), Message::user(user)],
                        &handle.options(),
                    )
                    .await;
                result.ok()
            }
        }))
        .buffered(ctx.runtime.workers)
        .collect()
        .await;

    let mut scores: HashMap<String, (f32, String)> = HashMap::new();
    let mut failed_batches = 0usize;
    for sheet in results {
        match sheet {
            Some(sheet) => {
                for entry in sheet.scores {
                    scores.insert(entry.id, (entry.score, entry.rationale));
                }
            }
            None => failed_batches += 1,
        }
    }
    if failed_batches > 0 {
        // Unscored work is kept, not dropped
        state.record_error(
            Stage::Selector,
            "malformed_output",
            format!("{} scoring batch(es) failed; their items were kept unscored", failed_batches),
        );
    }

    let threshold = (ctx.config.quality_threshold * 10.0) as f32;

    let actions: Vec<Action> = state
        .actions
        .drain(..)
        .filter_map(|mut action| {
            let scored = scores.get(&action.id);
            if let Some((score, rationale)) = scored {
                action.relevance_score = Some(*score);
                action.relevance_rationale = Some(rationale.clone());
            }

            if action.from_special_protocol {
                // Bypass lane: never discarded
                return Some(action);
            }
            match scored {
                Some((score, _)) if *score < threshold => None,
                _ => Some(action),
            }
        })
        .collect();

    let kept_ids: Vec<String> = actions.iter().map(|a| a.id.clone()).collect();

    let tables: Vec<Table> = state
        .tables
        .drain(..)
        .filter(|table| {
            let scored_in = scores
                .get(&table.id)
                .map(|(score, _)| *score >= threshold)
                // An unscored table rides on its references
                .unwrap_or(!ctx.config.selector_strict_tables);
            let referenced = table
                .extracted_actions
                .iter()
                .any(|id| kept_ids.contains(id));

            if ctx.config.selector_strict_tables {
                scored_in && referenced
            } else {
                scored_in || referenced
            }
        })
        .collect();

    tracing::info!(
        actions = actions.len(),
        tables = tables.len(),
        threshold,
        "Selection complete"
    );
    state.actions = actions;
    state.tables = tables;
    Ok(())
}
