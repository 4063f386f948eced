//! Deduplicator stage: merge semantically equivalent actions.
//!
//! The agent proposes merge groups per batch; code enforces the hard
//! rules: a merge is rejected when actors or timing differ, merged entries
//! keep the union of citations, and `merged_from` records provenance.
//! Running the stage twice on the same input yields the same output.

use crate::agents::runtime::split_batches;
use crate::llm::provider::Message;
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{PipelineState, Stage, Table};
use crate::utils::error::PlanweaveError;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
struct MergePlan {
    #[serde(default)]
    groups: Vec<MergeGroup>,
}

#[derive(Debug, Deserialize)]
struct MergeGroup {
    keep_id: String,
    #[serde(default)]
    merge_ids: Vec<String>,
}

pub async fn run(state: &mut PipelineState, ctx: &StageContext) -> Result<(), PlanweaveError> {
    let feedback = state.take_feedback(Stage::Deduplicator);

    if state.actions.len() < 2 {
        dedupe_tables(state);
        return Ok(());
    }

    let handle = ctx.runtime.handle("deduplicator")?;
    let system = ctx.prompts.system_prompt("deduplicator", None);

    let items: Vec<(String, String)> = state
        .actions
        .iter()
        .map(|a| {
            (
                a.id.clone(),
                format!("{} | who: {} | when: {}", a.action_text, a.who, a.when),
            )
        })
        .collect();

    let batches = split_batches(
        items,
        ctx.config.deduplicator_batch_size,
        ctx.config.deduplicator_batch_size,
    );

    let plans: Vec<Option<MergePlan>> =
        stream::iter(batches.into_iter().enumerate().map(|(index, batch)| {
            let handle = &handle;
            let system = system.as_str();
            let feedback = feedback.as_deref();
            async move {
                let listing: String = batch
                    .iter()
                    .map(|(id, text)| format!("- id: {} | {}", id, text))
                    .collect::<Vec<_>>()
                    .join("\n");

                let mut user = format!("<actions>\n{}\n</actions>\n", listing);
                if let Some(feedback) = feedback {
                    user.push_str(&format!("\nReviewer feedback:\n{}\n", feedback));
                }
                user.push_str(
                    "\nGroup actions that state the same step. Never group actions with \
                     different actors or different timing. Respond as JSON: {\"groups\": \
                     [{\"keep_id\": \"...\", \"merge_ids\": [\"...\"]}]}. Actions not in \
                     any group stay as they are.",
                );

                let result: Result<MergePlan, _> = handle
                    .client
                    .complete_structured(
                        &format!("merge_batch_{}", index),
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

    let mut merged_away: HashSet<String> = HashSet::new();
    let mut rejected = 0usize;

    for plan in plans.into_iter().flatten() {
        for group in plan.groups {
            // A keeper that was itself merged away cannot absorb more
            if merged_away.contains(&group.keep_id) {
                continue;
            }
            let keep_idx = match state.actions.iter().position(|a| a.id == group.keep_id) {
                Some(idx) => idx,
                None => continue,
            };

            for merge_id in group.merge_ids {
                if merge_id == group.keep_id || merged_away.contains(&merge_id) {
                    continue;
                }
                let merge_idx = match state.actions.iter().position(|a| a.id == merge_id) {
                    Some(idx) => idx,
                    None => continue,
                };

                // Hard rule: differing WHO or WHEN blocks the merge
                let compatible = {
                    let keep = &state.actions[keep_idx];
                    let merge = &state.actions[merge_idx];
                    keep.who.trim().eq_ignore_ascii_case(merge.who.trim())
                        && keep.when.trim().eq_ignore_ascii_case(merge.when.trim())
                };
                if !compatible {
                    rejected += 1;
                    continue;
                }

                let merge_action = state.actions[merge_idx].clone();
                let keep = &mut state.actions[keep_idx];
                for source in merge_action.sources {
                    if !keep.sources.contains(&source) {
                        keep.sources.push(source);
                    }
                }
                keep.merged_from.push(merge_action.id.clone());
                keep.merged_from.extend(merge_action.merged_from);
                keep.from_special_protocol |= merge_action.from_special_protocol;
                merged_away.insert(merge_action.id);
            }
        }
    }

    if rejected > 0 {
        tracing::info!(rejected, "Merges rejected for actor/timing mismatch");
    }

    let before = state.actions.len();
    state.actions.retain(|a| !merged_away.contains(&a.id));
    tracing::info!(
        before,
        after = state.actions.len(),
        "Deduplication complete"
    );

    dedupe_tables(state);
    Ok(())
}

/// Tables are deduplicated in code: same title and same source node.
fn dedupe_tables(state: &mut PipelineState) {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut survivors: Vec<Table> = Vec::new();
    let mut dropped: Vec<(String, String)> = Vec::new();

    for table in state.tables.drain(..) {
        let key = (
            table.table_title.to_lowercase(),
            table.reference.node_id.clone(),
        );
        if seen.insert(key) {
            survivors.push(table);
        } else {
            // Move the duplicate's action references onto the survivor
            dropped.push((table.table_title.to_lowercase(), table.reference.node_id.clone()));
            if let Some(survivor) = survivors.iter_mut().find(|t| {
                t.table_title.to_lowercase() == table.table_title.to_lowercase()
                    && t.reference.node_id == table.reference.node_id
            }) {
                for id in table.extracted_actions {
                    if !survivor.extracted_actions.contains(&id) {
                        survivor.extracted_actions.push(id);
                    }
                }
            }
        }
    }

    if !dropped.is_empty() {
        tracing::debug!(dropped = dropped.len(), "Duplicate tables removed");
    }
    state.tables = survivors;
}
