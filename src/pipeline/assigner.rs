//! Assigner stage: every action gets a specific accountable actor.
//!
//! The organizational reference document is loaded once and included in
//! the prompt. Assignments that are empty or in the generic-terms set
//! fail validation and are retried with the issues fed back; actions that
//! still fail after the retry budget get `who = "undefined"` and are
//! flagged, never dropped.

use crate::agents::runtime::split_batches;
use crate::llm::provider::Message;
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{PipelineState, Stage};
use crate::utils::error::PlanweaveError;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct AssignmentSheet {
    assignments: Vec<Assignment>,
}

#[derive(Debug, Deserialize)]
struct Assignment {
    id: String,
    who: String,
}

pub async fn run(state: &mut PipelineState, ctx: &StageContext) -> Result<(), PlanweaveError> {
    let feedback = state.take_feedback(Stage::Assigner);

    if state.actions.is_empty() {
        return Ok(());
    }

    let reference = load_reference(ctx)?;
    let handle = ctx.runtime.handle("assigner")?;
    let system = ctx.prompts.system_prompt("assigner", None);
    let generic_terms = &ctx.config.generic_actor_terms;

    let mut pending: Vec<String> = state
        .actions
        .iter()
        .filter(|a| !is_specific(&a.who, generic_terms))
        .map(|a| a.id.clone())
        .collect();

    if pending.is_empty() {
        return Ok(());
    }
    tracing::info!(pending = pending.len(), "Actions need actor assignment");

    let mut issues: Vec<String> = Vec::new();

    for attempt in 1..=ctx.config.max_retries {
        if pending.is_empty() {
            break;
        }
        state.bump_retry(Stage::Assigner);

        let items: Vec<(String, String)> = state
            .actions
            .iter()
            .filter(|a| pending.contains(&a.id))
            .map(|a| (a.id.clone(), a.action_text.clone()))
            .collect();

        let batches = split_batches(
            items,
            ctx.config.assigner_batch_size,
            ctx.config.assigner_batch_threshold,
        );

        let sheets: Vec<Option<AssignmentSheet>> =
            stream::iter(batches.into_iter().enumerate().map(|(index, batch)| {
                let handle = &handle;
                let system = system.as_str();
                let reference = reference.as_str();
                let level = state.user_config.level;
                let feedback = feedback.as_deref();
                let issues = issues.clone();
                async move {
                    let listing: String = batch
                        .iter()
                        .map(|(id, text)| format!("- id: {} | {}", id, text))
                        .collect::<Vec<_>>()
                        .join("\n");

                    let mut user = format!(
                        "Organizational level: {}\n\n<organizational_reference>\n{}\n\
                         </organizational_reference>\n\n<actions>\n{}\n</actions>\n",
                        level, reference, listing
                    );
                    if let Some(feedback) = feedback {
                        user.push_str(&format!("\nReviewer feedback:\n{}\n", feedback));
                    }
                    if !issues.is_empty() {
                        user.push_str(&format!(
                            "\nYour previous answer had these problems:\n{}\n",
                            issues.join("\n")
                        ));
                    }
                    user.push_str(
                        "\nAssign each action to the specific accountable role or unit from \
                         the reference. Respond as JSON: {\"assignments\": [{\"id\": \
                         \"...\", \"who\": \"...\"}]}",
                    );

                    let result: Result<AssignmentSheet, _> = handle
                        .client
                        .complete_structured(
                            &format!("assign_attempt_{}_batch_{}", attempt, index),
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

        let mut proposals: HashMap<String, String> = HashMap::new();
        for sheet in sheets.into_iter().flatten() {
            for assignment in sheet.assignments {
                proposals.insert(assignment.id, assignment.who);
            }
        }

        issues.clear();
        let mut still_pending = Vec::new();
        for id in pending {
            match proposals.get(&id) {
                Some(who) if is_specific(who, generic_terms) => {
                    if let Some(action) = state.actions.iter_mut().find(|a| a.id == id) {
                        action.who = who.trim().to_string();
                    }
                }
                Some(who) => {
                    issues.push(format!("- {}: '{}' is generic or empty", id, who));
                    still_pending.push(id);
                }
                None => {
                    issues.push(format!("- {}: no assignment was returned", id));
                    still_pending.push(id);
                }
            }
        }
        pending = still_pending;
    }

    // Retry budget spent: mark, never drop
    let mut defaulted: Vec<String> = Vec::new();
    for id in pending {
        if let Some(action) = state.actions.iter_mut().find(|a| a.id == id) {
            action.who = "undefined".to_string();
            action.actor_flagged = true;
            defaulted.push(action.id.clone());
        }
    }
    for action_id in defaulted {
        tracing::warn!(action = %action_id, "Actor assignment exhausted retries, set to undefined");
        state.record_error(
            Stage::Assigner,
            "validation_fallback",
            format!("action {} actor set to undefined", action_id),
        );
    }

    Ok(())
}

/// The organizational reference: full text of the configured document.
fn load_reference(ctx: &StageContext) -> Result<String, PlanweaveError> {
    let name = &ctx.config.assigner_reference_document;
    if ctx.store.graph.document(name).is_none() {
        return Err(PlanweaveError::Config(format!(
            "organizational reference document '{}' is not in the knowledge store",
            name
        )));
    }

    let content: Vec<String> = ctx
        .store
        .graph
        .document_roots(name)
        .into_iter()
        .map(|h| h.content)
        .collect();
    Ok(content.join("\n\n"))
}

/// Specific means non-empty and not a configured generic term.
pub fn is_specific(who: &str, generic_terms: &[String]) -> bool {
    let trimmed = who.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lower = trimmed.to_lowercase();
    !generic_terms.iter().any(|term| lower == term.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::default_generic_actor_terms;

    #[test]
    fn test_generic_terms_rejected() {
        let terms = default_generic_actor_terms();
        assert!(!is_specific("staff", &terms));
        assert!(!is_specific("  Team ", &terms));
        assert!(!is_specific("personnel", &terms));
        assert!(!is_specific("", &terms));
        assert!(!is_specific("   ", &terms));
    }

    #[test]
    fn test_specific_roles_accepted() {
        let terms = default_generic_actor_terms();
        assert!(is_specific("Emergency Operations Center Director", &terms));
        assert!(is_specific("Triage Nurse Lead", &terms));
        // Compound phrases containing a generic word are still specific
        assert!(is_specific("Nursing staff supervisor", &terms));
    }

    #[test]
    fn test_undefined_is_specific_marker() {
        // "undefined" is the sanctioned fallback value, not a generic term
        let terms = default_generic_actor_terms();
        assert!(is_specific("undefined", &terms));
    }
}
