//! Timing stage: every action leaves with a well-formed `when`.
//!
//! Well-formed means `"<trigger> | <time_window>"` where the trigger is an
//! observable event or timestamp outside the vague-term set and the window
//! has a numeric duration with units. Actions the agent cannot fix within
//! the retry budget get a category-based default window and are flagged,
//! never dropped.

use crate::llm::provider::Message;
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{PipelineState, Stage};
use crate::utils::error::PlanweaveError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d+\s*(-\s*\d+\s*)?(minutes?|mins?|hours?|hrs?|days?|weeks?|h\b|m\b)")
        .expect("duration pattern is invalid")
});

#[derive(Debug, Deserialize)]
struct TimingSheet {
    timings: Vec<TimingEntry>,
}

#[derive(Debug, Deserialize)]
struct TimingEntry {
    id: String,
    trigger: String,
    time_window: String,
}

pub async fn run(state: &mut PipelineState, ctx: &StageContext) -> Result<(), PlanweaveError> {
    let feedback = state.take_feedback(Stage::Timing);
    let vague_terms = &ctx.config.vague_timing_terms;

    let mut pending: Vec<String> = state
        .actions
        .iter()
        .filter(|a| !is_well_formed(&a.when, vague_terms))
        .map(|a| a.id.clone())
        .collect();

    if pending.is_empty() {
        return Ok(());
    }
    tracing::info!(pending = pending.len(), "Actions need timing repair");

    let handle = ctx.runtime.handle("timing")?;
    let system = ctx.prompts.system_prompt("timing", None);
    let mut issues: Vec<String> = Vec::new();

    for attempt in 1..=ctx.config.max_retries {
        if pending.is_empty() {
            break;
        }
        state.bump_retry(Stage::Timing);

        let listing: String = state
            .actions
            .iter()
            .filter(|a| pending.contains(&a.id))
            .map(|a| format!("- id: {} | action: {} | current when: {}", a.id, a.action_text, a.when))
            .collect::<Vec<_>>()
            .join("\n");

        let mut user = format!("<actions>\n{}\n</actions>\n", listing);
        if let Some(feedback) = &feedback {
            user.push_str(&format!("\nReviewer feedback:\n{}\n", feedback));
        }
        if !issues.is_empty() {
            // Failed-validation issues feed the next attempt
            user.push_str(&format!(
                "\nYour previous answer had these problems:\n{}\n",
                issues.join("\n")
            ));
        }
        user.push_str(
            "\nFor each action give a trigger (observable event or timestamp) and a \
             time_window with an explicit numeric duration and units. Respond as JSON: \
             {\"timings\": [{\"id\": \"...\", \"trigger\": \"...\", \"time_window\": \"...\"}]}",
        );

        let result: Result<TimingSheet, _> = handle
            .client
            .complete_structured(
                &format!("timing_attempt_{}", attempt),
                &[Message::system(system.clone()), Message::user(user)],
                &handle.options(),
            )
            .await;

        let sheet = match result {
            Ok(sheet) => sheet,
            Err(err) => {
                tracing::warn!(attempt, error = %err, "Timing agent failed");
                continue;
            }
        };

        issues.clear();
        let proposals: HashMap<String, (String, String)> = sheet
            .timings
            .into_iter()
            .map(|t| (t.id, (t.trigger, t.time_window)))
            .collect();

        let mut still_pending = Vec::new();
        for id in pending {
            let Some((trigger, window)) = proposals.get(&id) else {
                issues.push(format!("- {}: no timing was returned", id));
                still_pending.push(id);
                continue;
            };

            match validate_timing(trigger, window, vague_terms) {
                Ok(()) => {
                    if let Some(action) = state.actions.iter_mut().find(|a| a.id == id) {
                        action.when = format!("{} | {}", trigger.trim(), window.trim());
                    }
                }
                Err(problem) => {
                    issues.push(format!("- {}: {}", id, problem));
                    still_pending.push(id);
                }
            }
        }
        pending = still_pending;
    }

    // Retry budget spent: convert by action category and flag
    let mut defaulted: Vec<(String, String)> = Vec::new();
    for id in pending {
        if let Some(action) = state.actions.iter_mut().find(|a| a.id == id) {
            let window = default_window_for(&action.action_text);
            let trigger = existing_trigger(&action.when, vague_terms)
                .unwrap_or_else(|| "Upon plan activation".to_string());
            action.when = format!("{} | {}", trigger, window);
            action.timing_flagged = true;
            defaulted.push((action.id.clone(), window));
        }
    }
    for (action_id, window) in defaulted {
        tracing::warn!(action = %action_id, "Timing defaulted by category");
        state.record_error(
            Stage::Timing,
            "validation_fallback",
            format!("action {} timing defaulted to '{}'", action_id, window),
        );
    }

    Ok(())
}

/// A `when` is well-formed when it has exactly one `|`, a non-vague
/// non-empty trigger, and a window with a numeric duration and units.
pub fn is_well_formed(when: &str, vague_terms: &[String]) -> bool {
    let mut parts = when.splitn(2, '|');
    let (Some(trigger), Some(window)) = (parts.next(), parts.next()) else {
        return false;
    };
    if window.contains('|') {
        return false;
    }
    validate_timing(trigger, window, vague_terms).is_ok()
}

fn validate_timing(trigger: &str, window: &str, vague_terms: &[String]) -> Result<(), String> {
    let trigger = trigger.trim();
    let window = window.trim();

    if trigger.is_empty() {
        return Err("trigger is empty".to_string());
    }
    if is_vague(trigger, vague_terms) {
        return Err(format!("trigger '{}' is a vague term", trigger));
    }
    if window.is_empty() {
        return Err("time window is empty".to_string());
    }
    if is_vague(window, vague_terms) {
        return Err(format!("time window '{}' is a vague term", window));
    }
    if !DURATION_RE.is_match(window) {
        return Err(format!(
            "time window '{}' lacks a numeric duration with units",
            window
        ));
    }
    Ok(())
}

fn is_vague(text: &str, vague_terms: &[String]) -> bool {
    let lower = text.to_lowercase();
    vague_terms.iter().any(|term| lower == term.to_lowercase())
}

/// Keep a valid trigger from a malformed `when`, if one exists.
fn existing_trigger(when: &str, vague_terms: &[String]) -> Option<String> {
    let candidate = when.split('|').next()?.trim();
    if candidate.is_empty() || is_vague(candidate, vague_terms) {
        return None;
    }
    Some(candidate.to_string())
}

/// Category-based default windows for the final fallback.
fn default_window_for(action_text: &str) -> String {
    let lower = action_text.to_lowercase();

    let categories: [(&[&str], &str); 6] = [
        (&["evacuat", "alarm", "casualty", "fire", "shelter"], "within 5 minutes"),
        (&["notify", "call", "inform", "report", "announce", "contact"], "within 2-3 minutes"),
        (&["triage", "patient", "treat", "clinical", "medical", "surg"], "within 30-60 minutes"),
        (&["document", "record", "register", "approve", "log"], "within 15 minutes"),
        (&["supply", "supplies", "equipment", "stock", "procure", "resource"], "within 2-4 hours"),
        (&["train", "drill", "exercise", "brief"], "within 24-48 hours"),
    ];

    for (needles, window) in categories {
        if needles.iter().any(|needle| lower.contains(needle)) {
            return window.to_string();
        }
    }
    "within 15 minutes".to_string()
}
