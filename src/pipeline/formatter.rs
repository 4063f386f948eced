//! Formatter stage: the actor-grouped markdown plan. Pure code, no LLM.
//!
//! Actions group under their actor; within an actor they sort by parsed
//! start time, then priority weight. The specifications header is
//! populated from the user config and the extracted roles. Tables
//! referenced by an actor's actions become per-actor appendices with
//! inline "(See Appendix X)" marks.

use crate::pipeline::context::StageContext;
use crate::pipeline::state::{Action, Phase, PipelineState, Subject, Table};
use crate::utils::error::PlanweaveError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write;

static START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)(?:\s*-\s*\d+)?\s*(minutes?|mins?|hours?|hrs?|days?|weeks?|h\b|m\b)")
        .expect("start-time pattern is invalid")
});

pub async fn run(state: &mut PipelineState, _ctx: &StageContext) -> Result<(), PlanweaveError> {
    let plan = render_plan(state);
    tracing::info!(chars = plan.len(), "Plan formatted");
    state.final_plan = Some(plan);
    Ok(())
}

fn render_plan(state: &PipelineState) -> String {
    let config = &state.user_config;

    // Stable actor order: first appearance in the action list
    let mut actors: Vec<String> = Vec::new();
    let mut by_actor: HashMap<String, Vec<&Action>> = HashMap::new();
    for action in &state.actions {
        let actor = if action.who.trim().is_empty() {
            "undefined".to_string()
        } else {
            action.who.trim().to_string()
        };
        if !actors.contains(&actor) {
            actors.push(actor.clone());
        }
        by_actor.entry(actor).or_default().push(action);
    }

    for actions in by_actor.values_mut() {
        actions.sort_by_key(|a| sort_key(a));
    }

    let tables_by_id: HashMap<&str, &Table> =
        state.tables.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut out = String::new();
    let _ = writeln!(out, "# {}", config.name);
    let _ = writeln!(out);

    // Specifications header
    let _ = writeln!(out, "## Checklist Specifications");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Field | Value |");
    let _ = writeln!(out, "|-------|-------|");
    let _ = writeln!(out, "| Checklist Name | {} |", config.name);
    let _ = writeln!(out, "| Crisis Area | {} |", crisis_area(config.subject));
    let _ = writeln!(out, "| Checklist Type | {} |", checklist_type(config.phase));
    let _ = writeln!(out, "| Organizational Level | {} |", title_case(&config.level.to_string()));
    if let Some(timing) = &config.timing {
        let _ = writeln!(out, "| Timing | {} |", timing);
    }
    let _ = writeln!(out, "| Roles | {} |", actors.join(", "));
    let _ = writeln!(out, "| Actions | {} |", state.actions.len());
    let _ = writeln!(out);

    // One section per actor, with appendix marks and per-actor appendices
    let mut appendix_counter = 0usize;
    for actor in &actors {
        let actions = match by_actor.get(actor) {
            Some(actions) => actions,
            None => continue,
        };

        let _ = writeln!(out, "## {}", actor);
        let _ = writeln!(out);

        // Tables referenced by this actor's kept actions
        let mut actor_tables: Vec<&Table> = Vec::new();
        for action in actions {
            for table in state.tables.iter() {
                if table.extracted_actions.contains(&action.id)
                    && !actor_tables.iter().any(|t| t.id == table.id)
                {
                    actor_tables.push(table);
                }
            }
        }
        let appendix_labels: HashMap<&str, String> = actor_tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), appendix_label(appendix_counter + i)))
            .collect();

        for action in actions {
            let mut line = format!("- [ ] **{}**", action.action_text.trim_end_matches('.'));
            let _ = write!(line, " — WHEN: {}", action.when);
            let _ = write!(line, " — Priority: {}", action.priority_level);
            let _ = write!(
                line,
                " — Source: {} lines {}-{} ({})",
                action.reference.document,
                action.reference.line_range.0,
                action.reference.line_range.1,
                action.reference.node_title
            );
            if let Some(table_id) = referenced_table(action, &tables_by_id) {
                if let Some(label) = appendix_labels.get(table_id) {
                    let _ = write!(line, " (See Appendix {})", label);
                }
            }
            if action.timing_flagged {
                line.push_str(" [timing defaulted]");
            }
            if action.actor_flagged {
                line.push_str(" [actor unresolved]");
            }
            let _ = writeln!(out, "{}", line);
        }
        let _ = writeln!(out);

        for table in &actor_tables {
            let label = appendix_labels
                .get(table.id.as_str())
                .cloned()
                .unwrap_or_default();
            let _ = writeln!(out, "### Appendix {}: {}", label, table.table_title);
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", render_table(table));
            let _ = writeln!(
                out,
                "_Source: {} lines {}-{}_",
                table.reference.document, table.reference.line_range.0, table.reference.line_range.1
            );
            let _ = writeln!(out);
        }
        appendix_counter += actor_tables.len();
    }

    out
}

fn crisis_area(subject: Subject) -> &'static str {
    match subject {
        Subject::War => "War / Mass Casualty Incidents",
        Subject::Sanction => "Sanctions / Resource Shortage",
    }
}

fn checklist_type(phase: Phase) -> &'static str {
    match phase {
        Phase::Response => "Action (Response)",
        Phase::Preparedness => "Preparedness",
    }
}

/// Sort key: parsed start minutes (unparseable last), then priority weight.
fn sort_key(action: &Action) -> (u64, u8) {
    (
        parse_start_minutes(&action.when).unwrap_or(u64::MAX),
        action.priority_level.weight(),
    )
}

/// The first numeric duration in the time-window side, in minutes.
pub fn parse_start_minutes(when: &str) -> Option<u64> {
    let window = when.split('|').nth(1).unwrap_or(when);
    let caps = START_RE.captures(window)?;
    let value: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();

    let minutes = if unit.starts_with("min") || unit == "m" {
        value
    } else if unit.starts_with("hour") || unit.starts_with("hr") || unit == "h" {
        value * 60
    } else if unit.starts_with("day") {
        value * 60 * 24
    } else {
        value * 60 * 24 * 7
    };
    Some(minutes)
}

fn referenced_table<'a>(
    action: &Action,
    tables_by_id: &'a HashMap<&str, &Table>,
) -> Option<&'a str> {
    tables_by_id
        .values()
        .find(|t| t.extracted_actions.contains(&action.id))
        .map(|t| t.id.as_str())
}

fn render_table(table: &Table) -> String {
    if !table.markdown_content.trim().is_empty() {
        return table.markdown_content.trim().to_string();
    }
    if table.headers.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let _ = writeln!(out, "| {} |", table.headers.join(" | "));
    let _ = writeln!(
        out,
        "|{}|",
        table.headers.iter().map(|_| "---").collect::<Vec<_>>().join("|")
    );
    for row in &table.rows {
        let _ = writeln!(out, "| {} |", row.join(" | "));
    }
    out.trim_end().to_string()
}

/// "A", "B", ..., "Z", "AA", ...
fn appendix_label(index: usize) -> String {
    let mut label = String::new();
    let mut value = index;
    loop {
        label.insert(0, (b'A' + (value % 26) as u8) as char);
        if value < 26 {
            break;
        }
        value = value / 26 - 1;
    }
    label
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
