// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! Terminal supervisor: the quality gate closing the pipeline.
//!
//! The final plan is scored on seven weighted criteria. Depending on the
//! overall score the supervisor approves, self-repairs cosmetic defects
//! with a single LLM call, or routes a rerun to the responsible prior
//! stage with targeted feedback. `validator_retry_count` caps the
//! controlled back-edge.

use crate::llm::provider::Message;
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{PipelineState, Stage};
use crate::pipeline::timing::is_well_formed;
use crate::utils::error::PlanweaveError;
use serde::{Deserialize, Serialize};

/// The seven criteria and their weights (summing to 1.0).
const CRITERIA_WEIGHTS: [(&str, f64); 7] = [
    ("structural_completeness", 0.15),
    ("action_traceability", 0.20),
    ("logical_sequencing", 0.15),
    ("guideline_compliance", 0.15),
    ("formatting_quality", 0.10),
    ("actionability", 0.15),
    ("metadata_completeness", 0.10),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defect {
    pub description: String,
    #[serde(default)]
    pub responsible_agent: String,
    /// "formatting", "metadata", or "content".
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "content".to_string()
}

#[derive(Debug, Deserialize)]
struct Review {
    criteria: std::collections::HashMap<String, f64>,
    #[serde(default)]
    defects: Vec<Defect>,
    #[serde(default)]
    feedback: String,
}

/// What the supervisor concluded about a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorReport {
    pub overall_score: f64,
    pub criteria: std::collections::HashMap<String, f64>,
    pub defects: Vec<Defect>,
    #[serde(default)]
    pub repairs_made: Vec<String>,
}

#[derive(Debug)]
pub enum SupervisorOutcome {
    Approve(SupervisorReport),
    SelfRepair {
        report: SupervisorReport,
        repaired_plan: String,
    },
    AgentRerun {
        report: SupervisorReport,
        responsible: Stage,
        targeted_feedback: String,
    },
}

pub async fn review(
    state: &PipelineState,
    ctx: &StageContext,
) -> Result<SupervisorOutcome, PlanweaveError> {
    // Structural pre-checks route without spending a review call
    if state.actions.is_empty() {
        let nodes_empty = state.subject_nodes.iter().all(|s| s.nodes.is_empty());
        let responsible = if nodes_empty { Stage::Phase3 } else { Stage::Extractor };
        let report = SupervisorReport {
            overall_score: 0.0,
            criteria: std::collections::HashMap::new(),
            defects: vec![Defect {
                description: "The plan contains no actions".to_string(),
                responsible_agent: responsible.name().to_string(),
                category: "content".to_string(),
            }],
            repairs_made: Vec::new(),
        };
        return Ok(SupervisorOutcome::AgentRerun {
            report,
            responsible,
            targeted_feedback: "The previous run produced zero actions. Broaden the node \
                                selection and extract every actionable step."
                .to_string(),
        });
    }

    let plan = state.final_plan.as_deref().ok_or_else(|| {
        PlanweaveError::StageFailed {
            stage: Stage::Supervisor.name().to_string(),
            message: "no final plan to review".to_string(),
        }
    })?;

    let mut review = llm_review(state, ctx, plan).await?;
    review.defects.extend(code_defects(state));

    let overall = weighted_score(&review.criteria);

    let report = SupervisorReport {
        overall_score: overall,
        criteria: review.criteria,
        defects: review.defects.clone(),
        repairs_made: Vec::new(),
    };

    if overall >= ctx.config.supervisor_approve_threshold {
        return Ok(SupervisorOutcome::Approve(report));
    }

    let cosmetic_only = !review.defects.is_empty()
        && review
            .defects
            .iter()
            .all(|d| d.category == "formatting" || d.category == "metadata");

    if overall >= ctx.config.supervisor_repair_lower && cosmetic_only {
        let repaired = self_repair(ctx, plan, &review.defects).await?;
        let mut report = report;
        report.repairs_made = review.defects.iter().map(|d| d.description.clone()).collect();
        return Ok(SupervisorOutcome::SelfRepair {
            report,
            repaired_plan: repaired,
        });
    }

    let responsible = review
        .defects
        .first()
        .map(|d| route_defect(d))
        .unwrap_or(Stage::Formatter);

    let targeted_feedback = if review.feedback.trim().is_empty() {
        review
            .defects
            .iter()
            .map(|d| d.description.clone())
            .collect::<Vec<_>>()
            .join("; ")
    } else {
        review.feedback.clone()
    };

    Ok(SupervisorOutcome::AgentRerun {
        report,
        responsible,
        targeted_feedback,
    })
}

async fn llm_review(
    state: &PipelineState,
    ctx: &StageContext,
    plan: &str,
) -> Result<Review, PlanweaveError> {
    let handle = ctx.runtime.handle("supervisor")?;
    let system = ctx.prompts.system_prompt("supervisor", None);

    let criteria_names: Vec<&str> = CRITERIA_WEIGHTS.iter().map(|(name, _)| *name).collect();
    let user = format!(
        "<problem_statement>\n{}\n</problem_statement>\n\n<plan>\n{}\n</plan>\n\n\
         Score each criterion from 0.0 to 1.0: {}. List defects with the responsible \
         agent (orchestrator, analyzer, phase3, extractor, selector, deduplicator, \
         timing, assigner, formatter) and a category (formatting, metadata, content). \
         Respond as JSON: {{\"criteria\": {{\"structural_completeness\": 0.0, ...}}, \
         \"defects\": [{{\"description\": \"...\", \"responsible_agent\": \"...\", \
         \"category\": \"...\"}}], \"feedback\": \"...\"}}",
        state.problem_statement,
        plan,
        criteria_names.join(", ")
    );

    handle
        .client
        .complete_structured(
            "review",
            &[Message::system(system), Message::user(user)],
            &handle.options(),
        )
        .await
}

/// Deterministic checks the reviewer model cannot be trusted to catch.
fn code_defects(state: &PipelineState) -> Vec<Defect> {
    let mut defects = Vec::new();

    let missing_who = state
        .actions
        .iter()
        .filter(|a| a.who.trim().is_empty())
        .count();
    if missing_who > 0 {
        defects.push(Defect {
            description: format!("{} action(s) have no actor", missing_who),
            responsible_agent: "assigner".to_string(),
            category: "content".to_string(),
        });
    }

    let vague: Vec<&str> = state
        .actions
        .iter()
        .filter(|a| !a.timing_flagged && !is_well_formed(&a.when, &[]))
        .map(|a| a.id.as_str())
        .take(5)
        .collect();
    if !vague.is_empty() {
        defects.push(Defect {
            description: format!("Malformed timing on action(s): {}", vague.join(", ")),
            responsible_agent: "timing".to_string(),
            category: "content".to_string(),
        });
    }

    defects
}

async fn self_repair(
    ctx: &StageContext,
    plan: &str,
    defects: &[Defect],
) -> Result<String, PlanweaveError> {
    let handle = ctx.runtime.handle("repair")?;
    let system = ctx.prompts.system_prompt("repair", None);

    let defect_list: String = defects
        .iter()
        .map(|d| format!("- [{}] {}", d.category, d.description))
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "<plan>\n{}\n</plan>\n\n<defects>\n{}\n</defects>\n\nReturn the repaired markdown \
         plan, fixing only formatting and metadata.",
        plan, defect_list
    );

    let response = handle
        .client
        .complete(
            "self_repair",
            &[Message::system(system), Message::user(user)],
            &handle.options(),
        )
        .await?;

    Ok(response.content.trim().to_string())
}

/// Weighted average of the seven criteria; a missing criterion scores 0.
fn weighted_score(criteria: &std::collections::HashMap<String, f64>) -> f64 {
    CRITERIA_WEIGHTS
        .iter()
        .map(|(name, weight)| {
            let score = criteria.get(*name).copied().unwrap_or(0.0).clamp(0.0, 1.0);
            score * weight
        })
        .sum()
}

/// Map a defect to the stage that owns the fix.
fn route_defect(defect: &Defect) -> Stage {
    if let Some(stage) = Stage::from_agent_name(&defect.responsible_agent) {
        return stage;
    }

    let lower = defect.description.to_lowercase();
    if lower.contains("citation") || lower.contains("missing node") || lower.contains("source") {
        Stage::Analyzer
    } else if lower.contains("irrelevant") {
        Stage::Selector
    } else if lower.contains("duplicate") || lower.contains("unclear") {
        Stage::Deduplicator
    } else if lower.contains("timeline") || lower.contains("timing") || lower.contains("when") {
        Stage::Timing
    } else if lower.contains("who") || lower.contains("actor") || lower.contains("assign") {
        Stage::Assigner
    } else if lower.contains("extract") || lower.contains("action") {
        Stage::Extractor
    } else {
        Stage::Formatter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_score_full_marks() {
        let criteria: std::collections::HashMap<String, f64> = CRITERIA_WEIGHTS
            .iter()
            .map(|(name, _)| (name.to_string(), 1.0))
            .collect();
        assert!((weighted_score(&criteria) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score_missing_criterion_scores_zero() {
        let mut criteria: std::collections::HashMap<String, f64> = CRITERIA_WEIGHTS
            .iter()
            .map(|(name, _)| (name.to_string(), 1.0))
            .collect();
        criteria.remove("action_traceability");
        assert!((weighted_score(&criteria) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = CRITERIA_WEIGHTS.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_route_by_agent_name() {
        let defect = Defect {
            description: "scores too strict".to_string(),
            responsible_agent: "selector".to_string(),
            category: "content".to_string(),
        };
        assert_eq!(route_defect(&defect), Stage::Selector);
    }

    #[test]
    fn test_route_by_description_keywords() {
        let cases = [
            ("missing citations throughout", Stage::Analyzer),
            ("several duplicate steps remain", Stage::Deduplicator),
            ("the timeline is wrong for triage", Stage::Timing),
            ("no actor on several items", Stage::Assigner),
            ("broken markdown structure", Stage::Formatter),
        ];
        for (description, expected) in cases {
            let defect = Defect {
                description: description.to_string(),
                responsible_agent: "unknown".to_string(),
                category: "content".to_string(),
            };
            assert_eq!(route_defect(&defect), expected, "case: {}", description);
        }
    }
}
