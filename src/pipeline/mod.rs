// Copyright (c) 2025-2026 the planweave contributors
// SPDX-License-Identifier: Apache-2.0

//! The ten-stage generation pipeline and its driver.
//!
//! Stages advance a single `PipelineState` in fixed order. The terminal
//! supervisor closes the loop: it approves, self-repairs, or resets
//! `current_stage` to a prior stage with targeted feedback. The back-edge
//! is bounded by `validator_retry_count`; when the budget is spent the
//! best available plan ships with a warnings status.

pub mod analyzer;
pub mod assigner;
pub mod context;
pub mod dedup;
pub mod extractor;
pub mod formatter;
pub mod injector;
pub mod orchestrator;
pub mod phase3;
pub mod selector;
pub mod state;
pub mod supervisor;
pub mod timing;

pub use context::{PipelineConfig, StageContext};
pub use state::{
    Action, Level, Phase, PipelineState, PriorityLevel, Reference, Stage, Subject, SubjectNodes,
    Table, TableType, UserConfig,
};
pub use supervisor::{SupervisorOutcome, SupervisorReport};

use crate::utils::error::PlanweaveError;

/// Terminal status of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Approved,
    ApprovedWithWarnings,
}

/// Result of driving the pipeline to termination.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub status: PlanStatus,
    pub report: Option<SupervisorReport>,
}

/// Drive the pipeline from `state.current_stage` to termination.
pub async fn run_pipeline(
    state: &mut PipelineState,
    ctx: &StageContext,
) -> Result<PipelineOutcome, PlanweaveError> {
    loop {
        advance_to_supervisor(state, ctx).await?;

        state.current_stage = Stage::Supervisor;
        tracing::info!(stage = %Stage::Supervisor, "Pipeline stage");

        match supervisor::review(state, ctx).await {
            Ok(SupervisorOutcome::Approve(report)) => {
                state.quality_scores.push(report.overall_score);
                tracing::info!(score = report.overall_score, "Plan approved");
                return Ok(PipelineOutcome {
                    status: PlanStatus::Approved,
                    report: Some(report),
                });
            }
            Ok(SupervisorOutcome::SelfRepair {
                report,
                repaired_plan,
            }) => {
                state.quality_scores.push(report.overall_score);
                tracing::info!(
                    score = report.overall_score,
                    repairs = report.repairs_made.len(),
                    "Plan self-repaired"
                );
                state.final_plan = Some(repaired_plan);
                return Ok(PipelineOutcome {
                    status: PlanStatus::Approved,
                    report: Some(report),
                });
            }
            Ok(SupervisorOutcome::AgentRerun {
                report,
                responsible,
                targeted_feedback,
            }) => {
                state.quality_scores.push(report.overall_score);

                if state.validator_retry_count >= ctx.config.max_validator_retries {
                    tracing::warn!(
                        reruns = state.validator_retry_count,
                        "Supervisor rerun budget exhausted, shipping best available plan"
                    );
                    state.record_error(
                        Stage::Supervisor,
                        "rerun_exhausted",
                        format!(
                            "rerun budget exhausted after {} rerun(s); best draft returned",
                            state.validator_retry_count
                        ),
                    );
                    return Ok(PipelineOutcome {
                        status: PlanStatus::ApprovedWithWarnings,
                        report: Some(report),
                    });
                }

                state.validator_retry_count += 1;
                tracing::info!(
                    score = report.overall_score,
                    responsible = %responsible,
                    rerun = state.validator_retry_count,
                    "Supervisor routed rework"
                );
                state
                    .targeted_feedback
                    .insert(responsible.name().to_string(), targeted_feedback);
                state.current_stage = responsible;
            }
            Err(err) => {
                // A broken reviewer must not void a finished plan
                state.record_error(Stage::Supervisor, "review_failed", err.to_string());
                if state.final_plan.is_some() {
                    tracing::warn!(error = %err, "Supervisor review failed, shipping unreviewed plan");
                    return Ok(PipelineOutcome {
                        status: PlanStatus::ApprovedWithWarnings,
                        report: None,
                    });
                }
                return Err(err);
            }
        }
    }
}

/// Run stages in order from `current_stage` up to (not including) the
/// supervisor.
async fn advance_to_supervisor(
    state: &mut PipelineState,
    ctx: &StageContext,
) -> Result<(), PlanweaveError> {
    let mut stage = if state.current_stage == Stage::Supervisor {
        Stage::Orchestrator
    } else {
        state.current_stage
    };

    loop {
        if stage == Stage::Supervisor {
            return Ok(());
        }
        state.current_stage = stage;
        tracing::info!(stage = %stage, "Pipeline stage");

        let result = match stage {
            Stage::Orchestrator => orchestrator::run(state, ctx).await,
            Stage::Injector => injector::run(state, ctx).await,
            Stage::Analyzer => analyzer::run(state, ctx).await,
            Stage::Phase3 => phase3::run(state, ctx).await,
            Stage::Extractor => extractor::run(state, ctx).await,
            Stage::Selector => selector::run(state, ctx).await,
            Stage::Deduplicator => dedup::run(state, ctx).await,
            Stage::Timing => timing::run(state, ctx).await,
            Stage::Assigner => assigner::run(state, ctx).await,
            Stage::Formatter => formatter::run(state, ctx).await,
            Stage::Supervisor => return Ok(()),
        };

        if let Err(err) = result {
            state.record_error(stage, error_kind(&err), err.to_string());
            return Err(PlanweaveError::StageFailed {
                stage: stage.name().to_string(),
                message: err.to_string(),
            });
        }

        stage = stage.next().unwrap_or(Stage::Supervisor);
    }
}

fn error_kind(err: &PlanweaveError) -> &'static str {
    match err {
        PlanweaveError::Config(_) | PlanweaveError::DimensionMismatch { .. } => "configuration",
        PlanweaveError::RateLimited { .. } | PlanweaveError::NetworkError { .. } => "transient",
        PlanweaveError::MalformedOutput { .. } => "malformed_output",
        PlanweaveError::Store(_) | PlanweaveError::NodeNotFound(_) => "knowledge_store",
        PlanweaveError::ValidationError { .. } => "validation",
        _ => "stage_failure",
    }
}
