//! Orchestrator stage: turns the user's request into a problem statement.

use crate::llm::provider::Message;
use crate::pipeline::context::StageContext;
use crate::pipeline::state::{PipelineState, Stage};
use crate::utils::error::PlanweaveError;

pub async fn run(state: &mut PipelineState, ctx: &StageContext) -> Result<(), PlanweaveError> {
    let feedback = state.take_feedback(Stage::Orchestrator);
    let config = &state.user_config;

    let system = ctx
        .prompts
        .system_prompt("orchestrator", Some(&config.prompt_key()));

    let mut user = format!(
        "Plan name: {}\nOrganizational level: {}\nCrisis phase: {}\nSubject: {}\n",
        config.name, config.level, config.phase, config.subject
    );
    if let Some(timing) = &config.timing {
        user.push_str(&format!("Timing guidance: {}\n", timing));
    }
    if let Some(feedback) = feedback {
        user.push_str(&format!(
            "\nReviewer feedback on the previous attempt:\n{}\n",
            feedback
        ));
    }
    user.push_str("\nWrite the problem statement for this action plan.");

    let handle = ctx.runtime.handle("orchestrator")?;
    let response = handle
        .client
        .complete(
            "problem_statement",
            &[Message::system(system), Message::user(user)],
            &handle.options(),
        )
        .await?;

    state.problem_statement = response.content.trim().to_string();
    tracing::info!(
        chars = state.problem_statement.len(),
        "Problem statement ready"
    );
    Ok(())
}
