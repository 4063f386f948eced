//! Special-protocols injector: the bypass lane.
//!
//! User-selected node ids are expanded to their full subtrees and merged
//! into the pipeline at the extraction stage. Actions derived from these
//! nodes are tagged `from_special_protocol` and survive Selector
//! unconditionally. An empty id list makes this stage a passthrough.

use crate::pipeline::context::StageContext;
use crate::pipeline::state::PipelineState;
use crate::utils::error::PlanweaveError;

pub async fn run(state: &mut PipelineState, ctx: &StageContext) -> Result<(), PlanweaveError> {
    let requested = state.user_config.special_protocols_node_ids.clone();
    if requested.is_empty() {
        return Ok(());
    }

    let mut expanded: Vec<String> = Vec::new();
    for id in &requested {
        let node = ctx
            .store
            .graph
            .heading(id)
            .ok_or_else(|| PlanweaveError::NodeNotFound(id.clone()))?;

        push_unique(&mut expanded, node.id);
        for descendant in ctx.store.graph.descendants(id) {
            push_unique(&mut expanded, descendant.id);
        }
    }

    tracing::info!(
        requested = requested.len(),
        expanded = expanded.len(),
        "Special protocols expanded"
    );
    state.special_protocols_nodes = expanded;
    Ok(())
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
