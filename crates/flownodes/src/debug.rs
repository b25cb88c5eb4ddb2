use flowcore::{LogicResult, NodeContext, NodeInput, NodeLogic};
use flowruntime::{LogicMetadata, LogicRegistry};

/// Logs the envelope it receives and passes it on unchanged.
pub fn echo(input: NodeInput, ctx: &NodeContext) -> LogicResult {
    tracing::info!(
        node = %ctx.node_id,
        predecessor = ?input.predecessor,
        data = %input.data,
        "DEBUG"
    );
    for (key, value) in &input.metadata {
        tracing::debug!(node = %ctx.node_id, "  {}: {}", key, value);
    }
    Ok(input.into())
}

pub(crate) fn register(registry: &mut LogicRegistry) {
    registry.register(
        "debug.echo",
        NodeLogic::from_sync(echo),
        LogicMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
        },
    );
}
