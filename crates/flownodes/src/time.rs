use flowcore::{LogicResult, NodeContext, NodeInput, NodeLogic};
use flowruntime::{LogicMetadata, LogicRegistry};
use serde_json::Value;
use tokio::time::{sleep, Duration};

/// Suspend for `data.delay_ms` milliseconds (default 1000), then pass the
/// input through.
pub async fn delay(input: NodeInput, ctx: NodeContext) -> LogicResult {
    let delay_ms = input
        .data
        .get("delay_ms")
        .and_then(Value::as_f64)
        .unwrap_or(1000.0)
        .max(0.0) as u64;

    tracing::info!(node = %ctx.node_id, delay_ms, "delaying");
    sleep(Duration::from_millis(delay_ms)).await;

    Ok(input.into())
}

pub(crate) fn register(registry: &mut LogicRegistry) {
    registry.register(
        "time.delay",
        NodeLogic::from_async(delay),
        LogicMetadata {
            description: "Delay execution for data.delay_ms milliseconds".to_string(),
            category: "time".to_string(),
        },
    );
}
