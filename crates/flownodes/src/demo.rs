//! Demonstration logic used by the sample flows and the end-to-end tests.

use flowcore::{LogicResult, NodeContext, NodeError, NodeInput, NodeLogic, NodeOutput};
use flowruntime::{LogicMetadata, LogicRegistry};
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Duration};

/// Record the inbound payload in global state and count invocations.
pub async fn starter(input: NodeInput, ctx: NodeContext) -> LogicResult {
    let state = ctx.state()?;
    let mut payload = as_object(&input.data);

    state.set("last_payload", Value::Object(payload.clone())).await?;
    let counter = state
        .get_or("start_invocations", json!(0))
        .await?
        .as_i64()
        .unwrap_or(0)
        + 1;
    state.set("start_invocations", json!(counter)).await?;

    sleep(Duration::from_millis(50)).await;

    payload.insert("invocations".into(), json!(counter));
    Ok(NodeOutput::success(Value::Object(payload)).into())
}

/// Route on the parity of `data.number`: status `even` or `odd`.
pub fn branching(input: NodeInput, _ctx: &NodeContext) -> LogicResult {
    let mut payload = as_object(&input.data);
    let value = number(&payload)?;
    let status = if value % 2 == 0 { "even" } else { "odd" };
    payload.insert("parity".into(), json!(status));
    Ok(NodeOutput::new(status, Value::Object(payload)).into())
}

/// Sum `0..=data.number`. CPU-bound; meant for the process executor.
pub fn intensive(input: NodeInput, _ctx: &NodeContext) -> LogicResult {
    let mut payload = as_object(&input.data);
    let value = number(&payload)?;
    let total = (0..=value)
        .try_fold(0i64, |acc, n| acc.checked_add(n))
        .ok_or_else(|| NodeError::failed(format!("sum of 0..={} overflows", value)))?;
    payload.insert("total".into(), json!(total));
    Ok(NodeOutput::success(Value::Object(payload)).into())
}

/// Report the input, its metadata and the final global state.
pub fn finalizer(input: NodeInput, ctx: &NodeContext) -> LogicResult {
    let snapshot = ctx.state()?.snapshot_sync()?;
    Ok(NodeOutput::success(json!({
        "input": input.data,
        "metadata": input.metadata,
        "state": snapshot,
    }))
    .into())
}

fn as_object(data: &Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

fn number(payload: &Map<String, Value>) -> Result<i64, NodeError> {
    match payload.get("number") {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| NodeError::failed(format!("number out of range: {}", n))),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| NodeError::InvalidInputType {
            field: "number".to_string(),
            expected: "integer".to_string(),
            actual: format!("{:?}", s),
        }),
        Some(other) => Err(NodeError::InvalidInputType {
            field: "number".to_string(),
            expected: "integer".to_string(),
            actual: other.to_string(),
        }),
    }
}

pub(crate) fn register(registry: &mut LogicRegistry) {
    let demo = |description: &str| LogicMetadata {
        description: description.to_string(),
        category: "demo".to_string(),
    };
    registry.register(
        "demo.starter",
        NodeLogic::from_async(starter),
        demo("Store the payload in global state and count invocations"),
    );
    registry.register(
        "demo.branching",
        NodeLogic::from_sync(branching),
        demo("Route to 'even' or 'odd' on data.number"),
    );
    registry.register(
        "demo.intensive",
        NodeLogic::from_sync(intensive),
        demo("Sum 0..=data.number (CPU bound)"),
    );
    registry.register(
        "demo.finalizer",
        NodeLogic::from_sync(finalizer),
        demo("Return input, metadata and a global state snapshot"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::GlobalState;

    fn ctx() -> NodeContext {
        NodeContext::new("n", Some(GlobalState::new()))
    }

    #[test]
    fn number_accepts_numeric_strings() {
        let payload = as_object(&json!({"number": " 12 "}));
        assert_eq!(number(&payload).unwrap(), 12);
        assert_eq!(number(&Map::new()).unwrap(), 0);
        assert!(number(&as_object(&json!({"number": [1]}))).is_err());
    }

    #[test]
    fn intensive_sums_inclusively() {
        let out = NodeOutput::from_value(intensive(NodeInput::new(json!({"number": 10})), &ctx()).unwrap());
        assert_eq!(out.data["total"], 55);
    }
}
