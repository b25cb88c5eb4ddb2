use flowcore::{LogicResult, NodeContext, NodeError, NodeInput, NodeLogic, NodeOutput};
use flowruntime::{LogicMetadata, LogicRegistry};
use serde_json::Value;

/// Parse JSON text, given either as the data itself or as `data.json`.
pub fn json_parse(input: NodeInput, _ctx: &NodeContext) -> LogicResult {
    let text = match &input.data {
        Value::String(text) => text.as_str(),
        other => match other.get("json") {
            Some(Value::String(text)) => text.as_str(),
            Some(field) => {
                return Err(NodeError::InvalidInputType {
                    field: "json".to_string(),
                    expected: "string".to_string(),
                    actual: type_name(field).to_string(),
                })
            }
            None => return Err(NodeError::MissingInput("json".to_string())),
        },
    };

    let parsed: Value = serde_json::from_str(text)
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

    let mut output = NodeOutput::success(parsed);
    output.metadata = input.metadata;
    Ok(output.into())
}

/// Render `data.value`, or the whole data when there is no such key, as
/// pretty-printed JSON text.
pub fn json_stringify(input: NodeInput, _ctx: &NodeContext) -> LogicResult {
    let value = input.data.get("value").unwrap_or(&input.data);

    let json_str = serde_json::to_string_pretty(value)
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

    let mut output = NodeOutput::success(Value::String(json_str));
    output.metadata = input.metadata;
    Ok(output.into())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn register(registry: &mut LogicRegistry) {
    registry.register(
        "transform.json_parse",
        NodeLogic::from_sync(json_parse),
        LogicMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        },
    );
    registry.register(
        "transform.json_stringify",
        NodeLogic::from_sync(json_stringify),
        LogicMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
        },
    );
}
