//! Newline-delimited JSON spoken between the pool and its worker processes.

use flowcore::{NodeId, StateOp, StateReply};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Parent → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToWorker {
    Task(TaskRequest),
    StateReply { id: u64, reply: StateReply },
}

/// Worker → parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromWorker {
    Result { id: u64, output: Value },
    Failure { id: u64, error: String },
    State { id: u64, op: StateOp },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: u64,
    pub logic: String,
    pub node_id: NodeId,
    /// `NodeInput::to_primitive` form.
    pub input: Value,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub with_global_state: bool,
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_are_single_lines() {
        let task = ToWorker::Task(TaskRequest {
            id: 7,
            logic: "demo.intensive".into(),
            node_id: "sum".into(),
            input: json!({"data": {"text": "a\nb"}, "metadata": {}, "predecessor": null}),
            env: HashMap::new(),
            with_global_state: true,
        });
        let line = encode(&task).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
        let back: ToWorker = decode(&line).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn state_requests_are_tagged() {
        let line = encode(&FromWorker::State {
            id: 1,
            op: StateOp::Get { key: "k".into() },
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["op"]["op"], "get");
    }
}
