use crate::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One completed node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Position in completion order, assigned by `ExecutionTrace::add_event`.
    #[serde(default)]
    pub index: usize,
    pub node_id: NodeId,
    pub status: String,
    pub predecessor: Option<NodeId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Seconds.
    pub duration: f64,
    pub node_input: Value,
    pub node_output: Value,
    pub successors: Vec<NodeId>,
}

/// Append-only record of one run, in completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub run_id: Uuid,
    pub flow_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub events: Vec<ExecutionEvent>,
}

impl ExecutionTrace {
    pub fn new(run_id: Uuid, flow_name: impl Into<String>) -> Self {
        Self {
            run_id,
            flow_name: flow_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            events: Vec::new(),
        }
    }

    /// Append `event`, stamping it with the next index. Returns that index.
    pub fn add_event(&mut self, mut event: ExecutionEvent) -> usize {
        let index = self.events.len();
        event.index = index;
        self.events.push(event);
        index
    }

    /// Stamp the end of the run. Never earlier than `started_at`.
    pub fn mark_finished(&mut self) {
        self.finished_at = Some(Utc::now().max(self.started_at));
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a ExecutionEvent> + 'a {
        self.events.iter().filter(move |e| e.node_id == node_id)
    }

    /// Plain nested-data export for renderers and summarisers.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
