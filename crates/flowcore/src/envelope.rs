//! The `NodeInput` / `NodeOutput` envelope that travels along every edge,
//! across the process-pool pipe and through container stdin/stdout.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status reported when node logic does not pick one.
pub const STATUS_SUCCESS: &str = "success";
/// Status for a node whose backend raised, crashed or exited non-zero.
pub const STATUS_ERROR: &str = "error";
/// Status for a node that exceeded its time budget.
pub const STATUS_TIMEOUT: &str = "timeout";

const STATUS_KEY: &str = "status";
const DATA_KEY: &str = "data";
const METADATA_KEY: &str = "metadata";
const PREDECESSOR_KEY: &str = "predecessor";

pub type Metadata = Map<String, Value>;

/// Anything node logic may hand back, or the engine may receive as a seed
/// payload. Coerced into an envelope by `NodeInput::from_value` and
/// `NodeOutput::from_value`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Input(NodeInput),
    Output(NodeOutput),
    Raw(Value),
}

impl From<NodeInput> for Payload {
    fn from(input: NodeInput) -> Self {
        Payload::Input(input)
    }
}

impl From<NodeOutput> for Payload {
    fn from(output: NodeOutput) -> Self {
        Payload::Output(output)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Raw(value)
    }
}

/// Payload delivered to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub predecessor: Option<String>,
}

impl NodeInput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Normalise anything into an input envelope.
    ///
    /// * an existing input is copied; `predecessor` overrides its own when given
    /// * an output is promoted, keeping data and metadata
    /// * a mapping with both `data` and `metadata` keys is unpacked (its
    ///   `predecessor` key is honoured when no override is given)
    /// * a mapping with only a `metadata` key has it extracted and the
    ///   remaining keys become `data`
    /// * anything else becomes `data` with empty metadata
    pub fn from_value(value: impl Into<Payload>, predecessor: Option<&str>) -> Self {
        let predecessor = predecessor.map(str::to_string);
        match value.into() {
            Payload::Input(mut input) => {
                if predecessor.is_some() {
                    input.predecessor = predecessor;
                }
                input
            }
            Payload::Output(output) => Self {
                data: output.data,
                metadata: output.metadata,
                predecessor,
            },
            Payload::Raw(Value::Object(mut map))
                if map.contains_key(DATA_KEY) && map.contains_key(METADATA_KEY) =>
            {
                let own = match map.remove(PREDECESSOR_KEY) {
                    Some(Value::String(id)) => Some(id),
                    _ => None,
                };
                Self {
                    data: map.remove(DATA_KEY).unwrap_or(Value::Null),
                    metadata: into_metadata(map.remove(METADATA_KEY)),
                    predecessor: predecessor.or(own),
                }
            }
            Payload::Raw(Value::Object(mut map)) if map.contains_key(METADATA_KEY) => {
                let metadata = into_metadata(map.remove(METADATA_KEY));
                Self {
                    data: Value::Object(map),
                    metadata,
                    predecessor,
                }
            }
            Payload::Raw(data) => Self {
                data,
                metadata: Metadata::new(),
                predecessor,
            },
        }
    }

    /// Plain JSON form, as written to container stdin.
    pub fn to_primitive(&self) -> Value {
        let mut map = Map::new();
        map.insert(DATA_KEY.into(), self.data.clone());
        map.insert(METADATA_KEY.into(), Value::Object(self.metadata.clone()));
        map.insert(
            PREDECESSOR_KEY.into(),
            self.predecessor.clone().map(Value::String).unwrap_or(Value::Null),
        );
        Value::Object(map)
    }
}

/// Result of one node execution. `status` selects the outgoing transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_status() -> String {
    STATUS_SUCCESS.to_string()
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self {
            status: default_status(),
            data: Value::Null,
            metadata: Metadata::new(),
        }
    }
}

impl NodeOutput {
    pub fn new(status: impl Into<String>, data: Value) -> Self {
        Self {
            status: status.into(),
            data,
            metadata: Metadata::new(),
        }
    }

    pub fn success(data: Value) -> Self {
        Self::new(STATUS_SUCCESS, data)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Normalise a logic return value.
    ///
    /// A mapping is read as `{status, data, metadata}`; every other key is
    /// folded into `metadata` without overwriting an explicit entry. A
    /// non-mapping value becomes the `data` of a `"success"` output.
    pub fn from_value(value: impl Into<Payload>) -> Self {
        match value.into() {
            Payload::Output(output) => output,
            Payload::Input(input) => Self {
                status: default_status(),
                data: input.data,
                metadata: input.metadata,
            },
            Payload::Raw(Value::Object(mut map)) => {
                let status = match map.remove(STATUS_KEY) {
                    Some(Value::String(s)) => s,
                    Some(Value::Null) | None => default_status(),
                    Some(other) => other.to_string(),
                };
                let data = map.remove(DATA_KEY).unwrap_or(Value::Null);
                let mut metadata = into_metadata(map.remove(METADATA_KEY));
                for (key, val) in map {
                    metadata.entry(key).or_insert(val);
                }
                Self {
                    status,
                    data,
                    metadata,
                }
            }
            Payload::Raw(data) => Self::success(data),
        }
    }

    pub fn to_primitive(&self) -> Value {
        let mut map = Map::new();
        map.insert(STATUS_KEY.into(), Value::String(self.status.clone()));
        map.insert(DATA_KEY.into(), self.data.clone());
        map.insert(METADATA_KEY.into(), Value::Object(self.metadata.clone()));
        Value::Object(map)
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

fn into_metadata(value: Option<Value>) -> Metadata {
    match value {
        Some(Value::Object(map)) => map,
        _ => Metadata::new(),
    }
}
