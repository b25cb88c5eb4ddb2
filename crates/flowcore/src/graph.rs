use crate::WorkflowError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

pub type NodeId = String;

/// Transition key consulted when a status has no entry of its own.
pub const DEFAULT_TRANSITION: &str = "default";

/// Backend a node is dispatched to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Inline,
    Process,
    #[serde(alias = "docker")]
    Container,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Inline => "inline",
            ExecutorKind::Process => "process",
            ExecutorKind::Container => "container",
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub executor: ExecutorKind,
    /// Logic registry key for inline and process nodes.
    #[serde(default, alias = "function")]
    pub callable: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub command: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub args: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, deserialize_with = "transitions")]
    pub transitions: BTreeMap<String, Vec<NodeId>>,
    /// Time budget in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default, alias = "withGlobalState")]
    pub with_global_state: Option<bool>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<NodeId>, executor: ExecutorKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            executor,
            callable: None,
            image: None,
            command: Vec::new(),
            args: Vec::new(),
            workdir: None,
            env: HashMap::new(),
            transitions: BTreeMap::new(),
            timeout: None,
            with_global_state: None,
        }
    }

    pub fn inline(id: impl Into<NodeId>, callable: impl Into<String>) -> Self {
        Self::new(id, ExecutorKind::Inline).with_callable(callable)
    }

    pub fn process(id: impl Into<NodeId>, callable: impl Into<String>) -> Self {
        Self::new(id, ExecutorKind::Process).with_callable(callable)
    }

    pub fn container(id: impl Into<NodeId>, image: impl Into<String>) -> Self {
        let mut node = Self::new(id, ExecutorKind::Container);
        node.image = Some(image.into());
        node
    }

    pub fn with_callable(mut self, callable: impl Into<String>) -> Self {
        self.callable = Some(callable.into());
        self
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Time budget as a `Duration`; `None` when unset or unrepresentable.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    pub fn with_global_state(mut self, enabled: bool) -> Self {
        self.with_global_state = Some(enabled);
        self
    }

    /// Route `status` to `successors`, appending to any existing entry.
    pub fn on<I, S>(mut self, status: impl Into<String>, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.transitions
            .entry(status.into())
            .or_default()
            .extend(successors.into_iter().map(Into::into));
        self
    }

    pub fn otherwise<I, S>(self, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.on(DEFAULT_TRANSITION, successors)
    }

    /// Container nodes stay out of global state unless they opt in.
    pub fn participates_in_global_state(&self) -> bool {
        self.with_global_state
            .unwrap_or(self.executor != ExecutorKind::Container)
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        match self.executor {
            ExecutorKind::Inline | ExecutorKind::Process if self.callable.is_none() => {
                return Err(WorkflowError::Invalid(format!(
                    "node '{}' requires a callable",
                    self.id
                )));
            }
            ExecutorKind::Container if self.image.is_none() => {
                return Err(WorkflowError::Invalid(format!(
                    "node '{}' requires a container image",
                    self.id
                )));
            }
            _ => {}
        }
        if let Some(timeout) = self.timeout {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(WorkflowError::Invalid(format!(
                    "node '{}' has a non-positive timeout ({})",
                    self.id, timeout
                )));
            }
            if Duration::try_from_secs_f64(timeout).is_err() {
                return Err(WorkflowError::Invalid(format!(
                    "node '{}' has an out-of-range timeout ({})",
                    self.id, timeout
                )));
            }
        }
        Ok(())
    }
}

/// Flow document as written in configuration, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFlow {
    #[serde(default = "default_flow_name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "triggers", deserialize_with = "one_or_many")]
    pub start: Vec<NodeId>,
    pub nodes: RawNodes,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_flow_name() -> String {
    "flow".to_string()
}

/// Nodes may be listed, or keyed by an arbitrary label.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawNodes {
    List(Vec<NodeDefinition>),
    Map(BTreeMap<String, NodeDefinition>),
}

impl RawNodes {
    fn into_vec(self) -> Vec<NodeDefinition> {
        match self {
            RawNodes::List(nodes) => nodes,
            RawNodes::Map(nodes) => nodes.into_values().collect(),
        }
    }
}

/// Validated, immutable node graph.
#[derive(Debug, Clone, Serialize)]
pub struct FlowGraph {
    name: String,
    description: Option<String>,
    start: Vec<NodeId>,
    nodes: BTreeMap<NodeId, NodeDefinition>,
    metadata: Map<String, Value>,
}

impl FlowGraph {
    /// Validate `raw` into a graph. Fails on the first duplicate id, unknown
    /// start id, unknown successor id or malformed node.
    pub fn load(raw: RawFlow) -> Result<Self, WorkflowError> {
        let mut nodes = BTreeMap::new();
        for node in raw.nodes.into_vec() {
            node.validate()?;
            if nodes.contains_key(&node.id) {
                return Err(WorkflowError::DuplicateNode(node.id));
            }
            nodes.insert(node.id.clone(), node);
        }

        if raw.start.is_empty() {
            return Err(WorkflowError::NoStartNodes);
        }
        if let Some(unknown) = raw.start.iter().find(|id| !nodes.contains_key(*id)) {
            return Err(WorkflowError::UnknownStart(unknown.clone()));
        }
        for node in nodes.values() {
            for successor in node.transitions.values().flatten() {
                if !nodes.contains_key(successor) {
                    return Err(WorkflowError::UnknownSuccessor {
                        node: node.id.clone(),
                        successor: successor.clone(),
                    });
                }
            }
        }

        let graph = Self {
            name: raw.name,
            description: raw.description,
            start: raw.start,
            nodes,
            metadata: raw.metadata,
        };
        let unreachable = graph.unreachable_nodes();
        if !unreachable.is_empty() {
            tracing::warn!(flow = %graph.name, ?unreachable, "flow has unreachable nodes");
        }
        Ok(graph)
    }

    pub fn from_json(value: Value) -> Result<Self, WorkflowError> {
        let raw: RawFlow = serde_json::from_value(value)
            .map_err(|e| WorkflowError::Invalid(e.to_string()))?;
        Self::load(raw)
    }

    pub fn builder(name: impl Into<String>) -> FlowGraphBuilder {
        FlowGraphBuilder {
            name: name.into(),
            description: None,
            start: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn start(&self) -> &[NodeId] {
        &self.start
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeDefinition> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_node(&self, id: &str) -> Result<&NodeDefinition, WorkflowError> {
        self.nodes
            .get(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))
    }

    pub fn requires_process_pool(&self) -> bool {
        self.nodes().any(|n| n.executor == ExecutorKind::Process)
    }

    /// Successors of `node_id` for `status`: the status's own entry, else the
    /// `default` entry, else none (the node is terminal for this status).
    pub fn next_nodes(&self, node_id: &str, status: &str) -> Result<Vec<NodeId>, WorkflowError> {
        let node = self.get_node(node_id)?;
        Ok(node
            .transitions
            .get(status)
            .or_else(|| node.transitions.get(DEFAULT_TRANSITION))
            .cloned()
            .unwrap_or_default())
    }

    /// Nodes no start node can reach through any transition.
    pub fn unreachable_nodes(&self) -> Vec<NodeId> {
        let mut graph = DiGraph::<&str, ()>::new();
        let index: HashMap<&str, NodeIndex> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), graph.add_node(id.as_str())))
            .collect();
        for node in self.nodes.values() {
            for successor in node.transitions.values().flatten() {
                graph.add_edge(index[node.id.as_str()], index[successor.as_str()], ());
            }
        }

        let mut seen = HashSet::new();
        for start in &self.start {
            let mut dfs = Dfs::new(&graph, index[start.as_str()]);
            while let Some(idx) = dfs.next(&graph) {
                seen.insert(graph[idx]);
            }
        }
        self.nodes
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect()
    }
}

/// Programmatic construction; `build` runs the same validation as `load`.
pub struct FlowGraphBuilder {
    name: String,
    description: Option<String>,
    start: Vec<NodeId>,
    nodes: Vec<NodeDefinition>,
}

impl FlowGraphBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn start(mut self, id: impl Into<NodeId>) -> Self {
        self.start.push(id.into());
        self
    }

    pub fn node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn build(self) -> Result<FlowGraph, WorkflowError> {
        FlowGraph::load(RawFlow {
            name: self.name,
            description: self.description,
            start: self.start,
            nodes: RawNodes::List(self.nodes),
            metadata: Map::new(),
        })
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

fn transitions<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<NodeId>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Targets {
        One(String),
        Many(Vec<String>),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        // A bare list is shorthand for the default transition.
        List(Vec<String>),
        Map(BTreeMap<String, Targets>),
        Nothing(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(targets) => BTreeMap::from([(DEFAULT_TRANSITION.to_string(), targets)]),
        Raw::Map(map) => map
            .into_iter()
            .map(|(status, targets)| {
                let targets = match targets {
                    Targets::One(t) => vec![t],
                    Targets::Many(v) => v,
                };
                (status, targets)
            })
            .collect(),
        Raw::Nothing(()) => BTreeMap::new(),
    })
}
