use thiserror::Error;

/// Run-level failures. Only these abort a flow run; node failures are
/// reported through `NodeOutput::status` instead.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Process pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Global state error: {0}")]
    State(#[from] StateError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Global state error: {0}")]
    State(#[from] StateError),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: f64 },

    #[error("Process pool unavailable: {0}")]
    PoolUnavailable(String),
}

impl NodeError {
    /// Shorthand used by node logic: `Err(NodeError::failed("..."))`.
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::ExecutionFailed(message.into())
    }

    /// Whether this error means the engine itself can no longer run the node.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, NodeError::PoolUnavailable(_))
    }
}

/// Configuration errors detected while loading a flow graph or building
/// its executor. Always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("At least one start node must be defined")]
    NoStartNodes,

    #[error("Duplicate node identifier '{0}'")]
    DuplicateNode(String),

    #[error("Unknown start node '{0}'")]
    UnknownStart(String),

    #[error("Node '{node}' references unknown successor '{successor}'")]
    UnknownSuccessor { node: String, successor: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node '{node}' references unknown logic '{logic}'")]
    UnknownLogic { node: String, logic: String },

    #[error("Node '{node}' uses asynchronous logic '{logic}', which cannot run in a worker process")]
    AsyncLogicInProcess { node: String, logic: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("state transport failed: {0}")]
    Transport(String),

    #[error("unexpected state reply: {0}")]
    Protocol(String),

    #[error("node '{0}' does not participate in global state")]
    Detached(String),
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("failed to spawn worker process '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("no worker process is available")]
    Unavailable,

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("worker process exited while running task {task}")]
    WorkerExited { task: u64 },
}
