use crate::{GlobalState, NodeError, NodeId, NodeInput, Payload, StateError};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a node's logic hands back.
pub type LogicResult = Result<Payload, NodeError>;

pub type SyncLogicFn = dyn Fn(NodeInput, &NodeContext) -> LogicResult + Send + Sync;
pub type AsyncLogicFn = dyn Fn(NodeInput, NodeContext) -> BoxFuture<'static, LogicResult> + Send + Sync;

/// An invocable unit of node logic. Synchronous logic never suspends and
/// may run in a worker process; asynchronous logic needs an event loop and
/// runs inline only.
#[derive(Clone)]
pub enum NodeLogic {
    Sync(Arc<SyncLogicFn>),
    Async(Arc<AsyncLogicFn>),
}

impl NodeLogic {
    pub fn from_sync<F>(f: F) -> Self
    where
        F: Fn(NodeInput, &NodeContext) -> LogicResult + Send + Sync + 'static,
    {
        NodeLogic::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(NodeInput, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LogicResult> + Send + 'static,
    {
        NodeLogic::Async(Arc::new(move |input, ctx| Box::pin(f(input, ctx))))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, NodeLogic::Async(_))
    }
}

impl fmt::Debug for NodeLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeLogic::Sync(_) => f.write_str("NodeLogic::Sync"),
            NodeLogic::Async(_) => f.write_str("NodeLogic::Async"),
        }
    }
}

/// Execution context passed to each logic call.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    /// Present when the node participates in global state.
    pub state: Option<GlobalState>,
}

impl NodeContext {
    pub fn new(node_id: impl Into<NodeId>, state: Option<GlobalState>) -> Self {
        Self {
            node_id: node_id.into(),
            state,
        }
    }

    /// The run's global state, or an error for nodes that opted out.
    pub fn state(&self) -> Result<&GlobalState, StateError> {
        self.state
            .as_ref()
            .ok_or_else(|| StateError::Detached(self.node_id.clone()))
    }
}
