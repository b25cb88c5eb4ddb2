//! Core abstractions for the flow engine
//!
//! Flow graph model, payload envelopes, global state, execution trace and
//! the node-logic contract. Nothing here spawns processes or schedules
//! work; see `flowruntime` for that.

mod config;
mod envelope;
mod error;
pub mod events;
mod graph;
mod node;
mod state;
mod trace;

pub use config::GlobalConfig;
pub use envelope::{
    Metadata, NodeInput, NodeOutput, Payload, STATUS_ERROR, STATUS_SUCCESS, STATUS_TIMEOUT,
};
pub use error::{FlowError, NodeError, PoolError, StateError, WorkflowError};
pub use events::{EventBus, RunEvent, RunId};
pub use graph::{
    ExecutorKind, FlowGraph, FlowGraphBuilder, NodeDefinition, NodeId, RawFlow, RawNodes,
    DEFAULT_TRANSITION,
};
pub use node::{AsyncLogicFn, LogicResult, NodeContext, NodeLogic, SyncLogicFn};
pub use state::{GlobalState, StateOp, StateReply, StateTransport};
pub use trace::{ExecutionEvent, ExecutionTrace};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
