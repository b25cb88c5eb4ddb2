//! Flow execution runtime
//!
//! This crate runs `flowcore` graphs: the queue-driven scheduler, the
//! inline / process / container backends, the process pool and its worker
//! loop, and the logic registry nodes are resolved against.

mod backend;
pub mod env;
mod executor;
pub mod pool;
mod registry;
mod runtime;
pub mod worker;

pub use backend::{
    resolve_logic, ContainerBackend, ExecutableNode, InlineBackend, NodeBackend, ProcessBackend,
};
pub use executor::{FlowExecutor, FlowOutcome, FlowResult};
pub use pool::{PoolConfig, ProcessPool};
pub use registry::{LogicMetadata, LogicRegistry, LogicResolver};
pub use runtime::FlowRuntime;
