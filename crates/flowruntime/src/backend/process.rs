use super::NodeBackend;
use crate::pool::protocol::TaskRequest;
use crate::pool::ProcessPool;
use async_trait::async_trait;
use flowcore::{ExecutorKind, NodeError, NodeId, NodeInput, NodeOutput, PoolError};
use std::collections::HashMap;

/// Runs synchronous logic in a pool worker process. The worker resolves
/// the same logic key from its own registry.
pub struct ProcessBackend {
    node_id: NodeId,
    logic: String,
    with_global_state: bool,
    pool: ProcessPool,
}

impl ProcessBackend {
    pub fn new(node_id: NodeId, logic: String, with_global_state: bool, pool: ProcessPool) -> Self {
        Self {
            node_id,
            logic,
            with_global_state,
            pool,
        }
    }
}

#[async_trait]
impl NodeBackend for ProcessBackend {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Process
    }

    async fn run(
        &self,
        input: NodeInput,
        env: &HashMap<String, String>,
    ) -> Result<NodeOutput, NodeError> {
        let request = TaskRequest {
            id: 0,
            logic: self.logic.clone(),
            node_id: self.node_id.clone(),
            input: input.to_primitive(),
            env: env.clone(),
            with_global_state: self.with_global_state,
        };

        match self.pool.submit(request).await {
            Ok(Ok(output)) => Ok(NodeOutput::from_value(output)),
            Ok(Err(message)) => Err(NodeError::ExecutionFailed(message)),
            Err(e @ (PoolError::Unavailable | PoolError::Spawn { .. })) => {
                Err(NodeError::PoolUnavailable(e.to_string()))
            }
            Err(e) => Err(NodeError::ExecutionFailed(e.to_string())),
        }
    }
}
