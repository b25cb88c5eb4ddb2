use super::{panic_message, NodeBackend};
use crate::env::ScopedEnv;
use async_trait::async_trait;
use flowcore::{
    ExecutorKind, GlobalState, NodeContext, NodeError, NodeId, NodeInput, NodeLogic, NodeOutput,
};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

/// Runs logic inside the scheduling process.
///
/// Synchronous logic is moved to the blocking pool so it cannot stall the
/// other workers and a timeout can abandon it. Asynchronous logic is
/// awaited on the worker's own task.
pub struct InlineBackend {
    node_id: NodeId,
    logic: NodeLogic,
    state: Option<GlobalState>,
}

impl InlineBackend {
    pub fn new(node_id: NodeId, logic: NodeLogic, state: Option<GlobalState>) -> Self {
        Self {
            node_id,
            logic,
            state,
        }
    }
}

#[async_trait]
impl NodeBackend for InlineBackend {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Inline
    }

    async fn run(
        &self,
        input: NodeInput,
        env: &HashMap<String, String>,
    ) -> Result<NodeOutput, NodeError> {
        let ctx = NodeContext::new(self.node_id.clone(), self.state.clone());

        let returned = match &self.logic {
            NodeLogic::Sync(f) => {
                let f = f.clone();
                let env = env.clone();
                tokio::task::spawn_blocking(move || {
                    let _env = ScopedEnv::apply(&env);
                    f(input, &ctx)
                })
                .await
                .map_err(|e| {
                    if e.is_panic() {
                        NodeError::failed(format!("logic panicked: {}", panic_message(e.into_panic())))
                    } else {
                        NodeError::failed(format!("logic task was cancelled: {}", e))
                    }
                })??
            }
            NodeLogic::Async(f) => {
                let _env = ScopedEnv::apply(env);
                AssertUnwindSafe(f(input, ctx))
                    .catch_unwind()
                    .await
                    .map_err(|p| NodeError::failed(format!("logic panicked: {}", panic_message(p))))??
            }
        };

        Ok(NodeOutput::from_value(returned))
    }
}
