use crate::executor::{FlowExecutor, FlowOutcome};
use crate::registry::LogicResolver;
use flowcore::{FlowError, FlowGraph, GlobalConfig, Payload};
use std::sync::Arc;

/// Entry point for running flows against one logic registry and config.
///
/// Each `run` gets its own executor, global state and process pool; the
/// pool is torn down whether the run succeeds or aborts.
#[derive(Clone)]
pub struct FlowRuntime {
    resolver: Arc<dyn LogicResolver>,
    config: GlobalConfig,
}

impl FlowRuntime {
    pub fn new(resolver: impl LogicResolver + 'static, config: GlobalConfig) -> Self {
        Self::with_resolver(Arc::new(resolver), config)
    }

    pub fn with_resolver(resolver: Arc<dyn LogicResolver>, config: GlobalConfig) -> Self {
        Self { resolver, config }
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn resolver(&self) -> &dyn LogicResolver {
        self.resolver.as_ref()
    }

    /// Build an executor for `graph`. The caller owns its shutdown.
    pub async fn executor(&self, graph: FlowGraph) -> Result<FlowExecutor, FlowError> {
        FlowExecutor::new(graph, self.config.clone(), self.resolver.as_ref()).await
    }

    /// Execute `graph` once with `payload` fed to every start node.
    pub async fn run(
        &self,
        graph: FlowGraph,
        payload: impl Into<Payload>,
    ) -> Result<FlowOutcome, FlowError> {
        let executor = self.executor(graph).await?;
        let outcome = executor.run(payload).await;
        executor.shutdown().await;
        outcome
    }
}
