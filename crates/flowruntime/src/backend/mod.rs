//! Node executor backends
//!
//! Every backend runs a node's logic behind the same contract; the
//! `ExecutableNode` wrapper adds the timeout, turns failures into `error` /
//! `timeout` envelopes and stamps execution metadata.

mod container;
mod inline;
mod process;

pub use container::ContainerBackend;
pub use inline::InlineBackend;
pub use process::ProcessBackend;

use crate::pool::ProcessPool;
use crate::registry::LogicResolver;
use async_trait::async_trait;
use flowcore::{
    ExecutorKind, FlowError, GlobalConfig, GlobalState, NodeDefinition, NodeError, NodeId,
    NodeInput, NodeLogic, NodeOutput, WorkflowError, STATUS_ERROR, STATUS_TIMEOUT,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Strategy for running one node's logic.
#[async_trait]
pub trait NodeBackend: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Run the logic once. Errors are converted to envelopes by the caller.
    async fn run(
        &self,
        input: NodeInput,
        env: &HashMap<String, String>,
    ) -> Result<NodeOutput, NodeError>;
}

/// A node bound to its backend, environment and time budget.
pub struct ExecutableNode {
    id: NodeId,
    with_global_state: bool,
    env: HashMap<String, String>,
    timeout: Option<Duration>,
    backend: Box<dyn NodeBackend>,
}

impl ExecutableNode {
    /// Resolve the backend for `definition`. Unknown logic keys, async logic
    /// on a process node, or a process node without a pool are fatal.
    pub fn build(
        definition: &NodeDefinition,
        config: &GlobalConfig,
        resolver: &dyn LogicResolver,
        state: &GlobalState,
        pool: Option<&ProcessPool>,
    ) -> Result<Self, FlowError> {
        let participates = definition.participates_in_global_state();
        let backend: Box<dyn NodeBackend> = match resolve_logic(definition, resolver)? {
            Some(logic) if definition.executor == ExecutorKind::Inline => {
                let state = participates.then(|| state.clone());
                Box::new(InlineBackend::new(definition.id.clone(), logic, state))
            }
            Some(_) => {
                let pool = pool.ok_or_else(|| {
                    FlowError::Execution(format!(
                        "node '{}' requires a process pool but none is running",
                        definition.id
                    ))
                })?;
                Box::new(ProcessBackend::new(
                    definition.id.clone(),
                    require_callable(definition)?.to_string(),
                    participates,
                    pool.clone(),
                ))
            }
            None => Box::new(ContainerBackend::from_definition(definition, config)?),
        };

        Ok(Self {
            id: definition.id.clone(),
            with_global_state: participates,
            env: config.merged_env(&definition.env),
            timeout: definition.timeout_duration(),
            backend,
        })
    }

    /// Wrap an arbitrary backend, e.g. a test double.
    pub fn with_backend(
        definition: &NodeDefinition,
        env: HashMap<String, String>,
        backend: Box<dyn NodeBackend>,
    ) -> Self {
        Self {
            id: definition.id.clone(),
            with_global_state: definition.participates_in_global_state(),
            env,
            timeout: definition.timeout_duration(),
            backend,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ExecutorKind {
        self.backend.kind()
    }

    /// Execute once. Node-level failures come back as `error`/`timeout`
    /// outputs; only infrastructure failures are returned as `Err`.
    ///
    /// `predecessor` is the node whose edge fired this call, as the
    /// scheduler saw it; it is what lands in the output metadata.
    pub async fn execute(
        &self,
        input: NodeInput,
        predecessor: Option<&str>,
    ) -> Result<NodeOutput, FlowError> {
        let predecessor = predecessor.map(str::to_string);
        let start = Instant::now();
        tracing::info!(node = %self.id, executor = %self.kind(), "starting node");

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.backend.run(input, &self.env)).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout {
                    seconds: limit.as_secs_f64(),
                }),
            },
            None => self.backend.run(input, &self.env).await,
        };
        let duration = start.elapsed().as_secs_f64();

        match outcome {
            Ok(mut output) => {
                let metadata = &mut output.metadata;
                metadata.insert("duration".into(), json!(duration));
                metadata.insert("node_id".into(), json!(self.id));
                metadata.insert("global_state".into(), json!(self.with_global_state));
                metadata.insert("executor".into(), json!(self.kind().as_str()));
                if let Some(predecessor) = &predecessor {
                    metadata.insert("predecessor".into(), json!(predecessor));
                }
                tracing::info!(node = %self.id, status = %output.status, duration_ms = (duration * 1000.0) as u64, "node completed");
                Ok(output)
            }
            Err(e @ NodeError::Timeout { .. }) => {
                tracing::error!(node = %self.id, error = %e, "node timed out");
                Ok(self.failure(STATUS_TIMEOUT, &e, duration, predecessor))
            }
            Err(e) if e.is_infrastructure() => {
                tracing::error!(node = %self.id, error = %e, "node cannot be executed");
                Err(e.into())
            }
            Err(e) => {
                tracing::error!(node = %self.id, error = %e, "node failed");
                Ok(self.failure(STATUS_ERROR, &e, duration, predecessor))
            }
        }
    }

    fn failure(
        &self,
        status: &str,
        error: &NodeError,
        duration: f64,
        predecessor: Option<NodeId>,
    ) -> NodeOutput {
        let mut output = NodeOutput::new(status, json!({ "error": error.to_string() }))
            .with_metadata("duration", duration)
            .with_metadata("node_id", self.id.clone());
        if let Some(predecessor) = predecessor {
            output.metadata.insert("predecessor".into(), Value::String(predecessor));
        }
        output
    }
}

/// Look up the logic an inline or process node names. Container nodes
/// have none. Pure; safe to call before any resource is acquired.
pub fn resolve_logic(
    definition: &NodeDefinition,
    resolver: &dyn LogicResolver,
) -> Result<Option<NodeLogic>, WorkflowError> {
    if definition.executor == ExecutorKind::Container {
        return Ok(None);
    }
    let key = require_callable(definition)?;
    let logic = resolver.resolve(key).ok_or_else(|| WorkflowError::UnknownLogic {
        node: definition.id.clone(),
        logic: key.to_string(),
    })?;
    if definition.executor == ExecutorKind::Process && logic.is_async() {
        return Err(WorkflowError::AsyncLogicInProcess {
            node: definition.id.clone(),
            logic: key.to_string(),
        });
    }
    Ok(Some(logic))
}

fn require_callable(definition: &NodeDefinition) -> Result<&str, WorkflowError> {
    definition.callable.as_deref().ok_or_else(|| {
        WorkflowError::Invalid(format!("node '{}' requires a callable", definition.id))
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
