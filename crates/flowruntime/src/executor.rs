use crate::backend::{resolve_logic, ExecutableNode};
use crate::env;
use crate::pool::{PoolConfig, ProcessPool};
use crate::registry::LogicResolver;
use chrono::Utc;
use flowcore::{
    EventBus, ExecutionEvent, ExecutionTrace, FlowError, FlowGraph, GlobalConfig, GlobalState,
    NodeId, NodeInput, NodeOutput, Payload, RunEvent, RunId, WorkflowError,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One unit of queued work.
#[derive(Debug)]
enum WorkItem {
    Run {
        node_id: NodeId,
        input: NodeInput,
        predecessor: Option<NodeId>,
    },
    Shutdown,
}

type SharedQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkItem>>>;

/// Output of a node that had no transition for its status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowResult {
    pub node_id: NodeId,
    pub output: NodeOutput,
}

impl FlowResult {
    pub fn to_value(&self) -> Value {
        json!({
            "node_id": self.node_id,
            "output": self.output.to_primitive(),
        })
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub run_id: RunId,
    /// Terminal results in completion order.
    pub results: Vec<FlowResult>,
    /// Global state as it stood when the run drained.
    pub state: Map<String, Value>,
    pub trace: Option<ExecutionTrace>,
}

impl FlowOutcome {
    pub fn results_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a FlowResult> + 'a {
        self.results.iter().filter(move |r| r.node_id == node_id)
    }
}

/// Queue-driven scheduler for one flow graph.
///
/// A fixed set of workers pull `(node, input)` items from a single queue,
/// execute them and enqueue the successors chosen by the output status. A
/// node reached by several edges runs once per edge that fires.
pub struct FlowExecutor {
    graph: Arc<FlowGraph>,
    nodes: Arc<HashMap<NodeId, ExecutableNode>>,
    state: GlobalState,
    pool: Option<ProcessPool>,
    concurrency: usize,
    trace: bool,
    events: EventBus,
}

impl FlowExecutor {
    /// Resolve every node against `resolver` and start the process pool if
    /// any node needs one. Fails before running anything when a logic key
    /// is unknown or a process node uses async logic.
    pub async fn new(
        graph: FlowGraph,
        config: GlobalConfig,
        resolver: &dyn LogicResolver,
    ) -> Result<Self, FlowError> {
        for definition in graph.nodes() {
            resolve_logic(definition, resolver)?;
        }
        env::apply_defaults(&config.env);
        let state = GlobalState::with_entries(config.shared_state.clone());

        let pool = if graph.requires_process_pool() {
            let pool_config = PoolConfig::from_global(&config)?;
            Some(ProcessPool::start(pool_config, state.clone()).await?)
        } else {
            None
        };

        let mut nodes = HashMap::with_capacity(graph.len());
        for definition in graph.nodes() {
            match ExecutableNode::build(definition, &config, resolver, &state, pool.as_ref()) {
                Ok(node) => {
                    nodes.insert(definition.id.clone(), node);
                }
                Err(e) => {
                    if let Some(pool) = &pool {
                        pool.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self::assemble(graph, &config, nodes, state, pool))
    }

    /// Executor over prebuilt nodes, e.g. with custom backends. No process
    /// pool is started.
    pub fn with_nodes(
        graph: FlowGraph,
        config: GlobalConfig,
        nodes: impl IntoIterator<Item = ExecutableNode>,
    ) -> Result<Self, FlowError> {
        let nodes: HashMap<_, _> = nodes.into_iter().map(|n| (n.id().to_string(), n)).collect();
        if let Some(missing) = graph.nodes().find(|d| !nodes.contains_key(&d.id)) {
            return Err(WorkflowError::NodeNotFound(missing.id.clone()).into());
        }
        let state = GlobalState::with_entries(config.shared_state.clone());
        Ok(Self::assemble(graph, &config, nodes, state, None))
    }

    fn assemble(
        graph: FlowGraph,
        config: &GlobalConfig,
        nodes: HashMap<NodeId, ExecutableNode>,
        state: GlobalState,
        pool: Option<ProcessPool>,
    ) -> Self {
        let concurrency = config.max_concurrency.unwrap_or(graph.len()).max(1);
        Self {
            graph: Arc::new(graph),
            nodes: Arc::new(nodes),
            state,
            pool,
            concurrency,
            trace: config.trace,
            events: EventBus::new(config.event_buffer_size),
        }
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn global_state(&self) -> &GlobalState {
        &self.state
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Run the flow from its start nodes until no work is pending.
    ///
    /// Node failures are reported in the results; only infrastructure
    /// failures abort the run and come back as `Err`.
    pub async fn run(&self, payload: impl Into<Payload>) -> Result<FlowOutcome, FlowError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let payload = payload.into();

        let (sender, receiver) = mpsc::unbounded_channel();
        let (pending, mut drained) = watch::channel(0usize);
        let ctx = Arc::new(RunContext {
            run_id,
            graph: self.graph.clone(),
            nodes: self.nodes.clone(),
            queue: sender,
            pending,
            cancel: CancellationToken::new(),
            fatal: Mutex::new(None),
            results: Mutex::new(Vec::new()),
            trace: self
                .trace
                .then(|| Mutex::new(ExecutionTrace::new(run_id, self.graph.name()))),
            events: self.events.clone(),
        });

        tracing::info!(%run_id, flow = %self.graph.name(), workers = self.concurrency, "starting flow run");
        self.events.emit(RunEvent::RunStarted {
            run_id,
            flow: self.graph.name().to_string(),
            timestamp: Utc::now(),
        });

        for start in self.graph.start() {
            ctx.enqueue(WorkItem::Run {
                node_id: start.clone(),
                input: NodeInput::from_value(payload.clone(), None),
                predecessor: None,
            })?;
        }

        // Dropping the set aborts the workers, so a caller that abandons
        // `run` does not leave them parked on the queue.
        let queue: SharedQueue = Arc::new(tokio::sync::Mutex::new(receiver));
        let mut workers = JoinSet::new();
        for index in 0..self.concurrency {
            workers.spawn(work(index, ctx.clone(), queue.clone()));
        }

        // Every item is counted before it is queued and uncounted only after
        // its successors are queued, so zero means nothing more can arrive.
        let joined = drained.wait_for(|n| *n == 0).await.map(|_| ());

        for _ in 0..self.concurrency {
            let _ = ctx.queue.send(WorkItem::Shutdown);
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(%run_id, error = %e, "flow worker task failed");
                ctx.abort(FlowError::Execution(format!("worker task failed: {}", e)));
            }
        }
        if joined.is_err() {
            ctx.abort(FlowError::Execution("pending counter closed".into()));
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let fatal = ctx.fatal.lock().take();
        if let Some(e) = fatal {
            tracing::error!(%run_id, error = %e, "flow run aborted");
            self.events.emit(RunEvent::RunFinished {
                run_id,
                success: false,
                results: 0,
                duration_ms,
                timestamp: Utc::now(),
            });
            return Err(e);
        }

        let results = std::mem::take(&mut *ctx.results.lock());
        let trace = ctx.trace.as_ref().map(|trace| {
            let mut trace = trace.lock();
            trace.mark_finished();
            trace.clone()
        });
        let state = self.state.snapshot().await?;

        tracing::info!(%run_id, results = results.len(), duration_ms, "flow run completed");
        self.events.emit(RunEvent::RunFinished {
            run_id,
            success: true,
            results: results.len(),
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(FlowOutcome {
            run_id,
            results,
            state,
            trace,
        })
    }

    /// Release the process pool, if one was started. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }
}

/// State shared by the workers of one run.
struct RunContext {
    run_id: RunId,
    graph: Arc<FlowGraph>,
    nodes: Arc<HashMap<NodeId, ExecutableNode>>,
    queue: mpsc::UnboundedSender<WorkItem>,
    pending: watch::Sender<usize>,
    cancel: CancellationToken,
    fatal: Mutex<Option<FlowError>>,
    results: Mutex<Vec<FlowResult>>,
    trace: Option<Mutex<ExecutionTrace>>,
    events: EventBus,
}

impl RunContext {
    fn enqueue(&self, item: WorkItem) -> Result<(), FlowError> {
        self.pending.send_modify(|n| *n += 1);
        self.queue.send(item).map_err(|_| {
            self.pending.send_modify(|n| *n -= 1);
            FlowError::Execution("work queue is closed".into())
        })
    }

    fn complete(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Record the first fatal error and stop executing queued work.
    fn abort(&self, error: FlowError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            tracing::error!(run_id = %self.run_id, error = %error, "aborting flow run");
            *fatal = Some(error);
        }
        self.cancel.cancel();
    }

    async fn execute(
        &self,
        worker: usize,
        node_id: NodeId,
        input: NodeInput,
        predecessor: Option<NodeId>,
    ) -> Result<(), FlowError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.clone()))?;

        self.events.emit(RunEvent::NodeStarted {
            run_id: self.run_id,
            node_id: node_id.clone(),
            predecessor: predecessor.clone(),
            worker,
            timestamp: Utc::now(),
        });
        let started_at = Utc::now();
        let started = Instant::now();
        let recorded_input = self.trace.as_ref().map(|_| input.to_primitive());

        let output = node.execute(input, predecessor.as_deref()).await?;
        let duration = started.elapsed();
        let successors = self.graph.next_nodes(&node_id, &output.status)?;

        for successor in &successors {
            // Each branch gets its own copy of the envelope.
            self.enqueue(WorkItem::Run {
                node_id: successor.clone(),
                input: NodeInput::from_value(output.clone(), Some(&node_id)),
                predecessor: Some(node_id.clone()),
            })?;
        }

        if let (Some(trace), Some(node_input)) = (&self.trace, recorded_input) {
            trace.lock().add_event(ExecutionEvent {
                index: 0,
                node_id: node_id.clone(),
                status: output.status.clone(),
                predecessor,
                started_at,
                finished_at: Utc::now().max(started_at),
                duration: duration.as_secs_f64(),
                node_input,
                node_output: output.to_primitive(),
                successors: successors.clone(),
            });
        }

        self.events.emit(RunEvent::NodeFinished {
            run_id: self.run_id,
            node_id: node_id.clone(),
            status: output.status.clone(),
            duration_ms: duration.as_millis() as u64,
            successors: successors.clone(),
            timestamp: Utc::now(),
        });

        if successors.is_empty() {
            tracing::debug!(node = %node_id, status = %output.status, "terminal result");
            self.results.lock().push(FlowResult { node_id, output });
        }
        Ok(())
    }
}

async fn work(index: usize, ctx: Arc<RunContext>, queue: SharedQueue) {
    loop {
        let item = queue.lock().await.recv().await;
        let Some(WorkItem::Run {
            node_id,
            input,
            predecessor,
        }) = item
        else {
            break;
        };

        if ctx.cancel.is_cancelled() {
            tracing::debug!(worker = index, node = %node_id, "run aborted, discarding queued node");
        } else if let Err(e) = ctx.execute(index, node_id, input, predecessor).await {
            ctx.abort(e);
        }
        ctx.complete();
    }
    tracing::trace!(worker = index, "flow worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::NodeDefinition;

    #[test]
    fn concurrency_defaults_to_node_count() {
        let graph = FlowGraph::builder("c")
            .start("a")
            .node(NodeDefinition::inline("a", "x").otherwise(["b"]))
            .node(NodeDefinition::inline("b", "x"))
            .build()
            .unwrap();
        let nodes = graph
            .nodes()
            .map(|d| ExecutableNode::with_backend(d, HashMap::new(), Box::new(Noop)))
            .collect::<Vec<_>>();
        let executor = FlowExecutor::with_nodes(graph, GlobalConfig::default(), nodes).unwrap();
        assert_eq!(executor.concurrency(), 2);
    }

    #[test]
    fn missing_prebuilt_node_is_rejected() {
        let graph = FlowGraph::builder("c")
            .start("a")
            .node(NodeDefinition::inline("a", "x"))
            .build()
            .unwrap();
        let err = FlowExecutor::with_nodes(graph, GlobalConfig::default(), Vec::new())
            .err()
            .unwrap();
        assert!(matches!(err, FlowError::Workflow(WorkflowError::NodeNotFound(id)) if id == "a"));
    }

    struct Noop;

    #[async_trait::async_trait]
    impl crate::backend::NodeBackend for Noop {
        fn kind(&self) -> flowcore::ExecutorKind {
            flowcore::ExecutorKind::Inline
        }

        async fn run(
            &self,
            input: NodeInput,
            _env: &HashMap<String, String>,
        ) -> Result<NodeOutput, flowcore::NodeError> {
            Ok(NodeOutput::from_value(input))
        }
    }
}
