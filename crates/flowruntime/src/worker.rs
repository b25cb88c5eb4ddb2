//! Worker-process side of the process pool.
//!
//! `serve` reads tasks from stdin, runs the requested synchronous logic and
//! writes the result to stdout. While logic runs, global-state calls are
//! forwarded to the parent over the same pipe and block for the reply.
//! Anything else the worker wants to say goes to stderr.

use crate::env::ScopedEnv;
use crate::backend::panic_message;
use crate::pool::protocol::{decode, encode, FromWorker, TaskRequest, ToWorker};
use crate::registry::LogicResolver;
use flowcore::{
    FlowError, GlobalState, NodeContext, NodeInput, NodeLogic, NodeOutput, StateError, StateOp,
    StateReply, StateTransport,
};
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Serve tasks on this process's stdin/stdout until stdin closes.
pub fn serve(resolver: &dyn LogicResolver) -> Result<(), FlowError> {
    serve_io(BufReader::new(io::stdin()), io::stdout(), resolver)
}

/// Serve tasks read from `reader`, answering on `writer`.
pub fn serve_io<R, W>(reader: R, writer: W, resolver: &dyn LogicResolver) -> Result<(), FlowError>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let pipe = Arc::new(Mutex::new(Pipe {
        reader: Box::new(reader),
        writer: Box::new(writer),
        next_state_id: 1,
    }));
    let state = GlobalState::remote(PipeTransport(pipe.clone()));
    tracing::debug!(pid = std::process::id(), "worker ready");

    loop {
        // The lock must be released before logic runs; state calls take it.
        let line = pipe.lock().read_line()?;
        let Some(line) = line else {
            break;
        };
        match decode::<ToWorker>(&line)? {
            ToWorker::Task(task) => {
                let reply = run_task(task, resolver, &state);
                pipe.lock().send(&reply)?;
            }
            ToWorker::StateReply { id, .. } => {
                tracing::warn!(id, "state reply received outside a task");
            }
        }
    }

    tracing::debug!("worker input closed, exiting");
    Ok(())
}

fn run_task(task: TaskRequest, resolver: &dyn LogicResolver, state: &GlobalState) -> FromWorker {
    let id = task.id;
    let logic = match resolver.resolve(&task.logic) {
        Some(NodeLogic::Sync(f)) => f,
        Some(NodeLogic::Async(_)) => {
            return FromWorker::Failure {
                id,
                error: format!("logic '{}' is asynchronous and cannot run in a worker process", task.logic),
            }
        }
        None => {
            return FromWorker::Failure {
                id,
                error: format!("unknown logic '{}'", task.logic),
            }
        }
    };

    let ctx = NodeContext::new(task.node_id, task.with_global_state.then(|| state.clone()));
    let input = NodeInput::from_value(task.input, None);

    let _env = ScopedEnv::apply(&task.env);
    match panic::catch_unwind(AssertUnwindSafe(|| logic(input, &ctx))) {
        Ok(Ok(returned)) => FromWorker::Result {
            id,
            output: NodeOutput::from_value(returned).to_primitive(),
        },
        Ok(Err(e)) => FromWorker::Failure {
            id,
            error: e.to_string(),
        },
        Err(payload) => FromWorker::Failure {
            id,
            error: format!("logic panicked: {}", panic_message(payload)),
        },
    }
}

struct Pipe {
    reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
    next_state_id: u64,
}

impl Pipe {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn send(&mut self, message: &FromWorker) -> Result<(), FlowError> {
        let line = encode(message)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Forwards state operations to the parent and waits for the answer.
struct PipeTransport(Arc<Mutex<Pipe>>);

impl StateTransport for PipeTransport {
    fn call(&self, op: StateOp) -> Result<StateReply, StateError> {
        let mut pipe = self.0.lock();
        let id = pipe.next_state_id;
        pipe.next_state_id += 1;

        pipe.send(&FromWorker::State { id, op })
            .map_err(|e| StateError::Transport(e.to_string()))?;
        let line = pipe
            .read_line()
            .map_err(|e| StateError::Transport(e.to_string()))?
            .ok_or_else(|| StateError::Transport("parent closed the pipe".into()))?;

        match decode::<ToWorker>(&line) {
            Ok(ToWorker::StateReply { reply, .. }) => Ok(reply),
            Ok(other) => Err(StateError::Protocol(format!("expected a state reply, got {:?}", other))),
            Err(e) => Err(StateError::Protocol(e.to_string())),
        }
    }
}
