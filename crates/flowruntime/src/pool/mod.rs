//! Fixed-size pool of worker processes for `process` nodes.
//!
//! Each worker is a long-lived child speaking the `protocol` module over its
//! stdin/stdout, driven by one task in this process. Drivers pull jobs from
//! a shared queue, so a free worker takes the next job. When a caller stops
//! waiting (timeout) the driver still finishes the exchange, and the worker
//! returns to the pool once its logic completes.

pub mod protocol;

use flowcore::{GlobalConfig, GlobalState, PoolError, StateReply};
use parking_lot::Mutex;
use protocol::{decode, encode, FromWorker, TaskRequest, ToWorker};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long a worker gets to exit after its stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Logic result as reported by a worker: primitive output or error text.
pub type TaskOutcome = Result<Value, String>;

/// How to start worker processes.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub program: String,
    pub args: Vec<String>,
    pub size: usize,
}

impl PoolConfig {
    pub fn from_global(config: &GlobalConfig) -> Result<Self, PoolError> {
        let size = config.process_pool_size();
        match config.worker_command.as_deref() {
            Some([program, args @ ..]) => Ok(Self {
                program: program.clone(),
                args: args.to_vec(),
                size,
            }),
            Some([]) => Err(PoolError::Spawn {
                program: String::new(),
                reason: "worker_command is empty".to_string(),
            }),
            None => {
                let exe = std::env::current_exe().map_err(|e| PoolError::Spawn {
                    program: "<current executable>".to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Self {
                    program: exe.to_string_lossy().into_owned(),
                    args: vec!["worker".to_string()],
                    size,
                })
            }
        }
    }
}

struct Job {
    request: TaskRequest,
    reply: oneshot::Sender<Result<TaskOutcome, PoolError>>,
}

type SharedJobs = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>;

struct PoolInner {
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    size: usize,
}

/// Handle to a running pool; clones share the same workers.
#[derive(Clone)]
pub struct ProcessPool {
    inner: Arc<PoolInner>,
}

impl ProcessPool {
    /// Spawn `config.size` workers. Worker state requests are answered from
    /// `state`, which is handed to every driver once, here.
    pub async fn start(config: PoolConfig, state: GlobalState) -> Result<Self, PoolError> {
        let size = config.size.max(1);
        let mut processes = Vec::with_capacity(size);
        for _ in 0..size {
            processes.push(WorkerProcess::spawn(&config)?);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let jobs: SharedJobs = Arc::new(tokio::sync::Mutex::new(rx));
        let config = Arc::new(config);
        let drivers = processes
            .into_iter()
            .enumerate()
            .map(|(index, process)| {
                tokio::spawn(drive(
                    index,
                    Some(process),
                    jobs.clone(),
                    state.clone(),
                    config.clone(),
                ))
            })
            .collect();

        tracing::info!(workers = size, program = %config.program, "process pool started");
        Ok(Self {
            inner: Arc::new(PoolInner {
                jobs: Mutex::new(Some(tx)),
                drivers: Mutex::new(drivers),
                next_id: AtomicU64::new(1),
                size,
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Run one task on the next free worker.
    pub async fn submit(&self, mut request: TaskRequest) -> Result<TaskOutcome, PoolError> {
        request.id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let sender = self.inner.jobs.lock().clone().ok_or(PoolError::Unavailable)?;
        let (reply, response) = oneshot::channel();
        sender
            .send(Job { request, reply })
            .map_err(|_| PoolError::Unavailable)?;
        response.await.map_err(|_| PoolError::Unavailable)?
    }

    /// Stop accepting work, let queued jobs finish, and wait for every
    /// worker to exit. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.jobs.lock().take();
        let drivers: Vec<_> = self.inner.drivers.lock().drain(..).collect();
        if drivers.is_empty() {
            return;
        }
        for result in futures::future::join_all(drivers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "process pool driver failed");
            }
        }
        tracing::info!("process pool shut down");
    }
}

async fn drive(
    index: usize,
    mut process: Option<WorkerProcess>,
    jobs: SharedJobs,
    state: GlobalState,
    config: Arc<PoolConfig>,
) {
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(Job { request, reply }) = job else {
            break;
        };

        let mut worker = match process.take() {
            Some(worker) => worker,
            None => match WorkerProcess::spawn(&config) {
                Ok(worker) => {
                    tracing::info!(worker = index, "respawned worker process");
                    worker
                }
                Err(e) => {
                    tracing::error!(worker = index, error = %e, "could not respawn worker process");
                    let _ = reply.send(Err(e));
                    return;
                }
            },
        };

        let task = request.id;
        let result = run_task(&mut worker, request, &state).await;
        match &result {
            Ok(_) => process = Some(worker),
            Err(e) => {
                tracing::error!(worker = index, task, error = %e, "worker process failed");
                worker.kill().await;
            }
        }
        if reply.send(result).is_err() {
            tracing::debug!(worker = index, task, "caller abandoned task");
        }
    }

    if let Some(worker) = process {
        worker.shutdown().await;
    }
    tracing::debug!(worker = index, "process pool driver stopped");
}

async fn run_task(
    worker: &mut WorkerProcess,
    request: TaskRequest,
    state: &GlobalState,
) -> Result<TaskOutcome, PoolError> {
    let task = request.id;
    worker.send(&ToWorker::Task(request)).await?;
    loop {
        let Some(line) = worker.next_line().await? else {
            return Err(PoolError::WorkerExited { task });
        };
        match decode::<FromWorker>(&line) {
            Ok(FromWorker::Result { id, output }) if id == task => return Ok(Ok(output)),
            Ok(FromWorker::Failure { id, error }) if id == task => return Ok(Err(error)),
            Ok(FromWorker::State { id, op }) => {
                let reply = state.apply(op).unwrap_or_else(|e| StateReply::Error {
                    message: e.to_string(),
                });
                worker.send(&ToWorker::StateReply { id, reply }).await?;
            }
            Ok(other) => {
                tracing::warn!(task, message = ?other, "ignoring message for another task");
            }
            Err(e) => {
                return Err(PoolError::Protocol(format!(
                    "malformed worker message ({}): {}",
                    e, line
                )))
            }
        }
    }
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    fn spawn(config: &PoolConfig) -> Result<Self, PoolError> {
        let spawn_error = |reason: String| PoolError::Spawn {
            program: config.program.clone(),
            reason,
        };
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout was not captured".into()))?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn send(&mut self, message: &ToWorker) -> Result<(), PoolError> {
        let line = encode(message).map_err(|e| PoolError::Protocol(e.to_string()))?;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PoolError::Protocol(format!("write to worker failed: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| PoolError::Protocol(format!("flush to worker failed: {}", e)))
    }

    async fn next_line(&mut self) -> Result<Option<String>, PoolError> {
        self.stdout
            .next_line()
            .await
            .map_err(|e| PoolError::Protocol(format!("read from worker failed: {}", e)))
    }

    /// Close stdin so the worker's loop ends, then reap it.
    async fn shutdown(self) {
        let WorkerProcess {
            mut child, stdin, ..
        } = self;
        drop(stdin);
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "worker process exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "waiting for worker process failed"),
            Err(_) => {
                tracing::warn!("worker process ignored shutdown, killing it");
                let _ = child.kill().await;
            }
        }
    }

    async fn kill(mut self) {
        let _ = self.child.kill().await;
    }
}
