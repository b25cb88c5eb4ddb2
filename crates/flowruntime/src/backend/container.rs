use super::NodeBackend;
use async_trait::async_trait;
use flowcore::{
    ExecutorKind, GlobalConfig, NodeDefinition, NodeError, NodeInput, NodeOutput, WorkflowError,
    STATUS_ERROR,
};
use serde_json::json;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

/// Runs a node as a container: the input envelope goes to stdin as JSON,
/// the output envelope is read back from stdout.
///
/// Each call names its container. When a timeout abandons the call, the
/// runtime client is killed (`kill_on_drop`) and `<runtime> kill <name>` is
/// issued, since the container itself can outlive its client.
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    runtime: String,
    image: String,
    command: Vec<String>,
    args: Vec<String>,
    workdir: Option<String>,
}

impl ContainerBackend {
    pub fn from_definition(
        definition: &NodeDefinition,
        config: &GlobalConfig,
    ) -> Result<Self, WorkflowError> {
        let image = definition.image.as_deref().ok_or_else(|| {
            WorkflowError::Invalid(format!("node '{}' requires a container image", definition.id))
        })?;
        Ok(Self {
            runtime: config.container_runtime.clone(),
            image: config.resolve_image(image),
            command: definition.command.clone(),
            args: definition.args.clone(),
            workdir: definition.workdir.clone(),
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Arguments passed to the runtime. Environment goes through repeated
    /// `-e` flags; the container inherits nothing from the host.
    pub fn command_line(&self, name: &str, env: &HashMap<String, String>) -> Vec<String> {
        let mut line = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];

        let mut vars: Vec<_> = env.iter().collect();
        vars.sort();
        for (key, value) in vars {
            line.push("-e".to_string());
            line.push(format!("{}={}", key, value));
        }

        if let Some(workdir) = &self.workdir {
            line.push("-w".to_string());
            line.push(workdir.clone());
        }

        line.push(self.image.clone());
        line.extend(self.command.iter().cloned());
        line.extend(self.args.iter().cloned());
        line
    }
}

#[async_trait]
impl NodeBackend for ContainerBackend {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Container
    }

    async fn run(
        &self,
        input: NodeInput,
        env: &HashMap<String, String>,
    ) -> Result<NodeOutput, NodeError> {
        let payload = serde_json::to_vec(&input.to_primitive())
            .map_err(|e| NodeError::failed(format!("failed to serialize input: {}", e)))?;

        let name = format!("flow-{}", Uuid::new_v4().simple());
        let mut child = Command::new(&self.runtime)
            .args(self.command_line(&name, env))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                NodeError::failed(format!("failed to spawn '{}': {}", self.runtime, e))
            })?;
        tracing::debug!(image = %self.image, container = %name, bytes = payload.len(), "container started");
        let mut guard = AbandonGuard {
            runtime: &self.runtime,
            name,
            armed: true,
        };

        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        };
        let (fed, finished) = tokio::join!(feed, child.wait_with_output());
        guard.armed = false;

        if let Err(e) = fed {
            // A container that never reads stdin closes the pipe early.
            if e.kind() != ErrorKind::BrokenPipe {
                return Err(NodeError::failed(format!("failed to write stdin: {}", e)));
            }
        }
        let output = finished
            .map_err(|e| NodeError::failed(format!("failed to wait for container: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let returncode = output.status.code().unwrap_or(-1);
            tracing::warn!(image = %self.image, returncode, "container exited with failure");
            return Ok(NodeOutput::new(
                STATUS_ERROR,
                json!({
                    "returncode": returncode,
                    "stderr": stderr,
                    "stdout": stdout,
                }),
            )
            .with_metadata("executor", "container"));
        }

        let text = stdout.trim();
        if text.is_empty() {
            return Ok(NodeOutput::default().with_metadata("executor", "container"));
        }
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(parsed) => Ok(NodeOutput::from_value(parsed)),
            Err(_) => Ok(NodeOutput::success(json!(text)).with_metadata("raw", true)),
        }
    }
}

/// Kills the named container if the call is dropped before it exits.
struct AbandonGuard<'a> {
    runtime: &'a str,
    name: String,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        tracing::warn!(container = %self.name, "container call abandoned, killing container");
        let killed = Command::new(self.runtime)
            .args(["kill", self.name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = killed {
            tracing::warn!(container = %self.name, error = %e, "failed to kill container");
        }
    }
}
