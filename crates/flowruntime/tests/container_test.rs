// crates/flowruntime/tests/container_test.rs
//
// A shell script stands in for the container runtime: it receives the
// same argv `docker` would and speaks the same stdin/stdout contract.
#![cfg(unix)]

use flowcore::{FlowGraph, GlobalConfig, NodeDefinition, STATUS_ERROR, STATUS_TIMEOUT};
use flowruntime::{FlowRuntime, LogicRegistry};
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn fake_runtime(dir: &Path, body: &str) -> String {
    let path = dir.join("fake-docker");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn runtime_with(program: String) -> FlowRuntime {
    let config = GlobalConfig {
        container_runtime: program,
        container_registries: vec!["registry.example.com".into()],
        ..GlobalConfig::default()
    };
    FlowRuntime::new(LogicRegistry::new(), config)
}

fn single(node: NodeDefinition) -> FlowGraph {
    FlowGraph::builder("container")
        .start(node.id.clone())
        .node(node)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_json_stdout_becomes_the_output_envelope() {
    let dir = TempDir::new().unwrap();
    // Echo stdin back inside a data envelope.
    let program = fake_runtime(
        dir.path(),
        r#"input=$(cat)
printf '{"status":"processed","data":%s,"metadata":{"handler":"fake"}}\n' "$input""#,
    );

    let outcome = runtime_with(program)
        .run(single(NodeDefinition::container("c", "handler:1")), json!({"number": 3}))
        .await
        .unwrap();

    let output = &outcome.results[0].output;
    assert_eq!(output.status, "processed");
    assert_eq!(output.data["data"], json!({"number": 3}));
    assert_eq!(output.data["predecessor"], json!(null));
    assert_eq!(output.metadata["handler"], "fake");
    assert_eq!(output.metadata["executor"], "container");
    assert_eq!(output.metadata["global_state"], false);
}

#[tokio::test]
async fn test_non_zero_exit_is_an_error_with_both_streams() {
    let dir = TempDir::new().unwrap();
    let program = fake_runtime(
        dir.path(),
        "cat >/dev/null\necho 'partial output'\necho 'something broke' >&2\nexit 3",
    );

    let outcome = runtime_with(program)
        .run(single(NodeDefinition::container("c", "handler:1")), json!({}))
        .await
        .unwrap();

    let output = &outcome.results[0].output;
    assert_eq!(output.status, STATUS_ERROR);
    assert_eq!(output.data["returncode"], 3);
    assert!(output.data["stdout"].as_str().unwrap().contains("partial output"));
    assert!(output.data["stderr"].as_str().unwrap().contains("something broke"));
}

#[tokio::test]
async fn test_empty_and_raw_stdout() {
    let dir = TempDir::new().unwrap();
    let empty = fake_runtime(dir.path(), "cat >/dev/null");
    let outcome = runtime_with(empty)
        .run(single(NodeDefinition::container("c", "img")), json!(1))
        .await
        .unwrap();
    assert!(outcome.results[0].output.is_success());
    assert_eq!(outcome.results[0].output.data, json!(null));

    let dir = TempDir::new().unwrap();
    let raw = fake_runtime(dir.path(), "cat >/dev/null\necho 'plain words'");
    let outcome = runtime_with(raw)
        .run(single(NodeDefinition::container("c", "img")), json!(1))
        .await
        .unwrap();
    let output = &outcome.results[0].output;
    assert!(output.is_success());
    assert_eq!(output.data, json!("plain words"));
    assert_eq!(output.metadata["raw"], true);
}

#[tokio::test]
async fn test_argv_carries_env_flags_and_qualified_image() {
    let dir = TempDir::new().unwrap();
    let program = fake_runtime(dir.path(), "cat >/dev/null\necho \"$@\"");

    let node = NodeDefinition::container("c", "handler:1")
        .with_command(["python", "handler.py"])
        .with_env("NODE_VAR", "node");
    let outcome = runtime_with(program).run(single(node), json!({})).await.unwrap();

    let argv = outcome.results[0].output.data.as_str().unwrap().to_string();
    assert!(argv.starts_with("run --rm -i --name flow-"), "argv was {argv}");
    assert!(argv.contains("-e NODE_VAR=node"));
    assert!(argv.ends_with("registry.example.com/handler:1 python handler.py"));
}

#[tokio::test]
async fn test_timeout_terminates_the_container_process() {
    let dir = TempDir::new().unwrap();
    let killed = dir.path().join("killed");
    let program = fake_runtime(
        dir.path(),
        &format!(
            "if [ \"$1\" = kill ]; then echo \"$2\" > {0}.tmp && mv {0}.tmp {0}; exit 0; fi\nexec sleep 5",
            killed.display()
        ),
    );

    let started = Instant::now();
    let outcome = runtime_with(program)
        .run(
            single(NodeDefinition::container("c", "img").with_timeout(0.2)),
            json!({}),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(outcome.results[0].output.status, STATUS_TIMEOUT);

    // The named container is killed through the runtime as well.
    let deadline = Instant::now() + Duration::from_secs(2);
    while !killed.exists() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let name = std::fs::read_to_string(&killed).unwrap();
    assert!(name.trim().starts_with("flow-"), "killed {name:?}");
}

#[tokio::test]
async fn test_missing_runtime_is_a_node_error() {
    let outcome = runtime_with("/nonexistent/docker".into())
        .run(single(NodeDefinition::container("c", "img")), json!({}))
        .await
        .unwrap();
    let output = &outcome.results[0].output;
    assert_eq!(output.status, STATUS_ERROR);
    assert!(output.data["error"].as_str().unwrap().contains("failed to spawn"));
}
