// crates/flowcli/tests/cli_test.rs

use serde_json::{json, Value};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const FLOW: &str = env!("CARGO_BIN_EXE_flow");

fn flow(args: &[&str]) -> Output {
    Command::new(FLOW)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run flow binary")
}

fn documents(output: &Output) -> Vec<Value> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::Deserializer::from_str(&stdout)
        .into_iter::<Value>()
        .map(|doc| doc.expect("stdout is not JSON"))
        .collect()
}

fn write_json(dir: &Path, name: &str, value: &Value) -> String {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path.to_string_lossy().into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "flow failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_init_then_run_example_flow() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flow.json");
    let path = path.to_str().unwrap();

    assert_success(&flow(&["init", "--output", path]));
    let output = flow(&["run", "--flow", path, "--payload", r#"{"number": 4}"#, "--print-state"]);
    assert_success(&output);

    let docs = documents(&output);
    assert_eq!(docs.len(), 2);
    let results = docs[0].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["node_id"], "finish");
    let data = &results[0]["output"]["data"];
    // `sum` ran in a worker process.
    assert_eq!(data["input"]["total"], 10);
    assert_eq!(data["input"]["parity"], "even");
    assert_eq!(docs[1]["start_invocations"], 1);
    assert_eq!(docs[1]["last_payload"], json!({"number": 4}));
}

#[test]
fn test_process_node_reads_parent_state() {
    let dir = TempDir::new().unwrap();
    let flow_path = write_json(
        dir.path(),
        "flow.json",
        &json!({
            "name": "remote-state",
            "start": "start",
            "nodes": {
                "start": {"id": "start", "callable": "demo.starter", "transitions": ["report"]},
                "report": {"id": "report", "executor": "process", "callable": "demo.finalizer"}
            }
        }),
    );
    let config_path = write_json(
        dir.path(),
        "global.json",
        &json!({"processPoolSize": 1, "sharedState": {"seed": "s"}}),
    );

    let output = flow(&[
        "run",
        "--flow",
        &flow_path,
        "--global-config",
        &config_path,
        "--payload",
        r#"{"hello": "world"}"#,
    ]);
    assert_success(&output);

    let docs = documents(&output);
    let report = &docs[0][0]["output"];
    assert_eq!(report["metadata"]["executor"], "process");
    assert_eq!(report["data"]["state"]["seed"], "s");
    assert_eq!(report["data"]["state"]["start_invocations"], 1);
    assert_eq!(report["data"]["state"]["last_payload"], json!({"hello": "world"}));
}

#[test]
fn test_trace_out_writes_every_event() {
    let dir = TempDir::new().unwrap();
    let flow_path = write_json(
        dir.path(),
        "flow.json",
        &json!({
            "name": "traced",
            "start": ["a"],
            "nodes": [
                {"id": "a", "callable": "debug.echo", "transitions": ["b"]},
                {"id": "b", "callable": "transform.json_stringify"}
            ]
        }),
    );
    let trace_path = dir.path().join("trace.json");

    let output = flow(&[
        "run",
        "--flow",
        &flow_path,
        "--payload-file",
        &write_json(dir.path(), "payload.json", &json!({"value": [1, 2]})),
        "--no-print-results",
        "--trace-out",
        trace_path.to_str().unwrap(),
    ]);
    assert_success(&output);
    assert!(documents(&output).is_empty());

    let trace: Value = serde_json::from_str(&std::fs::read_to_string(&trace_path).unwrap()).unwrap();
    assert_eq!(trace["flow_name"], "traced");
    let events = trace["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["index"], 0);
    assert_eq!(events[1]["index"], 1);
    assert_eq!(events[1]["predecessor"], "a");
}

#[test]
fn test_validate_rejects_unknown_logic() {
    let dir = TempDir::new().unwrap();
    let flow_path = write_json(
        dir.path(),
        "flow.json",
        &json!({
            "start": ["a"],
            "nodes": [{"id": "a", "callable": "no.such.logic"}]
        }),
    );

    let output = flow(&["validate", &flow_path]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("no.such.logic"));
}

#[test]
fn test_validate_rejects_dangling_successor() {
    let dir = TempDir::new().unwrap();
    let flow_path = write_json(
        dir.path(),
        "flow.json",
        &json!({
            "start": ["a"],
            "nodes": [{"id": "a", "callable": "debug.echo", "transitions": {"default": ["ghost"]}}]
        }),
    );

    let output = flow(&["validate", &flow_path]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ghost"));
}

#[test]
fn test_payload_sources_are_exclusive() {
    let dir = TempDir::new().unwrap();
    let payload = write_json(dir.path(), "payload.json", &json!({}));
    let output = flow(&["run", "--flow", "unused.json", "--payload", "{}", "--payload-file", &payload]);
    assert!(!output.status.success());
}

#[test]
fn test_nodes_lists_standard_logic() {
    let output = flow(&["nodes"]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    for key in ["debug.echo", "time.delay", "demo.intensive", "transform.json_parse"] {
        assert!(stdout.contains(key), "missing {key}");
    }
}
