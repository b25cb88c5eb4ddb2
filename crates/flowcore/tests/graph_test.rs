// crates/flowcore/tests/graph_test.rs

use flowcore::{ExecutorKind, FlowGraph, NodeDefinition, WorkflowError};
use serde_json::json;

fn load(value: serde_json::Value) -> Result<FlowGraph, WorkflowError> {
    FlowGraph::from_json(value)
}

#[test]
fn test_load_list_and_map_forms() {
    let listed = load(json!({
        "name": "listed",
        "start": ["a"],
        "nodes": [
            {"id": "a", "callable": "x", "transitions": {"default": ["b"]}},
            {"id": "b", "callable": "y"}
        ]
    }))
    .unwrap();
    assert_eq!(listed.name(), "listed");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed.start(), ["a".to_string()]);

    let keyed = load(json!({
        "triggers": "a",
        "nodes": {
            "first": {"id": "a", "function": "x", "transitions": ["b"]},
            "second": {"id": "b", "executor": "docker", "image": "img"}
        }
    }))
    .unwrap();
    assert_eq!(keyed.name(), "flow");
    assert_eq!(keyed.get_node("a").unwrap().callable.as_deref(), Some("x"));
    assert_eq!(keyed.get_node("b").unwrap().executor, ExecutorKind::Container);
    assert_eq!(keyed.next_nodes("a", "whatever").unwrap(), vec!["b".to_string()]);
}

#[test]
fn test_duplicate_ids_are_rejected() {
    let err = load(json!({
        "start": ["a"],
        "nodes": [{"id": "a", "callable": "x"}, {"id": "a", "callable": "y"}]
    }))
    .unwrap_err();
    assert_eq!(err, WorkflowError::DuplicateNode("a".into()));
}

#[test]
fn test_start_ids_must_exist() {
    let err = load(json!({"start": ["ghost"], "nodes": [{"id": "a", "callable": "x"}]})).unwrap_err();
    assert_eq!(err, WorkflowError::UnknownStart("ghost".into()));

    let err = load(json!({"start": [], "nodes": [{"id": "a", "callable": "x"}]})).unwrap_err();
    assert_eq!(err, WorkflowError::NoStartNodes);
}

#[test]
fn test_successor_ids_must_exist() {
    let err = load(json!({
        "start": ["a"],
        "nodes": [{"id": "a", "callable": "x", "transitions": {"error": "ghost"}}]
    }))
    .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::UnknownSuccessor {
            node: "a".into(),
            successor: "ghost".into()
        }
    );
}

#[test]
fn test_malformed_nodes_are_rejected() {
    let missing_callable = load(json!({"start": ["a"], "nodes": [{"id": "a"}]}));
    assert!(matches!(missing_callable, Err(WorkflowError::Invalid(_))));

    let missing_image = load(json!({"start": ["a"], "nodes": [{"id": "a", "executor": "container"}]}));
    assert!(matches!(missing_image, Err(WorkflowError::Invalid(_))));

    let bad_timeout = load(json!({"start": ["a"], "nodes": [{"id": "a", "callable": "x", "timeout": 0}]}));
    assert!(matches!(bad_timeout, Err(WorkflowError::Invalid(_))));

    let huge_timeout = FlowGraph::builder("huge")
        .start("a")
        .node(NodeDefinition::inline("a", "x").with_timeout(1e30))
        .build();
    assert!(matches!(huge_timeout, Err(WorkflowError::Invalid(msg)) if msg.contains("out-of-range")));

    let not_a_flow = load(json!({"nodes": []}));
    assert!(matches!(not_a_flow, Err(WorkflowError::Invalid(_))));
}

#[test]
fn test_next_nodes_prefers_status_then_default() {
    let graph = FlowGraph::builder("routes")
        .start("a")
        .node(
            NodeDefinition::inline("a", "x")
                .on("even", ["b"])
                .on("even", ["c"])
                .otherwise(["c"]),
        )
        .node(NodeDefinition::inline("b", "x"))
        .node(NodeDefinition::inline("c", "x"))
        .build()
        .unwrap();

    assert_eq!(graph.next_nodes("a", "even").unwrap(), vec!["b", "c"]);
    assert_eq!(graph.next_nodes("a", "odd").unwrap(), vec!["c"]);
    // A node without transitions is terminal for every status.
    assert!(graph.next_nodes("b", "success").unwrap().is_empty());
    assert_eq!(
        graph.next_nodes("missing", "success").unwrap_err(),
        WorkflowError::NodeNotFound("missing".into())
    );
}

#[test]
fn test_unreachable_nodes_are_reported_not_rejected() {
    let graph = FlowGraph::builder("islands")
        .start("a")
        .node(NodeDefinition::inline("a", "x").on("error", ["b"]))
        .node(NodeDefinition::inline("b", "x"))
        .node(NodeDefinition::inline("island", "x").otherwise(["a"]))
        .build()
        .unwrap();

    assert_eq!(graph.unreachable_nodes(), vec!["island".to_string()]);
}

#[test]
fn test_global_state_participation_defaults() {
    let graph = load(json!({
        "start": ["a"],
        "nodes": [
            {"id": "a", "callable": "x", "transitions": ["b", "c", "d"]},
            {"id": "b", "executor": "process", "callable": "x"},
            {"id": "c", "executor": "container", "image": "img"},
            {"id": "d", "executor": "container", "image": "img", "withGlobalState": true}
        ]
    }))
    .unwrap();

    assert!(graph.get_node("a").unwrap().participates_in_global_state());
    assert!(graph.get_node("b").unwrap().participates_in_global_state());
    assert!(!graph.get_node("c").unwrap().participates_in_global_state());
    assert!(graph.get_node("d").unwrap().participates_in_global_state());
    assert!(graph.requires_process_pool());
}

#[test]
fn test_timeout_duration_conversion() {
    let node = NodeDefinition::inline("a", "x").with_timeout(0.25);
    assert_eq!(node.timeout_duration(), Some(std::time::Duration::from_millis(250)));
    assert_eq!(NodeDefinition::inline("a", "x").timeout_duration(), None);
}
