// crates/flowcore/tests/envelope_test.rs

use flowcore::{NodeInput, NodeOutput, STATUS_SUCCESS};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            // Bias keys toward the envelope's own field names.
            prop::collection::btree_map(
                prop_oneof![
                    Just("status".to_string()),
                    Just("data".to_string()),
                    Just("metadata".to_string()),
                    Just("predecessor".to_string()),
                    "[a-z]{1,6}",
                ],
                inner,
                0..5,
            )
            .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

proptest! {
    #[test]
    fn output_coercion_is_idempotent(value in arb_json()) {
        let once = NodeOutput::from_value(value);
        let twice = NodeOutput::from_value(once.to_primitive());
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn input_coercion_is_idempotent(value in arb_json()) {
        let once = NodeInput::from_value(value, None);
        let twice = NodeInput::from_value(once.to_primitive(), None);
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn scalars_become_successful_data(n in any::<i64>()) {
        let output = NodeOutput::from_value(json!(n));
        prop_assert_eq!(output.status.as_str(), STATUS_SUCCESS);
        prop_assert_eq!(output.data, json!(n));
        prop_assert!(output.metadata.is_empty());
    }
}

#[test]
fn test_output_promotes_to_input_with_predecessor() {
    let output = NodeOutput::new("odd", json!({"number": 3})).with_metadata("source", "test");
    let input = NodeInput::from_value(output, Some("branch"));

    assert_eq!(input.data, json!({"number": 3}));
    assert_eq!(input.metadata["source"], "test");
    assert_eq!(input.predecessor.as_deref(), Some("branch"));
}

#[test]
fn test_embedded_predecessor_is_kept_without_override() {
    let raw = json!({"data": 1, "metadata": {}, "predecessor": "upstream"});
    assert_eq!(
        NodeInput::from_value(raw.clone(), None).predecessor.as_deref(),
        Some("upstream")
    );
    assert_eq!(
        NodeInput::from_value(raw, Some("edge")).predecessor.as_deref(),
        Some("edge")
    );
}

#[test]
fn test_extra_output_keys_fold_into_metadata() {
    let output = NodeOutput::from_value(json!({
        "status": "done",
        "data": [1],
        "metadata": {"kept": true, "note": "explicit"},
        "note": "extra",
        "elapsed": 3
    }));

    assert_eq!(output.status, "done");
    assert_eq!(output.data, json!([1]));
    assert_eq!(output.metadata["note"], "explicit");
    assert_eq!(output.metadata["elapsed"], 3);
    assert_eq!(output.metadata["kept"], true);
}
