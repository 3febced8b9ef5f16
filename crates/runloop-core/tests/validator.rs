// runloop-core/tests/validator.rs
// ============================================================================
// Module: Workflow Validator Tests
// Description: Tests for fail-closed DAG and contract validation.
// ============================================================================
//! ## Overview
//! Validates graph checks (start, end reachability, cycles), executor
//! availability, tool rules, and the data-driven configuration contracts.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeSet;
use std::sync::Arc;

use runloop_core::EdgeId;
use runloop_core::MemoryToolStore;
use runloop_core::NodeId;
use runloop_core::ProjectId;
use runloop_core::ToolId;
use runloop_core::ToolRecord;
use runloop_core::ToolStatus;
use runloop_core::WorkflowId;
use runloop_core::WorkflowValidator;
use runloop_core::core::workflow::EdgeSpec;
use runloop_core::core::workflow::NodeSpec;
use runloop_core::core::workflow::NodeType;
use runloop_core::core::workflow::WorkflowSpec;
use serde_json::Map;
use serde_json::Value;

/// Builds a validator with every node type executable and one published tool.
fn validator() -> WorkflowValidator {
    let tools = MemoryToolStore::new();
    tools
        .register(ToolRecord {
            tool_id: ToolId::new("tool-ok"),
            name: "ok".to_string(),
            status: ToolStatus::Published,
        })
        .unwrap();
    tools
        .register(ToolRecord {
            tool_id: ToolId::new("tool-old"),
            name: "old".to_string(),
            status: ToolStatus::Deprecated,
        })
        .unwrap();

    let executors: BTreeSet<NodeType> = [
        NodeType::Start,
        NodeType::End,
        NodeType::Tool,
        NodeType::HttpRequest,
        NodeType::Database,
        NodeType::File,
        NodeType::Notification,
        NodeType::TextModel,
        NodeType::Condition,
    ]
    .into_iter()
    .collect();
    WorkflowValidator::new(executors, Arc::new(tools))
}

/// Builds a node with config key/value string pairs.
fn node(id: &str, node_type: NodeType, config: &[(&str, &str)]) -> NodeSpec {
    let mut map = Map::new();
    for (key, value) in config {
        map.insert((*key).to_string(), Value::from(*value));
    }
    NodeSpec { node_id: NodeId::new(id), node_type, config: map }
}

/// Builds an edge between two nodes.
fn edge(id: &str, source: &str, target: &str) -> EdgeSpec {
    EdgeSpec {
        edge_id: EdgeId::new(id),
        source_node_id: NodeId::new(source),
        target_node_id: NodeId::new(target),
    }
}

/// Builds a workflow around the given nodes and edges.
fn workflow(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>) -> WorkflowSpec {
    WorkflowSpec {
        workflow_id: WorkflowId::new("wf-1"),
        project_id: ProjectId::new("proj-1"),
        name: "fixture".to_string(),
        description: None,
        nodes,
        edges,
    }
}

// ============================================================================
// SECTION: Graph Checks
// ============================================================================

/// Tests that a minimal start -> end workflow validates.
#[test]
fn test_minimal_workflow_validates() {
    let spec = workflow(
        vec![node("start", NodeType::Start, &[]), node("end", NodeType::End, &[])],
        vec![edge("e1", "start", "end")],
    );
    assert!(validator().validate_for_execution(&spec).is_ok());
}

/// Tests rejection when no start node exists.
#[test]
fn test_missing_start_rejected() {
    let spec = workflow(vec![node("end", NodeType::End, &[])], vec![]);
    let error = validator().validate_for_execution(&spec).unwrap_err();
    assert_eq!(error.code(), "workflow_missing_start");
}

/// Tests rejection when no end is reachable from start.
#[test]
fn test_unreachable_end_rejected() {
    let spec = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("island", NodeType::End, &[]),
        ],
        vec![],
    );
    let error = validator().validate_for_execution(&spec).unwrap_err();
    assert_eq!(error.code(), "workflow_missing_end_path");
}

/// Tests rejection of a cycle on the main subgraph.
#[test]
fn test_cycle_rejected() {
    let spec = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("a", NodeType::Condition, &[("expression", "x")]),
            node("b", NodeType::Condition, &[("expression", "y")]),
            node("end", NodeType::End, &[]),
        ],
        vec![
            edge("e1", "start", "a"),
            edge("e2", "a", "b"),
            edge("e3", "b", "a"),
            edge("e4", "a", "end"),
        ],
    );
    let error = validator().validate_for_execution(&spec).unwrap_err();
    assert_eq!(error.code(), "workflow_cycle_detected");
}

/// Tests that nodes outside the main subgraph escape validation.
#[test]
fn test_off_subgraph_nodes_are_ignored() {
    let spec = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("end", NodeType::End, &[]),
            // Disconnected and invalid, but not on the main subgraph.
            node("orphan", NodeType::HttpRequest, &[]),
        ],
        vec![edge("e1", "start", "end")],
    );
    assert!(validator().validate_for_execution(&spec).is_ok());
}

/// Tests rejection when an executor is missing for a node type.
#[test]
fn test_executor_unavailable_rejected() {
    let tools = MemoryToolStore::new();
    let narrow = WorkflowValidator::new(
        [NodeType::Start, NodeType::End].into_iter().collect(),
        Arc::new(tools),
    );
    let spec = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("cond", NodeType::Condition, &[("expression", "x")]),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "cond"), edge("e2", "cond", "end")],
    );
    let error = narrow.validate_for_execution(&spec).unwrap_err();
    assert_eq!(error.code(), "executor_unavailable");
}

// ============================================================================
// SECTION: Contract Checks
// ============================================================================

/// Tests the required-field rule on http nodes.
#[test]
fn test_http_requires_url() {
    let spec = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("http", NodeType::HttpRequest, &[]),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "http"), edge("e2", "http", "end")],
    );
    let error = validator().validate_for_execution(&spec).unwrap_err();
    assert_eq!(error.code(), "http_url_required");
}

/// Tests the enum rule on http methods.
#[test]
fn test_http_method_enum() {
    let spec = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("http", NodeType::HttpRequest, &[("url", "https://x"), ("method", "FETCH")]),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "http"), edge("e2", "http", "end")],
    );
    let error = validator().validate_for_execution(&spec).unwrap_err();
    assert_eq!(error.code(), "http_method_invalid");
}

/// Tests the conditional-required rule: POST requires a body.
#[test]
fn test_http_post_requires_body() {
    let spec = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("http", NodeType::HttpRequest, &[("url", "https://x"), ("method", "POST")]),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "http"), edge("e2", "http", "end")],
    );
    let error = validator().validate_for_execution(&spec).unwrap_err();
    assert_eq!(error.code(), "http_body_required");

    let ok = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node(
                "http",
                NodeType::HttpRequest,
                &[("url", "https://x"), ("method", "POST"), ("body", "{}")],
            ),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "http"), edge("e2", "http", "end")],
    );
    assert!(validator().validate_for_execution(&ok).is_ok());
}

/// Tests the database URL prefix rule.
#[test]
fn test_database_url_prefix() {
    let spec = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node(
                "db",
                NodeType::Database,
                &[("statement", "SELECT 1"), ("database_url", "postgres://x")],
            ),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "db"), edge("e2", "db", "end")],
    );
    let error = validator().validate_for_execution(&spec).unwrap_err();
    assert_eq!(error.code(), "database_url_unsupported");
}

/// Tests tool existence and deprecation rules.
#[test]
fn test_tool_rules() {
    let missing = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("tool", NodeType::Tool, &[("tool_id", "nope")]),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "tool"), edge("e2", "tool", "end")],
    );
    assert_eq!(validator().validate_for_execution(&missing).unwrap_err().code(), "tool_not_found");

    let deprecated = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("tool", NodeType::Tool, &[("tool_id", "tool-old")]),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "tool"), edge("e2", "tool", "end")],
    );
    assert_eq!(
        validator().validate_for_execution(&deprecated).unwrap_err().code(),
        "tool_deprecated"
    );

    let published = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("tool", NodeType::Tool, &[("tool_id", "tool-ok")]),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "tool"), edge("e2", "tool", "end")],
    );
    assert!(validator().validate_for_execution(&published).is_ok());
}

/// Tests the model-provider allowlist on prefixed model names.
#[test]
fn test_model_provider_allowlist() {
    let denied = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node(
                "llm",
                NodeType::TextModel,
                &[("prompt", "hello"), ("model", "mistral/mixtral")],
            ),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "llm"), edge("e2", "llm", "end")],
    );
    assert_eq!(
        validator().validate_for_execution(&denied).unwrap_err().code(),
        "model_provider_unsupported"
    );

    let allowed = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node(
                "llm",
                NodeType::TextModel,
                &[("prompt", "hello"), ("model", "openai/gpt-4o-mini")],
            ),
            node("end", NodeType::End, &[]),
        ],
        vec![edge("e1", "start", "llm"), edge("e2", "llm", "end")],
    );
    assert!(validator().validate_for_execution(&allowed).is_ok());
}

/// Tests that side-effect detection follows topological order.
#[test]
fn test_first_side_effect_node() {
    let spec = workflow(
        vec![
            node("start", NodeType::Start, &[]),
            node("cond", NodeType::Condition, &[("expression", "x")]),
            node("notify", NodeType::Notification, &[("channel", "ops")]),
            node("end", NodeType::End, &[]),
        ],
        vec![
            edge("e1", "start", "cond"),
            edge("e2", "cond", "notify"),
            edge("e3", "notify", "end"),
        ],
    );
    assert_eq!(spec.first_side_effect_node(), Some(NodeId::new("notify")));

    let pure = workflow(
        vec![node("start", NodeType::Start, &[]), node("end", NodeType::End, &[])],
        vec![edge("e1", "start", "end")],
    );
    assert!(pure.first_side_effect_node().is_none());
}
