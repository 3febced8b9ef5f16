// runloop-core/tests/bus_bridge.rs
// ============================================================================
// Module: Event Bus and Decision Bridge Tests
// Description: Tests for middleware gating and bridged execution.
// ============================================================================
//! ## Overview
//! Validates the coordinator allow/deny gate, paired rejection events, and
//! the decision bridge: validated decisions execute through the run entry and
//! surface execution results; failures never create journal rows on their
//! own.

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
use std::sync::Mutex;

use async_trait::async_trait;
use runloop_core::AgentDecision;
use runloop_core::ConfirmationStore;
use runloop_core::CorrelationId;
use runloop_core::DagExecutionKernel;
use runloop_core::DecisionId;
use runloop_core::EdgeId;
use runloop_core::EntryLimits;
use runloop_core::EventBus;
use runloop_core::ExecutorRegistry;
use runloop_core::MemoryRunStore;
use runloop_core::MemoryToolStore;
use runloop_core::MemoryWorkflowStore;
use runloop_core::NodeId;
use runloop_core::PersistenceMode;
use runloop_core::ProjectId;
use runloop_core::Run;
use runloop_core::RunEventJournal;
use runloop_core::RunEventRecorder;
use runloop_core::RunExecutionEntry;
use runloop_core::RunId;
use runloop_core::RunRepository;
use runloop_core::Timestamp;
use runloop_core::WorkflowId;
use runloop_core::WorkflowRepository;
use runloop_core::WorkflowValidator;
use runloop_core::core::workflow::EdgeSpec;
use runloop_core::core::workflow::NodeSpec;
use runloop_core::core::workflow::NodeType;
use runloop_core::core::workflow::WorkflowSpec;
use runloop_core::runtime::CoordinatorMiddleware;
use runloop_core::runtime::DecisionBridge;
use runloop_core::runtime::DomainEvent;
use runloop_core::runtime::EventKind;
use runloop_core::runtime::EventSubscriber;
use runloop_core::runtime::NoopAuditSink;
use runloop_core::runtime::PassthroughExecutor;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Fixture
// ============================================================================

/// Subscriber capturing every delivered event kind.
#[derive(Default)]
struct Recorder {
    /// Captured events.
    events: Mutex<Vec<DomainEvent>>,
}

#[async_trait]
impl EventSubscriber for Recorder {
    fn interests(&self) -> Vec<EventKind> {
        vec![
            EventKind::DecisionValidated,
            EventKind::DecisionRejected,
            EventKind::ExecutionResult,
        ]
    }

    async fn handle(&self, event: &DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Bus fixture with an entry wired through the bridge.
struct Fixture {
    /// Run repository and journal.
    store: MemoryRunStore,
    /// Event bus under test.
    bus: Arc<EventBus>,
    /// Captured deliveries.
    recorder: Arc<Recorder>,
}

/// Builds the fixture with a start -> end workflow and one seeded run.
fn fixture(denied_types: BTreeSet<String>) -> Fixture {
    let workflow = WorkflowSpec {
        workflow_id: WorkflowId::new("wf-1"),
        project_id: ProjectId::new("proj-1"),
        name: "bridge".to_string(),
        description: None,
        nodes: vec![
            NodeSpec { node_id: NodeId::new("start"), node_type: NodeType::Start, config: Map::new() },
            NodeSpec { node_id: NodeId::new("end"), node_type: NodeType::End, config: Map::new() },
        ],
        edges: vec![EdgeSpec {
            edge_id: EdgeId::new("e1"),
            source_node_id: NodeId::new("start"),
            target_node_id: NodeId::new("end"),
        }],
    };

    let store = MemoryRunStore::new();
    let workflows = Arc::new(MemoryWorkflowStore::new());
    workflows.save(&workflow).unwrap();
    let tools = Arc::new(MemoryToolStore::new());

    let mut executors = ExecutorRegistry::new();
    executors.register(NodeType::Start, Arc::new(PassthroughExecutor));
    executors.register(NodeType::End, Arc::new(PassthroughExecutor));

    let validator = Arc::new(WorkflowValidator::new(
        executors.available_types(),
        Arc::clone(&tools) as Arc<dyn runloop_core::ToolRepository>,
    ));
    let recorder = Arc::new(RunEventRecorder::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));
    let kernel = Arc::new(DagExecutionKernel::new(
        Arc::clone(&workflows) as Arc<dyn WorkflowRepository>,
        executors,
        None,
    ));
    let entry = Arc::new(RunExecutionEntry::new(
        Arc::clone(&workflows) as Arc<dyn WorkflowRepository>,
        Arc::new(store.clone()),
        validator,
        recorder,
        kernel,
        Arc::new(ConfirmationStore::new()),
        Arc::clone(&tools) as Arc<dyn runloop_core::ToolRepository>,
        Arc::new(NoopAuditSink),
        "bridge_executor",
        EntryLimits::default(),
        PersistenceMode::Deterministic,
    ));

    let bus = Arc::new(EventBus::new());
    bus.add_middleware(Arc::new(CoordinatorMiddleware::new(denied_types)));
    let bridge = DecisionBridge::new(
        entry,
        BTreeSet::from(["execute_workflow".to_string()]),
        &bus,
    );
    bus.subscribe(Arc::new(bridge));
    let event_recorder = Arc::new(Recorder::default());
    bus.subscribe(Arc::clone(&event_recorder) as Arc<dyn EventSubscriber>);

    Fixture { store, bus, recorder: event_recorder }
}

/// Seeds a created run for the fixture workflow.
fn seed_run(fx: &Fixture, run_id: &str) -> RunId {
    let run = Run::new_workflow_run(
        RunId::new(run_id),
        ProjectId::new("proj-1"),
        WorkflowId::new("wf-1"),
        Timestamp::now(),
    )
    .unwrap();
    fx.store.save(&run).unwrap();
    run.run_id
}

/// Builds an execute_workflow decision for the given run.
fn decision(run_id: &str) -> AgentDecision {
    let mut payload = Map::new();
    payload.insert("workflow_id".to_string(), Value::from("wf-1"));
    payload.insert("run_id".to_string(), Value::from(run_id));
    AgentDecision {
        decision_type: "execute_workflow".to_string(),
        decision_id: DecisionId::new("dec-1"),
        correlation_id: CorrelationId::new("corr-1"),
        payload,
    }
}

// ============================================================================
// SECTION: Coordinator Gate
// ============================================================================

/// Tests the allow path: validated decision executes through the entry.
#[tokio::test]
async fn test_validated_decision_executes_run() {
    let fx = fixture(BTreeSet::new());
    let run_id = seed_run(&fx, "run-1");

    fx.bus.publish(DomainEvent::DecisionMade(decision("run-1"))).await;

    let events = fx.recorder.events.lock().unwrap().clone();
    assert!(events.iter().any(|event| matches!(event, DomainEvent::DecisionValidated(_))));
    let result = events
        .iter()
        .find_map(|event| match event {
            DomainEvent::ExecutionResult(result) => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(result.status, "completed");
    assert_eq!(result.correlation_id, "corr-1");
    assert_eq!(result.run_id.as_ref().map(RunId::as_str), Some("run-1"));

    // The run actually executed: journal has the terminal event.
    let lifecycle = fx
        .store
        .list(&run_id, Some(runloop_core::EventChannel::Lifecycle), None, 100)
        .unwrap()
        .events;
    assert_eq!(lifecycle.last().unwrap().event_type, "workflow_complete");
}

/// Tests the deny path: blocked decisions emit a paired rejection and
/// never reach the bridge.
#[tokio::test]
async fn test_denied_decision_is_blocked() {
    let fx = fixture(BTreeSet::from(["execute_workflow".to_string()]));
    let run_id = seed_run(&fx, "run-1");

    fx.bus.publish(DomainEvent::DecisionMade(decision("run-1"))).await;

    let events = fx.recorder.events.lock().unwrap().clone();
    assert!(events.iter().all(|event| !matches!(event, DomainEvent::DecisionValidated(_))));
    let rejected = events
        .iter()
        .find_map(|event| match event {
            DomainEvent::DecisionRejected { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(rejected, "decision_type_denied");

    // No journal rows: the run was never touched.
    assert!(fx.store.list_all(&run_id).unwrap().is_empty());
}

/// Tests that malformed decisions are rejected by validation.
#[tokio::test]
async fn test_malformed_decision_is_rejected() {
    let fx = fixture(BTreeSet::new());
    let mut bad = decision("run-1");
    bad.decision_type = "  ".to_string();

    fx.bus.publish(DomainEvent::DecisionMade(bad)).await;

    let events = fx.recorder.events.lock().unwrap().clone();
    assert!(events.iter().any(|event| matches!(event, DomainEvent::DecisionRejected { .. })));
}

// ============================================================================
// SECTION: Bridge Failure Paths
// ============================================================================

/// Tests that a bridged failure surfaces as a failed execution result and
/// creates no journal rows before the claim.
#[tokio::test]
async fn test_bridge_failure_creates_no_rows() {
    let fx = fixture(BTreeSet::new());
    // The run does not exist: prepare rejects before any side effects.
    fx.bus.publish(DomainEvent::DecisionMade(decision("run-ghost"))).await;

    let events = fx.recorder.events.lock().unwrap().clone();
    let result = events
        .iter()
        .find_map(|event| match event {
            DomainEvent::ExecutionResult(result) => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(result.status, "failed");
    assert!(fx.store.list_all(&RunId::new("run-ghost")).unwrap().is_empty());
}

/// Tests that non-actionable validated decisions are ignored by the bridge.
#[tokio::test]
async fn test_non_actionable_decision_is_ignored() {
    let fx = fixture(BTreeSet::new());
    seed_run(&fx, "run-1");

    let mut other = decision("run-1");
    other.decision_type = "summarize_chat".to_string();
    fx.bus.publish(DomainEvent::DecisionMade(other)).await;

    let events = fx.recorder.events.lock().unwrap().clone();
    assert!(events.iter().any(|event| matches!(event, DomainEvent::DecisionValidated(_))));
    assert!(events.iter().all(|event| !matches!(event, DomainEvent::ExecutionResult(_))));
}
