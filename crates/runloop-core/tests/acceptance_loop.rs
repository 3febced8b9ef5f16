// runloop-core/tests/acceptance_loop.rs
// ============================================================================
// Module: Acceptance Loop Tests
// Description: Tests for terminal-run reflection and idempotent artifacts.
// ============================================================================
//! ## Overview
//! Validates the reflection pipeline over in-memory stores: lifecycle
//! artifacts with deterministic idempotency keys, repeat-call idempotence,
//! the at-most-once REPLAN signal, and the defensive non-terminal branch.

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

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use runloop_core::AcceptanceEvaluator;
use runloop_core::AcceptanceLoop;
use runloop_core::AcceptanceRequest;
use runloop_core::AcceptanceVerdict;
use runloop_core::AppendEvent;
use runloop_core::EventBus;
use runloop_core::EventChannel;
use runloop_core::MemoryRunStore;
use runloop_core::MemoryWorkflowStore;
use runloop_core::ProjectId;
use runloop_core::Run;
use runloop_core::RunEventJournal;
use runloop_core::RunEventRecorder;
use runloop_core::RunId;
use runloop_core::RunRepository;
use runloop_core::RunStatus;
use runloop_core::Timestamp;
use runloop_core::WorkflowId;
use runloop_core::WorkflowRepository;
use runloop_core::core::workflow::WorkflowSpec;
use runloop_core::runtime::DomainEvent;
use runloop_core::runtime::EventKind;
use runloop_core::runtime::EventSubscriber;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Fixture
// ============================================================================

/// Subscriber counting replan signals.
#[derive(Default)]
struct ReplanCounter {
    /// Observed adjustment events.
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl EventSubscriber for ReplanCounter {
    fn interests(&self) -> Vec<EventKind> {
        vec![EventKind::WorkflowAdjustmentRequested]
    }

    async fn handle(&self, event: &DomainEvent) {
        if let DomainEvent::WorkflowAdjustmentRequested(adjustment) = event {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(adjustment.reflection_id.clone());
            }
        }
    }
}

/// Acceptance fixture over in-memory stores.
struct Fixture {
    /// Run repository and journal.
    store: MemoryRunStore,
    /// Acceptance orchestrator.
    acceptance: AcceptanceLoop,
    /// Replan observer.
    replans: Arc<ReplanCounter>,
}

/// Builds the fixture with an empty workflow description.
fn fixture() -> Fixture {
    let store = MemoryRunStore::new();
    let workflows = Arc::new(MemoryWorkflowStore::new());
    workflows
        .save(&WorkflowSpec {
            workflow_id: WorkflowId::new("wf-1"),
            project_id: ProjectId::new("proj-1"),
            name: "fixture".to_string(),
            description: Some("export the data".to_string()),
            nodes: Vec::new(),
            edges: Vec::new(),
        })
        .unwrap();

    let recorder = Arc::new(RunEventRecorder::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));
    let bus = Arc::new(EventBus::new());
    let replans = Arc::new(ReplanCounter::default());
    bus.subscribe(Arc::clone(&replans) as Arc<dyn EventSubscriber>);

    let acceptance = AcceptanceLoop::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        workflows as Arc<dyn WorkflowRepository>,
        recorder,
        AcceptanceEvaluator::default(),
        Some(bus),
    );
    Fixture { store, acceptance, replans }
}

/// Seeds a run with the given terminal journal shape.
fn seed_terminal_run(fx: &Fixture, run_id: &str, terminal: Option<&str>) -> RunId {
    let run = Run::new_workflow_run(
        RunId::new(run_id),
        ProjectId::new("proj-1"),
        WorkflowId::new("wf-1"),
        Timestamp::now(),
    )
    .unwrap();
    fx.store.save(&run).unwrap();
    fx.store
        .update_status_if_current(&run.run_id, RunStatus::Created, RunStatus::Running, None)
        .unwrap();

    let append = |event_type: &str| {
        fx.store
            .append(AppendEvent {
                run_id: run.run_id.clone(),
                channel: EventChannel::Execution,
                event_type: event_type.to_string(),
                payload: Map::new(),
                created_at: Timestamp::now(),
                idempotency_key: None,
            })
            .unwrap();
    };
    append("node_start");
    if let Some(terminal) = terminal {
        append(terminal);
        let target = if terminal == "workflow_complete" {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        fx.store
            .update_status_if_current(&run.run_id, RunStatus::Running, target, None)
            .unwrap();
    }
    run.run_id
}

/// Returns lifecycle event types for a run.
fn lifecycle_types(fx: &Fixture, run_id: &RunId) -> Vec<String> {
    fx.store
        .list(run_id, Some(EventChannel::Lifecycle), None, 100)
        .unwrap()
        .events
        .into_iter()
        .map(|event| event.event_type)
        .collect()
}

// ============================================================================
// SECTION: Verdicts
// ============================================================================

/// Tests the green path: PASS with the full artifact chain persisted.
#[tokio::test]
async fn test_pass_persists_artifact_chain() {
    let fx = fixture();
    let run_id = seed_terminal_run(&fx, "run-1", Some("workflow_complete"));

    let request = AcceptanceRequest::new(WorkflowId::new("wf-1"), run_id.clone());
    let result = fx.acceptance.on_run_terminal(&request).await.unwrap();

    assert_eq!(result.verdict, AcceptanceVerdict::Pass);
    assert!(result.test_report_ref.is_some());

    let types = lifecycle_types(&fx, &run_id);
    assert!(types.contains(&"workflow_test_report".to_string()));
    assert!(types.contains(&"workflow_execution_completed".to_string()));
    assert!(types.contains(&"workflow_reflection_requested".to_string()));
    assert!(types.contains(&"workflow_reflection_completed".to_string()));
    assert!(!types.contains(&"workflow_adjustment_requested".to_string()));

    // Ordering: completed -> requested -> reflected.
    let position = |name: &str| types.iter().position(|event| event == name).unwrap();
    assert!(position("workflow_execution_completed") < position("workflow_reflection_requested"));
    assert!(position("workflow_reflection_requested") < position("workflow_reflection_completed"));

    // The reflection row embeds the verdict.
    let reflected = fx
        .store
        .list_by_type(&run_id, EventChannel::Lifecycle, "workflow_reflection_completed")
        .unwrap();
    assert_eq!(reflected.len(), 1);
    assert_eq!(
        reflected[0].payload.get("verdict").and_then(Value::as_str),
        Some("PASS")
    );
}

/// Tests REPLAN on a failed run with exactly one published signal.
#[tokio::test]
async fn test_replan_publishes_once() {
    let fx = fixture();
    let run_id = seed_terminal_run(&fx, "run-1", Some("workflow_error"));

    let request = AcceptanceRequest::new(WorkflowId::new("wf-1"), run_id.clone());
    let result = fx.acceptance.on_run_terminal(&request).await.unwrap();
    assert_eq!(result.verdict, AcceptanceVerdict::Replan);
    assert!(!result.replan_constraints.is_empty());

    let adjustments = fx
        .store
        .list_by_type(&run_id, EventChannel::Lifecycle, "workflow_adjustment_requested")
        .unwrap();
    assert_eq!(adjustments.len(), 1);
    assert_eq!(fx.replans.seen.lock().unwrap().len(), 1);

    // Re-running the same reflection re-evaluates without re-publishing.
    let repeat = fx.acceptance.on_run_terminal(&request).await.unwrap();
    assert_eq!(repeat.verdict, AcceptanceVerdict::Replan);
    assert_eq!(fx.replans.seen.lock().unwrap().len(), 1);
}

/// Tests that repeated calls stay idempotent at the row level.
#[tokio::test]
async fn test_reflection_is_idempotent() {
    let fx = fixture();
    let run_id = seed_terminal_run(&fx, "run-1", Some("workflow_complete"));

    let request = AcceptanceRequest::new(WorkflowId::new("wf-1"), run_id.clone());
    for _ in 0..3 {
        let result = fx.acceptance.on_run_terminal(&request).await.unwrap();
        assert_eq!(result.verdict, AcceptanceVerdict::Pass);
    }

    for event_type in [
        "workflow_execution_completed",
        "workflow_test_report",
        "workflow_reflection_requested",
        "workflow_reflection_completed",
    ] {
        let rows = fx.store.list_by_type(&run_id, EventChannel::Lifecycle, event_type).unwrap();
        assert_eq!(rows.len(), 1, "{event_type} must persist exactly once");
    }
}

/// Tests the defensive branch: non-terminal runs block with no writes.
#[tokio::test]
async fn test_non_terminal_run_blocks_without_side_effects() {
    let fx = fixture();
    let run_id = seed_terminal_run(&fx, "run-1", None);

    let request = AcceptanceRequest::new(WorkflowId::new("wf-1"), run_id.clone());
    let result = fx.acceptance.on_run_terminal(&request).await.unwrap();

    assert_eq!(result.verdict, AcceptanceVerdict::Blocked);
    assert_eq!(result.blocked_reason.as_deref(), Some("run_not_terminal"));
    assert!(lifecycle_types(&fx, &run_id).is_empty());
    assert!(fx.replans.seen.lock().unwrap().is_empty());
}

/// Tests the failed test report on a denied-confirmation run.
#[tokio::test]
async fn test_test_report_checks_confirmation() {
    let fx = fixture();
    let run = Run::new_workflow_run(
        RunId::new("run-1"),
        ProjectId::new("proj-1"),
        WorkflowId::new("wf-1"),
        Timestamp::now(),
    )
    .unwrap();
    fx.store.save(&run).unwrap();
    fx.store
        .update_status_if_current(&run.run_id, RunStatus::Created, RunStatus::Running, None)
        .unwrap();

    let mut confirm_payload = Map::new();
    confirm_payload.insert("decision".to_string(), Value::from("deny"));
    for (event_type, payload) in [
        ("workflow_confirm_required", Map::new()),
        ("workflow_confirmed", confirm_payload),
        ("workflow_error", Map::new()),
    ] {
        fx.store
            .append(AppendEvent {
                run_id: run.run_id.clone(),
                channel: EventChannel::Execution,
                event_type: event_type.to_string(),
                payload,
                created_at: Timestamp::now(),
                idempotency_key: None,
            })
            .unwrap();
    }
    fx.store
        .update_status_if_current(&run.run_id, RunStatus::Running, RunStatus::Failed, None)
        .unwrap();

    let request = AcceptanceRequest::new(WorkflowId::new("wf-1"), run.run_id.clone());
    let result = fx.acceptance.on_run_terminal(&request).await.unwrap();
    assert_ne!(result.verdict, AcceptanceVerdict::Pass);

    let reports = fx
        .store
        .list_by_type(&run.run_id, EventChannel::Lifecycle, "workflow_test_report")
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].payload.get("status").and_then(Value::as_str), Some("failed"));
    let checks = reports[0].payload.get("checks").and_then(Value::as_array).unwrap();
    assert_eq!(checks.len(), 2);
}
