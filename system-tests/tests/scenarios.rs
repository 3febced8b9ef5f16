// system-tests/tests/scenarios.rs
// ============================================================================
// Module: End-to-End Scenarios
// Description: Full-surface scenarios over a live HTTP server.
// ============================================================================
//! ## Overview
//! Drives the acceptance pipeline over a real listener: streaming execution,
//! confirmation gating, duplicate suppression, side-effect-free rejections,
//! replay consistency, idempotent creation, and the reflection verdicts.

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

mod helpers;

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use helpers::SseReader;
use helpers::event_types;
use helpers::seed_cyclic_workflow;
use helpers::seed_linear_workflow;
use helpers::seed_notify_workflow;
use helpers::spawn_server;
use runloop_core::AcceptanceRequest;
use runloop_core::AcceptanceVerdict;
use runloop_core::AgentDecision;
use runloop_core::CorrelationId;
use runloop_core::DecisionId;
use runloop_core::EventChannel;
use runloop_core::RunId;
use runloop_core::WorkflowId;
use runloop_core::runtime::DomainEvent;
use runloop_core::runtime::EventKind;
use runloop_core::runtime::EventSubscriber;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: S1 Happy PASS
// ============================================================================

/// S1: streams a pure workflow to completion and the reflection passes.
#[tokio::test]
async fn test_s1_happy_pass() {
    let server = spawn_server().await;
    seed_linear_workflow(&server.state, "wf-s1");
    let run_id = server.create_run("proj-1", "wf-s1").await;

    let response = server
        .client
        .post(server.url("/api/workflows/wf-s1/execute/stream"))
        .json(&json!({"run_id": run_id}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let events = SseReader::new(response).drain().await;
    let types = event_types(&events);
    assert!(types.contains(&"node_start".to_string()));
    assert_eq!(types.last().map(String::as_str), Some("workflow_complete"));

    // Lifecycle channel carries start + terminal.
    let replay: Value = server
        .client
        .get(server.url(&format!("/api/runs/{run_id}/events?channel=lifecycle")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let lifecycle = event_types(replay.get("events").and_then(Value::as_array).unwrap());
    assert_eq!(lifecycle, ["workflow_start", "workflow_complete"]);

    // Reflection: PASS persisted on the lifecycle channel.
    let request =
        AcceptanceRequest::new(WorkflowId::new("wf-s1"), RunId::new(run_id.clone()));
    let verdict = server.state.acceptance.on_run_terminal(&request).await.unwrap();
    assert_eq!(verdict.verdict, AcceptanceVerdict::Pass);

    let reflected = server
        .state
        .journal
        .list_by_type(
            &RunId::new(run_id),
            EventChannel::Lifecycle,
            "workflow_reflection_completed",
        )
        .unwrap();
    assert_eq!(reflected.len(), 1);
    assert_eq!(reflected[0].payload.get("verdict").and_then(Value::as_str), Some("PASS"));
}

// ============================================================================
// SECTION: S2 REPLAN Then PASS With Confirmation
// ============================================================================

/// Streams a side-effect workflow, answering the confirmation mid-stream.
async fn run_with_confirmation(
    server: &helpers::TestServer,
    workflow_id: &str,
    run_id: &str,
    decision: &str,
) -> (Vec<Value>, String) {
    let response = server
        .client
        .post(server.url(&format!("/api/workflows/{workflow_id}/execute/stream")))
        .json(&json!({"run_id": run_id}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let mut reader = SseReader::new(response);
    let mut events = Vec::new();
    let mut confirm_id = String::new();
    while let Some(event) = reader.next_event().await {
        if event.get("type").and_then(Value::as_str) == Some("workflow_confirm_required") {
            confirm_id =
                event.get("confirm_id").and_then(Value::as_str).unwrap().to_string();
            let confirm = server
                .client
                .post(server.url(&format!("/api/runs/{run_id}/confirm")))
                .json(&json!({"confirm_id": confirm_id, "decision": decision}))
                .send()
                .await
                .unwrap();
            assert!(confirm.status().is_success());
        }
        events.push(event);
    }
    (events, confirm_id)
}

/// S2: denial fails the first run, acceptance replans once, and a fresh run
/// with a fresh confirmation id passes.
#[tokio::test]
async fn test_s2_replan_then_pass_with_confirmation() {
    let server = spawn_server().await;
    seed_notify_workflow(&server.state, "wf-s2");

    // Run 1: deny the side effect.
    let first_run = server.create_run("proj-1", "wf-s2").await;
    let (first_events, first_confirm) =
        run_with_confirmation(&server, "wf-s2", &first_run, "deny").await;
    let first_types = event_types(&first_events);
    assert_eq!(first_types.last().map(String::as_str), Some("workflow_error"));
    let terminal = first_events.last().unwrap();
    assert_eq!(terminal.get("error").and_then(Value::as_str), Some("side_effect_confirm_denied"));
    assert_eq!(terminal.get("reason").and_then(Value::as_str), Some("user_denied"));

    let request =
        AcceptanceRequest::new(WorkflowId::new("wf-s2"), RunId::new(first_run.clone()));
    let verdict = server.state.acceptance.on_run_terminal(&request).await.unwrap();
    assert_eq!(verdict.verdict, AcceptanceVerdict::Replan);

    let adjustments = server
        .state
        .journal
        .list_by_type(
            &RunId::new(first_run),
            EventChannel::Lifecycle,
            "workflow_adjustment_requested",
        )
        .unwrap();
    assert_eq!(adjustments.len(), 1);

    // Run 2: fresh run, fresh confirm id, allowed side effect.
    let second_run = server.create_run("proj-1", "wf-s2").await;
    let (second_events, second_confirm) =
        run_with_confirmation(&server, "wf-s2", &second_run, "allow").await;
    assert_ne!(first_confirm, second_confirm);
    assert_eq!(
        event_types(&second_events).last().map(String::as_str),
        Some("workflow_complete")
    );

    let mut second_request =
        AcceptanceRequest::new(WorkflowId::new("wf-s2"), RunId::new(second_run));
    second_request.attempt = 2;
    let verdict = server.state.acceptance.on_run_terminal(&second_request).await.unwrap();
    assert_eq!(verdict.verdict, AcceptanceVerdict::Pass);
}

// ============================================================================
// SECTION: S3 NEED_USER On Conflict
// ============================================================================

/// S3: contradictory criteria surface a conflict question.
#[tokio::test]
async fn test_s3_need_user_on_conflict() {
    let server = spawn_server().await;
    seed_linear_workflow(&server.state, "wf-s3");
    let run_id = server.create_run("proj-1", "wf-s3").await;

    let response = server
        .client
        .post(server.url("/api/workflows/wf-s3/execute/stream"))
        .json(&json!({"run_id": run_id}))
        .send()
        .await
        .unwrap();
    SseReader::new(response).drain().await;

    let mut request =
        AcceptanceRequest::new(WorkflowId::new("wf-s3"), RunId::new(run_id));
    request.user_criteria =
        vec!["必须写入数据库".to_string(), "禁止写入数据库".to_string()];
    let verdict = server.state.acceptance.on_run_terminal(&request).await.unwrap();

    assert_eq!(verdict.verdict, AcceptanceVerdict::NeedUser);
    assert!(!verdict.user_questions.is_empty());
    assert!(verdict.user_questions[0].starts_with("These criteria conflict"));
}

// ============================================================================
// SECTION: S4 BLOCKED At Attempt Cap
// ============================================================================

/// S4: the third failed attempt blocks with the stable reason.
#[tokio::test]
async fn test_s4_blocked_at_attempt_cap() {
    let server = spawn_server().await;
    seed_notify_workflow(&server.state, "wf-s4");

    // Three denied runs; evaluate the last at the attempt cap.
    let mut last_run = String::new();
    for _ in 0..3 {
        let run_id = server.create_run("proj-1", "wf-s4").await;
        run_with_confirmation(&server, "wf-s4", &run_id, "deny").await;
        last_run = run_id;
    }

    let mut request =
        AcceptanceRequest::new(WorkflowId::new("wf-s4"), RunId::new(last_run));
    request.attempt = 3;
    let verdict = server.state.acceptance.on_run_terminal(&request).await.unwrap();
    assert_eq!(verdict.verdict, AcceptanceVerdict::Blocked);
    assert_eq!(verdict.blocked_reason.as_deref(), Some("max_replan_attempts_reached"));
}

// ============================================================================
// SECTION: S5 Duplicate Execution Dropped
// ============================================================================

/// S5: exactly one of two concurrent streams claims the run.
#[tokio::test]
async fn test_s5_duplicate_execution_dropped() {
    let server = spawn_server().await;
    seed_linear_workflow(&server.state, "wf-s5");
    let run_id = server.create_run("proj-1", "wf-s5").await;

    let body = json!({"run_id": run_id});
    let first = server
        .client
        .post(server.url("/api/workflows/wf-s5/execute/stream"))
        .json(&body);
    let second = server
        .client
        .post(server.url("/api/workflows/wf-s5/execute/stream"))
        .json(&body);
    let (first, second) = tokio::join!(first.send(), second.send());
    let (first, second) = (first.unwrap(), second.unwrap());

    let statuses = [first.status().as_u16(), second.status().as_u16()];
    assert!(statuses.contains(&200));
    assert!(statuses.contains(&400));

    for response in [first, second] {
        if response.status().is_success() {
            let events = SseReader::new(response).drain().await;
            assert_eq!(
                event_types(&events).last().map(String::as_str),
                Some("workflow_complete")
            );
        } else {
            let body: Value = response.json().await.unwrap();
            let code =
                body.pointer("/error/code").and_then(Value::as_str).unwrap().to_string();
            assert!(code == "duplicate_execution" || code == "run_not_executable");
        }
    }

    // Exactly one workflow_start exists.
    let lifecycle = server
        .state
        .journal
        .list_by_type(&RunId::new(run_id), EventChannel::Lifecycle, "workflow_start")
        .unwrap();
    assert_eq!(lifecycle.len(), 1);
}

// ============================================================================
// SECTION: S6 Validator Rejection Is Side-Effect Free
// ============================================================================

/// S6: a cyclic workflow rejects with 400 and writes nothing.
#[tokio::test]
async fn test_s6_validator_rejection_side_effect_free() {
    let server = spawn_server().await;
    seed_cyclic_workflow(&server.state, "wf-s6");
    let run_id = server.create_run("proj-1", "wf-s6").await;

    let response = server
        .client
        .post(server.url("/api/workflows/wf-s6/execute/stream"))
        .json(&json!({"run_id": run_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body.pointer("/error/code").and_then(Value::as_str),
        Some("workflow_cycle_detected")
    );

    let events = server.state.journal.list_all(&RunId::new(run_id)).unwrap();
    assert!(events.is_empty());
}

// ============================================================================
// SECTION: S7 Replay Consistency
// ============================================================================

/// S7: cursor pages concatenate to the single fetch; no nested payload.
#[tokio::test]
async fn test_s7_replay_consistency() {
    let server = spawn_server().await;
    seed_linear_workflow(&server.state, "wf-s7");
    let run_id = server.create_run("proj-1", "wf-s7").await;

    let response = server
        .client
        .post(server.url("/api/workflows/wf-s7/execute/stream"))
        .json(&json!({"run_id": run_id}))
        .send()
        .await
        .unwrap();
    SseReader::new(response).drain().await;

    let full: Value = server
        .client
        .get(server.url(&format!("/api/runs/{run_id}/events?channel=execution&limit=200")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let full_events = full.get("events").and_then(Value::as_array).unwrap().clone();
    assert!(!full_events.is_empty());

    let mut paged = Vec::new();
    let mut cursor: Option<i64> = None;
    loop {
        let mut url =
            format!("/api/runs/{run_id}/events?channel=execution&limit=2");
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={cursor}"));
        }
        let page: Value =
            server.client.get(server.url(&url)).send().await.unwrap().json().await.unwrap();
        paged.extend(page.get("events").and_then(Value::as_array).unwrap().clone());
        if page.get("has_more") != Some(&Value::Bool(true)) {
            break;
        }
        cursor = page.get("next_cursor").and_then(Value::as_i64);
    }
    assert_eq!(paged, full_events);

    // Flattened shape: type at the top level, no nested payload object.
    for event in &full_events {
        assert!(event.get("type").is_some());
        assert!(event.get("payload").is_none());
        assert!(event.get("run_id").is_some());
    }
}

// ============================================================================
// SECTION: S8 Defensive Terminal On Bridge Exception
// ============================================================================

/// Subscriber capturing execution results.
#[derive(Default)]
struct ResultProbe {
    /// Captured result statuses.
    statuses: Mutex<Vec<String>>,
}

#[async_trait]
impl EventSubscriber for ResultProbe {
    fn interests(&self) -> Vec<EventKind> {
        vec![EventKind::ExecutionResult]
    }

    async fn handle(&self, event: &DomainEvent) {
        if let DomainEvent::ExecutionResult(result) = event {
            if let Ok(mut statuses) = self.statuses.lock() {
                statuses.push(result.status.clone());
            }
        }
    }
}

/// S8: a bridge failure surfaces a failed result and leaves no journal rows
/// when the failure precedes the claim.
#[tokio::test]
async fn test_s8_bridge_failure_is_fail_closed() {
    let server = spawn_server().await;
    seed_linear_workflow(&server.state, "wf-s8");
    let probe = Arc::new(ResultProbe::default());
    server.state.bus.subscribe(Arc::clone(&probe) as Arc<dyn EventSubscriber>);

    let mut payload = Map::new();
    payload.insert("workflow_id".to_string(), Value::from("wf-s8"));
    payload.insert("run_id".to_string(), Value::from("run-ghost"));
    server
        .state
        .bus
        .publish(DomainEvent::DecisionMade(AgentDecision {
            decision_type: "execute_workflow".to_string(),
            decision_id: DecisionId::new("dec-s8"),
            correlation_id: CorrelationId::new("corr-s8"),
            payload,
        }))
        .await;

    assert_eq!(probe.statuses.lock().unwrap().as_slice(), ["failed".to_string()]);
    assert!(server.state.journal.list_all(&RunId::new("run-ghost")).unwrap().is_empty());
}

// ============================================================================
// SECTION: Idempotent Creation and Capabilities
// ============================================================================

/// Equal idempotency headers converge on one run row.
#[tokio::test]
async fn test_idempotent_run_creation() {
    let server = spawn_server().await;
    seed_linear_workflow(&server.state, "wf-idem");

    let mut ids = Vec::new();
    for _ in 0..2 {
        let response = server
            .client
            .post(server.url("/api/projects/proj-1/workflows/wf-idem/runs"))
            .header("Idempotency-Key", "key-1")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        ids.push(body.get("id").and_then(Value::as_str).unwrap().to_string());
    }
    assert_eq!(ids[0], ids[1]);

    let listing: Value = server
        .client
        .get(server.url("/api/projects/proj-1/workflows/wf-idem/runs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing.get("total").and_then(Value::as_u64), Some(1));
}

/// The capability manifest mirrors the validation contracts.
#[tokio::test]
async fn test_capabilities_manifest() {
    let server = spawn_server().await;
    let manifest: Value = server
        .client
        .get(server.url("/api/workflows/capabilities"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(manifest.get("schema_version").is_some());
    assert_eq!(
        manifest.pointer("/constraints/draft_validation_scope").and_then(Value::as_str),
        Some("main_subgraph_only")
    );
    let node_types = manifest.get("node_types").and_then(Value::as_array).unwrap();
    assert!(!node_types.is_empty());
    let tool = node_types
        .iter()
        .find(|entry| entry.get("type").and_then(Value::as_str) == Some("tool"))
        .unwrap();
    assert_eq!(tool.get("executor_available"), Some(&Value::Bool(true)));
    assert!(tool.pointer("/validation_contract/tool_node").is_some());
}
