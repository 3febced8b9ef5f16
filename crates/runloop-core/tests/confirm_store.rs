// runloop-core/tests/confirm_store.rs
// ============================================================================
// Module: Confirmation Store Tests
// Description: Tests for single-pending gating, timeouts, and id freshness.
// ============================================================================
//! ## Overview
//! Validates idempotent pending creation, shared waitables, the deny-default
//! timeout, resolution error paths, and fresh confirmation ids across runs.

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
use std::time::Duration;

use runloop_core::ConfirmDecision;
use runloop_core::ConfirmId;
use runloop_core::ConfirmationStore;
use runloop_core::NodeId;
use runloop_core::RunId;
use runloop_core::WorkflowId;
use runloop_core::runtime::ConfirmError;

/// Creates a pending confirmation with standard identifiers.
fn pending(store: &ConfirmationStore, run: &str) -> runloop_core::runtime::PendingConfirmation {
    store
        .create_or_get_pending(&RunId::new(run), &WorkflowId::new("wf-1"), &NodeId::new("n1"))
        .unwrap()
}

// ============================================================================
// SECTION: Pending Creation
// ============================================================================

/// Tests that concurrent creators for one run share the pending entry.
#[test]
fn test_single_pending_per_run() {
    let store = ConfirmationStore::new();
    let first = pending(&store, "run-1");
    let second = pending(&store, "run-1");
    assert_eq!(first.confirm_id, second.confirm_id);

    let other_run = pending(&store, "run-2");
    assert_ne!(first.confirm_id, other_run.confirm_id);
}

/// Tests that blank identifiers are rejected.
#[test]
fn test_blank_identifiers_rejected() {
    let store = ConfirmationStore::new();
    let result = store.create_or_get_pending(
        &RunId::new("  "),
        &WorkflowId::new("wf-1"),
        &NodeId::new("n1"),
    );
    assert!(matches!(result, Err(ConfirmError::MissingField("run_id"))));
}

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Tests the allow round trip through resolve and wait.
#[tokio::test]
async fn test_resolve_then_wait_returns_allow() {
    let store = Arc::new(ConfirmationStore::new());
    let entry = pending(&store, "run-1");

    store.resolve(&RunId::new("run-1"), &entry.confirm_id, ConfirmDecision::Allow).unwrap();
    let decision =
        store.wait_for_decision(&entry.confirm_id, Duration::from_secs(1)).await.unwrap();
    assert_eq!(decision, ConfirmDecision::Allow);
}

/// Tests that waiters block until a late resolution arrives.
#[tokio::test]
async fn test_wait_observes_late_resolution() {
    let store = Arc::new(ConfirmationStore::new());
    let entry = pending(&store, "run-1");

    let waiter_store = Arc::clone(&store);
    let confirm_id = entry.confirm_id.clone();
    let waiter = tokio::spawn(async move {
        waiter_store.wait_for_decision(&confirm_id, Duration::from_secs(5)).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    store.resolve(&RunId::new("run-1"), &entry.confirm_id, ConfirmDecision::Deny).unwrap();

    let decision = waiter.await.unwrap().unwrap();
    assert_eq!(decision, ConfirmDecision::Deny);
}

/// Tests the timeout path: no decision means the caller denies.
#[tokio::test]
async fn test_wait_times_out() {
    let store = ConfirmationStore::new();
    let entry = pending(&store, "run-1");

    let outcome = store.wait_for_decision(&entry.confirm_id, Duration::from_millis(20)).await;
    assert!(matches!(outcome, Err(ConfirmError::Timeout)));
}

/// Tests resolution error paths: unknown id and mismatched run.
#[test]
fn test_resolution_error_paths() {
    let store = ConfirmationStore::new();
    let entry = pending(&store, "run-1");

    let unknown = store.resolve(
        &RunId::new("run-1"),
        &ConfirmId::new("cfm_missing"),
        ConfirmDecision::Allow,
    );
    assert!(matches!(unknown, Err(ConfirmError::NotFound)));

    let wrong_run =
        store.resolve(&RunId::new("run-9"), &entry.confirm_id, ConfirmDecision::Allow);
    assert!(matches!(wrong_run, Err(ConfirmError::WrongRun)));

    // Repeated resolution of a decided confirmation is a no-op.
    store.resolve(&RunId::new("run-1"), &entry.confirm_id, ConfirmDecision::Allow).unwrap();
    store.resolve(&RunId::new("run-1"), &entry.confirm_id, ConfirmDecision::Deny).unwrap();
}

// ============================================================================
// SECTION: Cleanup
// ============================================================================

/// Tests that a completed wait frees the run for a fresh confirmation.
#[tokio::test]
async fn test_cleanup_mints_fresh_ids() {
    let store = ConfirmationStore::new();
    let first = pending(&store, "run-1");
    store.resolve(&RunId::new("run-1"), &first.confirm_id, ConfirmDecision::Allow).unwrap();
    store.wait_for_decision(&first.confirm_id, Duration::from_secs(1)).await.unwrap();

    // The old id is gone and the next pending gets a new one.
    let stale = store.wait_for_decision(&first.confirm_id, Duration::from_millis(10)).await;
    assert!(matches!(stale, Err(ConfirmError::NotFound)));

    let second = pending(&store, "run-1");
    assert_ne!(first.confirm_id, second.confirm_id);
}
