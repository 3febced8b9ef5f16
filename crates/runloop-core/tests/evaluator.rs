// runloop-core/tests/evaluator.rs
// ============================================================================
// Module: Acceptance Evaluator Tests
// Description: Tests for the verdict decision table and evidence rules.
// ============================================================================
//! ## Overview
//! Validates the strict decision table: conflicts demand the user, green
//! states pass, exhausted attempts block, non-shrinking unmet sets trip the
//! loop guard, and everything else replans with capped constraints.

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

use runloop_core::AcceptanceEvaluator;
use runloop_core::AcceptanceVerdict;
use runloop_core::CriteriaManager;
use runloop_core::CriteriaSnapshot;
use runloop_core::ExecutionSummary;
use runloop_core::RunEvidenceSnapshot;
use runloop_core::RunId;
use runloop_core::runtime::EvaluationContext;

/// Builds the baseline-only criteria snapshot.
fn baseline_snapshot() -> CriteriaSnapshot {
    CriteriaManager::new().build_snapshot(Some("export the data"), &[], &[])
}

/// Builds evidence for a run with the given terminal type.
fn evidence(terminal: Option<&str>) -> RunEvidenceSnapshot {
    let mut summary = ExecutionSummary {
        run_event_count: 2,
        terminal_event_type: terminal.map(str::to_string),
        ..Default::default()
    };
    if let Some(terminal) = terminal {
        summary
            .event_refs_by_type
            .insert(terminal.to_string(), vec!["run_event:run-1:lifecycle:9".to_string()]);
    }
    RunEvidenceSnapshot {
        run_id: RunId::new("run-1"),
        run_event_refs: vec!["run_event:run-1:lifecycle:9".to_string()],
        artifact_refs: Vec::new(),
        test_report_ref: None,
        execution_summary: summary,
    }
}

/// Builds a default evaluation context.
fn context(attempt: u32) -> EvaluationContext {
    EvaluationContext {
        attempt,
        max_replan_attempts: 3,
        previous_unmet_ids: None,
        tests_passed: Some(true),
        test_report_ref: Some("run_event:run-1:lifecycle:7".to_string()),
    }
}

// ============================================================================
// SECTION: PASS
// ============================================================================

/// Tests the green path: baseline satisfied, tests passed, report present.
#[test]
fn test_pass_on_green_run() {
    let evaluator = AcceptanceEvaluator::default();
    let result = evaluator
        .evaluate(&baseline_snapshot(), &evidence(Some("workflow_complete")), &context(1))
        .unwrap();

    assert_eq!(result.verdict, AcceptanceVerdict::Pass);
    assert!(result.unmet_criteria.is_empty());
    assert!(result.missing_evidence.is_empty());
    let refs = result.evidence_map.values().next().unwrap();
    assert!(!refs.is_empty());
}

/// Tests that a missing test report blocks PASS when required.
#[test]
fn test_pass_requires_test_report() {
    let evaluator = AcceptanceEvaluator::new(true);
    let mut ctx = context(1);
    ctx.test_report_ref = None;
    let result = evaluator
        .evaluate(&baseline_snapshot(), &evidence(Some("workflow_complete")), &ctx)
        .unwrap();
    assert_ne!(result.verdict, AcceptanceVerdict::Pass);

    let relaxed = AcceptanceEvaluator::new(false);
    let result = relaxed
        .evaluate(&baseline_snapshot(), &evidence(Some("workflow_complete")), &ctx)
        .unwrap();
    assert_eq!(result.verdict, AcceptanceVerdict::Pass);
}

/// Tests that a denied confirmation fails the baseline criterion.
#[test]
fn test_denied_confirmation_is_not_a_pass() {
    let evaluator = AcceptanceEvaluator::default();
    let mut run_evidence = evidence(Some("workflow_complete"));
    run_evidence.execution_summary.confirm_required = true;
    run_evidence.execution_summary.confirm_decision = Some("deny".to_string());

    let result =
        evaluator.evaluate(&baseline_snapshot(), &run_evidence, &context(1)).unwrap();
    assert_ne!(result.verdict, AcceptanceVerdict::Pass);
    assert_eq!(result.unmet_criteria.len(), 1);
}

// ============================================================================
// SECTION: NEED_USER
// ============================================================================

/// Tests that conflicts short-circuit to NEED_USER with a question.
#[test]
fn test_conflicts_need_user() {
    let snapshot = CriteriaManager::new().build_snapshot(
        None,
        &["必须写入数据库".to_string(), "禁止写入数据库".to_string()],
        &[],
    );
    let evaluator = AcceptanceEvaluator::default();
    let result =
        evaluator.evaluate(&snapshot, &evidence(Some("workflow_complete")), &context(1)).unwrap();

    assert_eq!(result.verdict, AcceptanceVerdict::NeedUser);
    assert!(!result.user_questions.is_empty());
    assert!(result.user_questions.len() <= 3);
}

/// Tests that unverifiable criteria demand the user instead of replanning.
#[test]
fn test_unverifiable_criteria_need_user() {
    let snapshot =
        CriteriaManager::new().build_snapshot(Some("make the dashboard prettier"), &[], &[]);
    let evaluator = AcceptanceEvaluator::default();
    let result =
        evaluator.evaluate(&snapshot, &evidence(Some("workflow_complete")), &context(1)).unwrap();

    assert_eq!(result.verdict, AcceptanceVerdict::NeedUser);
}

/// Tests the loop guard: a non-shrinking unmet set stops auto-replans.
#[test]
fn test_loop_guard_needs_user() {
    let evaluator = AcceptanceEvaluator::default();
    let snapshot = baseline_snapshot();
    let failed = evidence(Some("workflow_error"));

    // First pass without history replans.
    let first = evaluator.evaluate(&snapshot, &failed, &context(1)).unwrap();
    assert_eq!(first.verdict, AcceptanceVerdict::Replan);

    // Second pass with an identical unmet set trips the guard.
    let mut ctx = context(2);
    ctx.previous_unmet_ids =
        Some(first.unmet_criteria.iter().cloned().collect::<BTreeSet<_>>());
    let second = evaluator.evaluate(&snapshot, &failed, &ctx).unwrap();
    assert_eq!(second.verdict, AcceptanceVerdict::NeedUser);
}

// ============================================================================
// SECTION: BLOCKED
// ============================================================================

/// Tests BLOCKED at the attempt cap with its stable reason.
#[test]
fn test_blocked_at_attempt_cap() {
    let evaluator = AcceptanceEvaluator::default();
    let result =
        evaluator.evaluate(&baseline_snapshot(), &evidence(Some("workflow_error")), &context(3)).unwrap();

    assert_eq!(result.verdict, AcceptanceVerdict::Blocked);
    assert_eq!(result.blocked_reason.as_deref(), Some("max_replan_attempts_reached"));
}

/// Tests argument validation.
#[test]
fn test_argument_bounds() {
    let evaluator = AcceptanceEvaluator::default();
    let mut ctx = context(1);
    ctx.attempt = 0;
    assert!(
        evaluator
            .evaluate(&baseline_snapshot(), &evidence(Some("workflow_complete")), &ctx)
            .is_err()
    );

    let mut ctx = context(1);
    ctx.max_replan_attempts = 0;
    assert!(
        evaluator
            .evaluate(&baseline_snapshot(), &evidence(Some("workflow_complete")), &ctx)
            .is_err()
    );
}

// ============================================================================
// SECTION: REPLAN
// ============================================================================

/// Tests REPLAN constraints name the unmet criteria.
#[test]
fn test_replan_constraints_name_unmet_criteria() {
    let evaluator = AcceptanceEvaluator::default();
    let result = evaluator
        .evaluate(&baseline_snapshot(), &evidence(Some("workflow_error")), &context(1))
        .unwrap();

    assert_eq!(result.verdict, AcceptanceVerdict::Replan);
    assert_eq!(result.replan_constraints.len(), 1);
    assert!(result.replan_constraints[0].starts_with("fix_unmet_criterion:crit_"));
}
