// runloop-core/tests/criteria_manager.rs
// ============================================================================
// Module: Criteria Manager Tests
// Description: Tests for merging, conflicts, baselines, and snapshot hashing.
// ============================================================================
//! ## Overview
//! Validates deterministic snapshot construction: stable ids, source
//! priority, conflict detection, subjective-text handling, and hash
//! stability.

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

use runloop_core::CriteriaManager;
use runloop_core::core::criteria::CriteriaSource;
use runloop_core::core::criteria::VerificationMethod;
use runloop_core::runtime::BASELINE_SUCCESS_CRITERION_TEXT;

// ============================================================================
// SECTION: Baseline Injection
// ============================================================================

/// Tests that empty inputs inject the verifiable baseline criterion.
#[test]
fn test_baseline_injected_when_no_criteria() {
    let manager = CriteriaManager::new();
    let snapshot = manager.build_snapshot(Some("export the data"), &[], &[]);

    assert_eq!(snapshot.criteria.len(), 1);
    let baseline = &snapshot.criteria[0];
    assert_eq!(baseline.text, BASELINE_SUCCESS_CRITERION_TEXT);
    assert_eq!(baseline.source, CriteriaSource::Inferred);
    assert_eq!(baseline.verification_method, VerificationMethod::RunEvent);
    assert!(baseline.id.as_str().starts_with("crit_"));
    assert!(snapshot.conflicts.is_empty());
    assert!(snapshot.unverifiable_criteria_ids.is_empty());
}

/// Tests that a subjective task description adds a manual criterion.
#[test]
fn test_subjective_description_adds_manual_criterion() {
    let manager = CriteriaManager::new();
    let snapshot = manager.build_snapshot(Some("make the dashboard prettier"), &[], &[]);

    assert_eq!(snapshot.criteria.len(), 2);
    let manual = snapshot
        .criteria
        .iter()
        .find(|criterion| criterion.verification_method == VerificationMethod::Manual)
        .unwrap();
    assert!(manual.text.contains("prettier"));
    assert!(snapshot.unverifiable_criteria_ids.contains(&manual.id));
    assert!(!snapshot.user_questions.is_empty());
}

/// Tests that a numeric anchor defuses the subjective heuristic.
#[test]
fn test_quantified_description_is_not_subjective() {
    let manager = CriteriaManager::new();
    let snapshot = manager.build_snapshot(Some("make it faster than 200ms"), &[], &[]);
    assert_eq!(snapshot.criteria.len(), 1);
    assert_eq!(snapshot.criteria[0].text, BASELINE_SUCCESS_CRITERION_TEXT);
}

// ============================================================================
// SECTION: Merging
// ============================================================================

/// Tests that the user source wins a merge over the plan source.
#[test]
fn test_user_source_wins_merge() {
    let manager = CriteriaManager::new();
    let snapshot = manager.build_snapshot(
        None,
        &["Write results to the database".to_string()],
        &["write results to the   database".to_string()],
    );

    assert_eq!(snapshot.criteria.len(), 1);
    assert_eq!(snapshot.criteria[0].source, CriteriaSource::User);
}

/// Tests that explicit criteria suppress the baseline.
#[test]
fn test_explicit_criteria_suppress_baseline() {
    let manager = CriteriaManager::new();
    let snapshot =
        manager.build_snapshot(Some("some task"), &["output exactly 3 rows".to_string()], &[]);
    assert_eq!(snapshot.criteria.len(), 1);
    assert_ne!(snapshot.criteria[0].text, BASELINE_SUCCESS_CRITERION_TEXT);
}

// ============================================================================
// SECTION: Conflicts
// ============================================================================

/// Tests opposite-polarity conflict detection on Chinese criteria.
#[test]
fn test_conflict_detection_chinese() {
    let manager = CriteriaManager::new();
    let snapshot = manager.build_snapshot(
        None,
        &["必须写入数据库".to_string(), "禁止写入数据库".to_string()],
        &[],
    );

    assert_eq!(snapshot.conflicts.len(), 1);
    let conflict = &snapshot.conflicts[0];
    assert!(conflict.left_id.as_str() < conflict.right_id.as_str());
    assert!(conflict.reason.starts_with("conflict_on_core:"));
    assert!(!snapshot.user_questions.is_empty());
}

/// Tests opposite-polarity conflict detection on English criteria.
#[test]
fn test_conflict_detection_english() {
    let manager = CriteriaManager::new();
    let snapshot = manager.build_snapshot(
        None,
        &["must write to the database".to_string(), "never write to the database".to_string()],
        &[],
    );
    assert_eq!(snapshot.conflicts.len(), 1);
}

/// Tests that same-polarity statements do not conflict.
#[test]
fn test_same_polarity_is_not_a_conflict() {
    let manager = CriteriaManager::new();
    let snapshot = manager.build_snapshot(
        None,
        &["must write to the database".to_string(), "should write to the database".to_string()],
        &[],
    );
    assert!(snapshot.conflicts.is_empty());
}

// ============================================================================
// SECTION: Determinism
// ============================================================================

/// Tests that input order does not change the hash.
#[test]
fn test_snapshot_hash_is_order_independent() {
    let manager = CriteriaManager::new();
    let forward = manager.build_snapshot(
        None,
        &["criterion alpha".to_string(), "criterion beta".to_string()],
        &[],
    );
    let reversed = manager.build_snapshot(
        None,
        &["criterion beta".to_string(), "criterion alpha".to_string()],
        &[],
    );

    assert_eq!(forward.criteria_hash, reversed.criteria_hash);
    assert_eq!(forward.criteria, reversed.criteria);
    assert_eq!(forward.criteria_hash.len(), 64);
}

/// Tests that question output is capped at three entries.
#[test]
fn test_user_questions_capped_at_three() {
    let manager = CriteriaManager::new();
    let snapshot = manager.build_snapshot(
        None,
        &[
            "should be prettier".to_string(),
            "should be faster".to_string(),
            "should be more secure".to_string(),
            "should be beautiful".to_string(),
        ],
        &[],
    );
    assert!(snapshot.user_questions.len() <= 3);
    assert_eq!(snapshot.unverifiable_criteria_ids.len(), 4);
}
