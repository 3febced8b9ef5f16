// runloop-core/src/runtime/evaluator.rs
// ============================================================================
// Module: Acceptance Evaluator
// Description: Strict PASS/REPLAN/NEED_USER/BLOCKED verdict engine.
// Purpose: Decide acceptance from criteria and evidence with no I/O.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! The evaluator is a pure function over a criteria snapshot and an evidence
//! snapshot. The decision table runs top to bottom, first match wins:
//! conflicts demand the user, a fully-evidenced green state passes,
//! unverifiable criteria demand the user, exhausted attempts block, a
//! non-shrinking unmet set trips the loop guard, and everything else replans
//! with per-criterion repair constraints. Per-criterion evidence rules fail
//! closed: only the baseline run-event criterion and test-backed criteria can
//! auto-satisfy.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::CriteriaSnapshot;
use crate::core::Criterion;
use crate::core::CriterionId;
use crate::core::EVENT_WORKFLOW_COMPLETE;
use crate::core::EVENT_WORKFLOW_ERROR;
use crate::core::RunEvidenceSnapshot;
use crate::core::VerificationMethod;
use crate::runtime::criteria::BASELINE_SUCCESS_CRITERION_TEXT;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Cap on emitted replan constraints.
const MAX_REPLAN_CONSTRAINTS: usize = 20;
/// Cap on emitted user questions.
const MAX_USER_QUESTIONS: usize = 3;

// ============================================================================
// SECTION: Verdicts
// ============================================================================

/// Acceptance verdict for one reflection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptanceVerdict {
    /// All criteria satisfied with evidence.
    #[serde(rename = "PASS")]
    Pass,
    /// Re-execute with repair constraints.
    #[serde(rename = "REPLAN")]
    Replan,
    /// Human clarification required.
    #[serde(rename = "NEED_USER")]
    NeedUser,
    /// Automatic progress is impossible.
    #[serde(rename = "BLOCKED")]
    Blocked,
}

impl AcceptanceVerdict {
    /// Returns the stable string form of the verdict.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Replan => "REPLAN",
            Self::NeedUser => "NEED_USER",
            Self::Blocked => "BLOCKED",
        }
    }
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Full acceptance evaluation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceResult {
    /// Verdict for this pass.
    pub verdict: AcceptanceVerdict,
    /// Acceptance attempt number (1-based).
    pub attempt: u32,
    /// Configured replan attempt cap.
    pub max_replan_attempts: u32,
    /// Criterion ids that are not satisfied.
    #[serde(default)]
    pub unmet_criteria: Vec<CriterionId>,
    /// Evidence references per criterion id.
    #[serde(default)]
    pub evidence_map: BTreeMap<String, Vec<String>>,
    /// Criterion ids with no evidence references.
    #[serde(default)]
    pub missing_evidence: Vec<CriterionId>,
    /// Clarification prompts when the user is needed.
    #[serde(default)]
    pub user_questions: Vec<String>,
    /// Repair constraints when replanning.
    #[serde(default)]
    pub replan_constraints: Vec<String>,
    /// Stable blocked reason when blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    /// Test report reference backing test criteria.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_report_ref: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Argument errors raised by the evaluator.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// Attempts are 1-based.
    #[error("attempt must start from 1")]
    AttemptOutOfRange,
    /// The replan cap must admit at least one attempt.
    #[error("max_replan_attempts must be >= 1")]
    ReplanCapOutOfRange,
}

// ============================================================================
// SECTION: Inputs
// ============================================================================

/// Evaluation inputs beyond the two snapshots.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    /// Acceptance attempt number (1-based).
    pub attempt: u32,
    /// Configured replan attempt cap.
    pub max_replan_attempts: u32,
    /// Unmet ids from the previous pass, when known.
    pub previous_unmet_ids: Option<BTreeSet<CriterionId>>,
    /// Whether the deterministic test report passed.
    pub tests_passed: Option<bool>,
    /// Test report reference.
    pub test_report_ref: Option<String>,
}

// ============================================================================
// SECTION: Evaluator
// ============================================================================

/// Strict, side-effect-free acceptance evaluator.
#[derive(Debug, Clone, Copy)]
pub struct AcceptanceEvaluator {
    /// True when PASS additionally requires a test report reference.
    require_test_report_for_pass: bool,
}

impl Default for AcceptanceEvaluator {
    fn default() -> Self {
        Self { require_test_report_for_pass: true }
    }
}

impl AcceptanceEvaluator {
    /// Creates an evaluator with the given PASS precondition.
    #[must_use]
    pub const fn new(require_test_report_for_pass: bool) -> Self {
        Self { require_test_report_for_pass }
    }

    /// Evaluates one acceptance pass.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluatorError`] for out-of-range attempt arguments.
    pub fn evaluate(
        &self,
        criteria: &CriteriaSnapshot,
        evidence: &RunEvidenceSnapshot,
        context: &EvaluationContext,
    ) -> Result<AcceptanceResult, EvaluatorError> {
        if context.attempt < 1 {
            return Err(EvaluatorError::AttemptOutOfRange);
        }
        if context.max_replan_attempts < 1 {
            return Err(EvaluatorError::ReplanCapOutOfRange);
        }

        let mut unmet: Vec<CriterionId> = Vec::new();
        let mut missing: Vec<CriterionId> = Vec::new();
        let mut evidence_map: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for criterion in &criteria.criteria {
            let (refs, satisfied) = evaluate_single_criterion(criterion, criteria, evidence, context);
            if refs.is_empty() {
                missing.push(criterion.id.clone());
            }
            evidence_map.insert(criterion.id.as_str().to_string(), refs);
            if !satisfied {
                unmet.push(criterion.id.clone());
            }
        }

        let base = AcceptanceResult {
            verdict: AcceptanceVerdict::Blocked,
            attempt: context.attempt,
            max_replan_attempts: context.max_replan_attempts,
            unmet_criteria: unmet.clone(),
            evidence_map,
            missing_evidence: missing.clone(),
            user_questions: Vec::new(),
            replan_constraints: Vec::new(),
            blocked_reason: None,
            test_report_ref: context.test_report_ref.clone(),
        };

        // Conflicts are always NEED_USER (fail-closed).
        if !criteria.conflicts.is_empty() {
            let mut questions = limit_questions(&criteria.user_questions);
            if questions.is_empty() {
                questions.push(
                    "Conflicting acceptance criteria exist; confirm which to keep (one line)."
                        .to_string(),
                );
            }
            return Ok(AcceptanceResult {
                verdict: AcceptanceVerdict::NeedUser,
                user_questions: questions,
                ..base
            });
        }

        let report_present = context
            .test_report_ref
            .as_deref()
            .is_some_and(|reference| !reference.trim().is_empty());
        let pass_requirements_met = unmet.is_empty()
            && missing.is_empty()
            && context.tests_passed == Some(true)
            && (!self.require_test_report_for_pass || report_present);
        if pass_requirements_met {
            return Ok(AcceptanceResult {
                verdict: AcceptanceVerdict::Pass,
                unmet_criteria: Vec::new(),
                missing_evidence: Vec::new(),
                ..base
            });
        }

        // Unverifiable or confirmation-requiring criteria beat REPLAN so the
        // loop never spins on evidence it can never produce.
        let mut needs_user = !criteria.unverifiable_criteria_ids.is_empty()
            || criteria
                .criteria
                .iter()
                .filter(|criterion| missing.contains(&criterion.id))
                .any(|criterion| requires_user_confirmation(criterion, criteria));

        if context.attempt >= context.max_replan_attempts {
            return Ok(AcceptanceResult {
                verdict: AcceptanceVerdict::Blocked,
                blocked_reason: Some("max_replan_attempts_reached".to_string()),
                user_questions: limit_questions(&criteria.user_questions),
                ..base
            });
        }

        // Loop guard: automatic replanning must strictly shrink the unmet set.
        if let Some(previous) = &context.previous_unmet_ids {
            let current: BTreeSet<CriterionId> = unmet.iter().cloned().collect();
            if !current.is_empty() && !(current.is_subset(previous) && current != *previous) {
                needs_user = true;
            }
        }

        if needs_user {
            let mut questions = limit_questions(&criteria.user_questions);
            if questions.is_empty() {
                questions = derive_questions_from_missing(&criteria.criteria, &missing);
            }
            return Ok(AcceptanceResult {
                verdict: AcceptanceVerdict::NeedUser,
                user_questions: questions,
                ..base
            });
        }

        let replan_constraints = build_replan_constraints(&criteria.criteria, &unmet);
        Ok(AcceptanceResult { verdict: AcceptanceVerdict::Replan, replan_constraints, ..base })
    }
}

// ============================================================================
// SECTION: Per-Criterion Rules
// ============================================================================

/// Evaluates one criterion; returns its evidence refs and satisfaction.
fn evaluate_single_criterion(
    criterion: &Criterion,
    criteria: &CriteriaSnapshot,
    evidence: &RunEvidenceSnapshot,
    context: &EvaluationContext,
) -> (Vec<String>, bool) {
    // Unverifiable criteria must not auto-satisfy (fail-closed).
    if criteria.is_unverifiable(&criterion.id) {
        return (Vec::new(), false);
    }

    match criterion.verification_method {
        VerificationMethod::Manual => (Vec::new(), false),
        VerificationMethod::Test => {
            let reference = context
                .test_report_ref
                .as_deref()
                .map(str::trim)
                .filter(|reference| !reference.is_empty());
            match (context.tests_passed, reference) {
                (Some(true), Some(reference)) => (vec![reference.to_string()], true),
                _ => (Vec::new(), false),
            }
        }
        VerificationMethod::Artifact => (Vec::new(), false),
        VerificationMethod::RunEvent => evaluate_run_event_criterion(criterion, evidence),
        VerificationMethod::Unknown => (Vec::new(), false),
    }
}

/// Evaluates a run-event criterion. Only the baseline success criterion is
/// recognized; its evidence refs are the terminal event references.
fn evaluate_run_event_criterion(
    criterion: &Criterion,
    evidence: &RunEvidenceSnapshot,
) -> (Vec<String>, bool) {
    if criterion.text.trim() != BASELINE_SUCCESS_CRITERION_TEXT {
        return (Vec::new(), false);
    }

    let summary = &evidence.execution_summary;
    let mut refs = summary.refs_for_type(EVENT_WORKFLOW_COMPLETE).to_vec();
    if refs.is_empty() {
        refs = summary.refs_for_type(EVENT_WORKFLOW_ERROR).to_vec();
    }

    let satisfied = summary.terminal_event_type.as_deref() == Some(EVENT_WORKFLOW_COMPLETE)
        && summary.confirm_allowed();
    (refs, satisfied)
}

/// Returns true when the criterion needs explicit user confirmation.
fn requires_user_confirmation(criterion: &Criterion, criteria: &CriteriaSnapshot) -> bool {
    criteria.is_unverifiable(&criterion.id)
        || matches!(
            criterion.verification_method,
            VerificationMethod::Manual | VerificationMethod::Unknown
        )
}

// ============================================================================
// SECTION: Question and Constraint Builders
// ============================================================================

/// Trims blank questions and applies the cap.
fn limit_questions(questions: &[String]) -> Vec<String> {
    questions
        .iter()
        .filter(|question| !question.trim().is_empty())
        .take(MAX_USER_QUESTIONS)
        .cloned()
        .collect()
}

/// Derives fallback questions for criteria with missing evidence.
fn derive_questions_from_missing(
    criteria: &[Criterion],
    missing: &[CriterionId],
) -> Vec<String> {
    let mut questions = Vec::new();
    for criterion in criteria {
        if !missing.contains(&criterion.id) {
            continue;
        }
        if questions.len() >= MAX_USER_QUESTIONS {
            break;
        }
        if criterion.verification_method == VerificationMethod::Manual {
            questions.push(format!(
                "Confirm whether this criterion is satisfied: {} (allow/deny or one sentence)",
                criterion.text
            ));
        } else {
            questions.push(format!(
                "No reviewable evidence for: {}. Describe the expected output, threshold, or file path.",
                criterion.text
            ));
        }
    }
    questions
}

/// Builds capped replan constraints from the unmet set.
fn build_replan_constraints(criteria: &[Criterion], unmet: &[CriterionId]) -> Vec<String> {
    criteria
        .iter()
        .filter(|criterion| unmet.contains(&criterion.id))
        .take(MAX_REPLAN_CONSTRAINTS)
        .map(|criterion| {
            format!("fix_unmet_criterion:{}:{}", criterion.id.as_str(), criterion.text)
        })
        .collect()
}
