// runloop-core/src/runtime/acceptance.rs
// ============================================================================
// Module: Acceptance Loop Orchestrator
// Description: Terminal-run reflection with idempotent lifecycle artifacts.
// Purpose: Chain evidence, verdicts, and the at-most-once REPLAN signal.
// Dependencies: crate::{core, interfaces, runtime}, serde_json
// ============================================================================

//! ## Overview
//! The orchestrator closes the loop on a terminal run: build the criteria
//! snapshot, derive the reflection id, persist the test report and the
//! execution/reflection lifecycle events under deterministic idempotency
//! keys, evaluate, and on REPLAN publish the adjustment event. The journal's
//! unique-key constraint is the idempotency witness at every step, so
//! concurrent orchestrators converge on one set of rows and the domain event
//! publishes only when the adjustment row was freshly inserted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::CriteriaSnapshot;
use crate::core::EVENT_ADJUSTMENT_REQUESTED;
use crate::core::EVENT_EXECUTION_COMPLETED;
use crate::core::EVENT_REFLECTION_COMPLETED;
use crate::core::EVENT_REFLECTION_REQUESTED;
use crate::core::EVENT_TEST_REPORT;
use crate::core::EVENT_WORKFLOW_COMPLETE;
use crate::core::EventChannel;
use crate::core::RunEvidenceSnapshot;
use crate::core::RunId;
use crate::core::WorkflowId;
use crate::core::derive_reflection_id;
use crate::core::format_run_event_ref;
use crate::interfaces::RunEventJournal;
use crate::interfaces::RunRepository;
use crate::interfaces::StoreError;
use crate::interfaces::WorkflowRepository;
use crate::runtime::bus::AdjustmentRequested;
use crate::runtime::bus::DomainEvent;
use crate::runtime::bus::EventBus;
use crate::runtime::criteria::CriteriaManager;
use crate::runtime::evaluator::AcceptanceEvaluator;
use crate::runtime::evaluator::AcceptanceResult;
use crate::runtime::evaluator::AcceptanceVerdict;
use crate::runtime::evaluator::EvaluationContext;
use crate::runtime::evaluator::EvaluatorError;
use crate::runtime::evidence::EvidenceCollector;
use crate::runtime::recorder::RunEventRecorder;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Executor label stamped onto acceptance lifecycle payloads.
const ACCEPTANCE_EXECUTOR_ID: &str = "acceptance_loop_v1";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the acceptance orchestrator.
#[derive(Debug, Error)]
pub enum AcceptanceError {
    /// A required argument was blank.
    #[error("{0} is required")]
    MissingField(&'static str),
    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The evaluator rejected its arguments.
    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Acceptance pass request for one terminal run.
#[derive(Debug, Clone)]
pub struct AcceptanceRequest {
    /// Workflow the run executed.
    pub workflow_id: WorkflowId,
    /// Terminal run to reflect on.
    pub run_id: RunId,
    /// Session identifier; defaults to the run id.
    pub session_id: Option<String>,
    /// Acceptance attempt number (1-based).
    pub attempt: u32,
    /// Configured replan attempt cap.
    pub max_replan_attempts: u32,
    /// Explicit user criteria.
    pub user_criteria: Vec<String>,
    /// Explicit plan criteria.
    pub plan_criteria: Vec<String>,
}

impl AcceptanceRequest {
    /// Creates a request with defaults for one run.
    #[must_use]
    pub const fn new(workflow_id: WorkflowId, run_id: RunId) -> Self {
        Self {
            workflow_id,
            run_id,
            session_id: None,
            attempt: 1,
            max_replan_attempts: 3,
            user_criteria: Vec::new(),
            plan_criteria: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Acceptance loop orchestrator over terminal runs.
pub struct AcceptanceLoop {
    /// Run repository.
    runs: Arc<dyn RunRepository>,
    /// Event journal for idempotency witnesses.
    journal: Arc<dyn RunEventJournal>,
    /// Workflow repository for task descriptions.
    workflows: Arc<dyn WorkflowRepository>,
    /// Lifecycle-driving recorder.
    recorder: Arc<RunEventRecorder>,
    /// Criteria manager.
    criteria_manager: CriteriaManager,
    /// Evidence collector.
    evidence_collector: EvidenceCollector,
    /// Verdict engine.
    evaluator: AcceptanceEvaluator,
    /// Optional bus for the REPLAN signal.
    bus: Option<Arc<EventBus>>,
}

impl AcceptanceLoop {
    /// Creates an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        runs: Arc<dyn RunRepository>,
        journal: Arc<dyn RunEventJournal>,
        workflows: Arc<dyn WorkflowRepository>,
        recorder: Arc<RunEventRecorder>,
        evaluator: AcceptanceEvaluator,
        bus: Option<Arc<EventBus>>,
    ) -> Self {
        let evidence_collector = EvidenceCollector::new(Arc::clone(&runs), Arc::clone(&journal));
        Self {
            runs,
            journal,
            workflows,
            recorder,
            criteria_manager: CriteriaManager::new(),
            evidence_collector,
            evaluator,
            bus,
        }
    }

    /// Processes a terminal run and closes the acceptance loop.
    ///
    /// # Errors
    ///
    /// Returns [`AcceptanceError`] on blank arguments or storage failures.
    pub async fn on_run_terminal(
        &self,
        request: &AcceptanceRequest,
    ) -> Result<AcceptanceResult, AcceptanceError> {
        if request.run_id.as_str().trim().is_empty() {
            return Err(AcceptanceError::MissingField("run_id"));
        }
        if request.workflow_id.as_str().trim().is_empty() {
            return Err(AcceptanceError::MissingField("workflow_id"));
        }
        let session_id = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|session| !session.is_empty())
            .unwrap_or(request.run_id.as_str())
            .to_string();

        // Infer criteria from the workflow description when none are given.
        let task_description =
            self.workflows.get_by_id(&request.workflow_id).ok().and_then(|wf| wf.description);
        let criteria_snapshot = self.criteria_manager.build_snapshot(
            task_description.as_deref(),
            &request.user_criteria,
            &request.plan_criteria,
        );
        let reflection_id =
            derive_reflection_id(request.run_id.as_str(), &criteria_snapshot.criteria_hash);

        if self.already_reflected(&request.run_id, &reflection_id)? {
            // Idempotent re-entry: re-evaluate without publishing.
            let evidence = self.evidence_collector.collect(&request.run_id)?;
            if !evidence.has_terminal_event() {
                return Ok(blocked_not_terminal(request));
            }
            let (tests_passed, test_report_ref) =
                self.get_or_create_test_report(request, &reflection_id, &criteria_snapshot, &evidence)?;
            return Ok(self.evaluator.evaluate(
                &criteria_snapshot,
                &evidence,
                &EvaluationContext {
                    attempt: request.attempt,
                    max_replan_attempts: request.max_replan_attempts,
                    previous_unmet_ids: None,
                    tests_passed: Some(tests_passed),
                    test_report_ref: Some(test_report_ref),
                },
            )?);
        }

        // Evidence comes from persisted rows only; a run without a terminal
        // event must not trigger any lifecycle writes.
        let evidence = self.evidence_collector.collect(&request.run_id)?;
        if !evidence.has_terminal_event() {
            return Ok(blocked_not_terminal(request));
        }

        let run = self.runs.get_by_id(&request.run_id)?;
        let (tests_passed, test_report_ref) =
            self.get_or_create_test_report(request, &reflection_id, &criteria_snapshot, &evidence)?;

        if self
            .journal
            .list_by_type(&request.run_id, EventChannel::Lifecycle, EVENT_EXECUTION_COMPLETED)?
            .is_empty()
        {
            let payload = to_object(json!({
                "session_id": session_id,
                "workflow_id": request.workflow_id.as_str(),
                "run_id": request.run_id.as_str(),
                "attempt": request.attempt,
                "status": run.status.as_str(),
                "started_at": run.started_at.map(|at| at.as_unix_millis()),
                "ended_at": run.finished_at.map(|at| at.as_unix_millis()),
                "executor_id": ACCEPTANCE_EXECUTOR_ID,
                "run_event_refs": evidence.run_event_refs,
                "artifact_refs": [],
                "test_report_ref": test_report_ref,
                "confirm_required": evidence.execution_summary.confirm_required,
            }));
            self.append_lifecycle(
                &request.run_id,
                EVENT_EXECUTION_COMPLETED,
                payload,
                Some(EVENT_EXECUTION_COMPLETED.to_string()),
            )?;
        }

        if !self.already_requested(&request.run_id, &reflection_id)? {
            let payload = to_object(json!({
                "reflection_id": reflection_id,
                "run_id": request.run_id.as_str(),
                "session_id": session_id,
                "attempt": request.attempt,
                "criteria_hash": criteria_snapshot.criteria_hash,
                "criteria_snapshot_ref": criteria_snapshot.criteria_hash,
                "criteria_snapshot": criteria_snapshot.to_audit_json(),
                "executor_id": ACCEPTANCE_EXECUTOR_ID,
            }));
            self.append_lifecycle(
                &request.run_id,
                EVENT_REFLECTION_REQUESTED,
                payload,
                Some(format!("{EVENT_REFLECTION_REQUESTED}:{reflection_id}")),
            )?;
        }

        let result = self.evaluator.evaluate(
            &criteria_snapshot,
            &evidence,
            &EvaluationContext {
                attempt: request.attempt,
                max_replan_attempts: request.max_replan_attempts,
                previous_unmet_ids: None,
                tests_passed: Some(tests_passed),
                test_report_ref: Some(test_report_ref.clone()),
            },
        )?;

        let payload = to_object(json!({
            "reflection_id": reflection_id,
            "run_id": request.run_id.as_str(),
            "session_id": session_id,
            "attempt": request.attempt,
            "verdict": result.verdict.as_str(),
            "executor_id": ACCEPTANCE_EXECUTOR_ID,
            "unmet_criteria": result.unmet_criteria,
            "evidence_map": result.evidence_map,
            "missing_evidence": result.missing_evidence,
            "user_questions": result.user_questions,
            "replan_constraints": result.replan_constraints,
            "test_report_ref": test_report_ref,
        }));
        self.append_lifecycle(
            &request.run_id,
            EVENT_REFLECTION_COMPLETED,
            payload,
            Some(format!("{EVENT_REFLECTION_COMPLETED}:{reflection_id}")),
        )?;

        if result.verdict == AcceptanceVerdict::Replan {
            self.publish_adjustment_requested(request, &reflection_id, &result).await?;
        }

        Ok(result)
    }

    /// Returns true when this reflection already completed.
    fn already_reflected(
        &self,
        run_id: &RunId,
        reflection_id: &str,
    ) -> Result<bool, AcceptanceError> {
        let rows =
            self.journal.list_by_type(run_id, EventChannel::Lifecycle, EVENT_REFLECTION_COMPLETED)?;
        Ok(rows.iter().any(|row| {
            row.payload.get("reflection_id").and_then(Value::as_str) == Some(reflection_id)
        }))
    }

    /// Returns true when this reflection was already requested.
    fn already_requested(
        &self,
        run_id: &RunId,
        reflection_id: &str,
    ) -> Result<bool, AcceptanceError> {
        let rows =
            self.journal.list_by_type(run_id, EventChannel::Lifecycle, EVENT_REFLECTION_REQUESTED)?;
        Ok(rows.iter().any(|row| {
            row.payload.get("reflection_id").and_then(Value::as_str) == Some(reflection_id)
        }))
    }

    /// Returns `(passed, ref)` for the deterministic test report, creating it
    /// idempotently when absent.
    fn get_or_create_test_report(
        &self,
        request: &AcceptanceRequest,
        reflection_id: &str,
        criteria_snapshot: &CriteriaSnapshot,
        evidence: &RunEvidenceSnapshot,
    ) -> Result<(bool, String), AcceptanceError> {
        let rows =
            self.journal.list_by_type(&request.run_id, EventChannel::Lifecycle, EVENT_TEST_REPORT)?;
        for row in rows {
            if row.payload.get("reflection_id").and_then(Value::as_str) != Some(reflection_id) {
                continue;
            }
            let passed = row.payload.get("status").and_then(Value::as_str) == Some("passed");
            let reference =
                format_run_event_ref(&request.run_id, EventChannel::Lifecycle, row.event_id);
            return Ok((passed, reference));
        }

        let summary = &evidence.execution_summary;
        let mut checks = vec![json!({
            "check": "terminal_event",
            "passed": summary.terminal_event_type.as_deref() == Some(EVENT_WORKFLOW_COMPLETE),
        })];
        if summary.confirm_required {
            checks.push(json!({
                "check": "confirm_allow",
                "passed": summary.confirm_decision.as_deref() == Some("allow"),
            }));
        }
        let passed = checks
            .iter()
            .all(|check| check.get("passed").and_then(Value::as_bool) == Some(true));

        let payload = to_object(json!({
            "reflection_id": reflection_id,
            "workflow_id": request.workflow_id.as_str(),
            "run_id": request.run_id.as_str(),
            "attempt": request.attempt,
            "executor_id": ACCEPTANCE_EXECUTOR_ID,
            "status": if passed { "passed" } else { "failed" },
            "checks": checks,
            "criteria_hash": criteria_snapshot.criteria_hash,
        }));
        let persisted = self.append_lifecycle(
            &request.run_id,
            EVENT_TEST_REPORT,
            payload,
            Some(format!("{EVENT_TEST_REPORT}:{reflection_id}")),
        )?;
        let reference =
            format_run_event_ref(&request.run_id, EventChannel::Lifecycle, persisted.event_id);
        Ok((passed, reference))
    }

    /// Persists the adjustment row and publishes the REPLAN signal at most
    /// once across concurrent orchestrators.
    async fn publish_adjustment_requested(
        &self,
        request: &AcceptanceRequest,
        reflection_id: &str,
        result: &AcceptanceResult,
    ) -> Result<(), AcceptanceError> {
        let payload = to_object(json!({
            "from_reflection_id": reflection_id,
            "next_attempt": request.attempt + 1,
            "unmet_criteria": result.unmet_criteria,
            "missing_evidence": result.missing_evidence,
            "constraints": result.replan_constraints,
            "executor_id": ACCEPTANCE_EXECUTOR_ID,
        }));
        let persisted = self.append_lifecycle(
            &request.run_id,
            EVENT_ADJUSTMENT_REQUESTED,
            payload,
            Some(format!("{EVENT_ADJUSTMENT_REQUESTED}:{reflection_id}")),
        )?;

        // The freshly-inserted row is the publish witness.
        if persisted.deduped {
            return Ok(());
        }
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        bus.publish(DomainEvent::WorkflowAdjustmentRequested(AdjustmentRequested {
            source: ACCEPTANCE_EXECUTOR_ID.to_string(),
            workflow_id: request.workflow_id.clone(),
            run_id: request.run_id.clone(),
            reflection_id: reflection_id.to_string(),
            next_attempt: request.attempt + 1,
            unmet_criteria: result.unmet_criteria.clone(),
            missing_evidence: result.missing_evidence.clone(),
            constraints: result.replan_constraints.clone(),
        }))
        .await;
        Ok(())
    }

    /// Appends one lifecycle event through the recorder.
    fn append_lifecycle(
        &self,
        run_id: &RunId,
        event_type: &str,
        payload: Map<String, Value>,
        idempotency_key: Option<String>,
    ) -> Result<crate::core::RunEvent, AcceptanceError> {
        Ok(self.recorder.append(
            run_id,
            EventChannel::Lifecycle,
            event_type,
            payload,
            idempotency_key,
        )?)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the defensive not-terminal result (no side effects).
fn blocked_not_terminal(request: &AcceptanceRequest) -> AcceptanceResult {
    AcceptanceResult {
        verdict: AcceptanceVerdict::Blocked,
        attempt: request.attempt,
        max_replan_attempts: request.max_replan_attempts,
        unmet_criteria: Vec::new(),
        evidence_map: std::collections::BTreeMap::new(),
        missing_evidence: Vec::new(),
        user_questions: Vec::new(),
        replan_constraints: Vec::new(),
        blocked_reason: Some("run_not_terminal".to_string()),
        test_report_ref: None,
    }
}

/// Coerces a JSON value into an object map.
fn to_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
