// runloop-core/src/runtime/entry.rs
// ============================================================================
// Module: Run Execution Entry
// Description: Authoritative streaming orchestrator for run execution.
// Purpose: Claim runs, gate side effects, stream events, and repair failures.
// Dependencies: crate::{core, interfaces, runtime}, serde_json, tokio
// ============================================================================

//! ## Overview
//! Every execution surface (HTTP streaming, agent bridge) funnels through
//! this entry so governance happens exactly once: fail-closed validation, the
//! atomic run claim, side-effect confirmation, execution-event contract
//! enforcement, the bounded config-only repair loop, and the terminal
//! persistence guarantee. Rejections before the claim are side-effect free;
//! after the claim, every exit path persists exactly one terminal lifecycle
//! event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::EVENT_ATTEMPT_FAILED;
use crate::core::EVENT_NODE_ERROR;
use crate::core::EVENT_REACT_LOOP_STARTED;
use crate::core::EVENT_REACT_PATCH_APPLIED;
use crate::core::EVENT_TERMINATION_REPORT;
use crate::core::EVENT_WORKFLOW_COMPLETE;
use crate::core::EVENT_WORKFLOW_CONFIRM_REQUIRED;
use crate::core::EVENT_WORKFLOW_CONFIRMED;
use crate::core::EVENT_WORKFLOW_ERROR;
use crate::core::EVENT_WORKFLOW_START;
use crate::core::EventChannel;
use crate::core::ExecutionEvent;
use crate::core::NodeId;
use crate::core::RunId;
use crate::core::RunStatus;
use crate::core::WorkflowId;
use crate::core::workflow::NodeType;
use crate::interfaces::ExecutionEventSink;
use crate::interfaces::ExecutionKernel;
use crate::interfaces::KernelError;
use crate::interfaces::KernelRequest;
use crate::interfaces::PolicyError;
use crate::interfaces::RunGateError;
use crate::interfaces::RunRepository;
use crate::interfaces::StoreError;
use crate::interfaces::ToolRepository;
use crate::interfaces::WorkflowRepository;
use crate::runtime::audit::AuditRecord;
use crate::runtime::audit::ExecutionAuditSink;
use crate::runtime::confirm::ConfirmDecision;
use crate::runtime::confirm::ConfirmError;
use crate::runtime::confirm::ConfirmationStore;
use crate::runtime::recorder::RunEventRecorder;
use crate::runtime::validator::ValidationError;
use crate::runtime::validator::WorkflowValidator;

// ============================================================================
// SECTION: Limits and Modes
// ============================================================================

/// Named bounds for the streaming entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLimits {
    /// Maximum execution attempts per stream.
    pub max_react_attempts: u32,
    /// Maximum consecutive failed attempts.
    pub max_consecutive_failures: u32,
    /// Maximum total repair-loop seconds.
    pub max_react_seconds: u64,
    /// Maximum model calls per stream.
    pub max_llm_calls: u32,
    /// Confirmation wait budget in seconds.
    pub confirm_timeout_seconds: u64,
}

impl Default for EntryLimits {
    fn default() -> Self {
        Self {
            max_react_attempts: 6,
            max_consecutive_failures: 3,
            max_react_seconds: 600,
            max_llm_calls: 20,
            confirm_timeout_seconds: 300,
        }
    }
}

/// Per-event persistence strategy for the execution channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceMode {
    /// Synchronous persistence through the recorder on every event.
    #[default]
    Deterministic,
    /// Best-effort persistence through the configured sink.
    Production,
}

/// Capacity of the entry's downstream event channel.
const ENTRY_CHANNEL_CAPACITY: usize = 32;
/// Cap on recorded repair patches in the termination report.
const MAX_REPORTED_PATCHES: usize = 20;
/// Minimum node timeout after a repair patch, in seconds.
const PATCH_TIMEOUT_FLOOR_SECONDS: f64 = 10.0;
/// Maximum node timeout after a repair patch, in seconds.
const PATCH_TIMEOUT_CEIL_SECONDS: f64 = 300.0;
/// Default node timeout assumed when none is configured, in seconds.
const PATCH_TIMEOUT_DEFAULT_SECONDS: f64 = 30.0;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the entry's prepare phase.
#[derive(Debug, Error)]
pub enum EntryError {
    /// An argument was blank or malformed.
    #[error("{0}")]
    DomainValidation(String),
    /// The workflow failed fail-closed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The run state forbids execution.
    #[error(transparent)]
    Gate(#[from] RunGateError),
    /// The policy gate denied execution.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<KernelError> for EntryError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::Policy(inner) => Self::Policy(inner),
            KernelError::Gate(inner) => Self::Gate(inner),
            KernelError::Store(inner) => Self::Store(inner),
        }
    }
}

// ============================================================================
// SECTION: Requests and Results
// ============================================================================

/// Execution request accepted by the entry.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    /// Workflow to execute.
    pub workflow_id: WorkflowId,
    /// Run to claim.
    pub run_id: RunId,
    /// Initial input value.
    pub input: Option<Value>,
    /// Correlation identifier threading the request.
    pub correlation_id: Option<String>,
    /// Decision that originated the request, when bridged.
    pub original_decision_id: Option<String>,
}

impl EntryRequest {
    /// Creates a request with only the required identifiers.
    #[must_use]
    pub const fn new(workflow_id: WorkflowId, run_id: RunId) -> Self {
        Self { workflow_id, run_id, input: None, correlation_id: None, original_decision_id: None }
    }

    /// Returns the kernel-facing request shape.
    fn kernel_request(&self) -> KernelRequest {
        KernelRequest {
            workflow_id: self.workflow_id.clone(),
            input: self.input.clone(),
            correlation_id: self.correlation_id.clone().map(Into::into),
            original_decision_id: self.original_decision_id.clone().map(Into::into),
        }
    }
}

/// Summary of a fully-awaited execution.
#[derive(Debug, Clone)]
pub struct ExecutionResults {
    /// True when the stream completed and the run reached `completed`.
    pub success: bool,
    /// Final run status label.
    pub status: String,
    /// Executed workflow identifier.
    pub workflow_id: WorkflowId,
    /// Executed run identifier.
    pub run_id: RunId,
    /// Identifier of the executing entry.
    pub executor_id: String,
    /// Every yielded event in stream order.
    pub events: Vec<ExecutionEvent>,
}

// ============================================================================
// SECTION: Terminal Guard
// ============================================================================

/// Tracks the terminal-persistence guarantee for one stream.
///
/// Exactly one terminal lifecycle event is persisted per stream: explicit
/// exit paths call [`TerminalGuard::persist_terminal`], and dropping an
/// unresolved guard writes the defensive `missing_terminal_event` error.
struct TerminalGuard {
    /// Recorder for lifecycle appends.
    recorder: Arc<RunEventRecorder>,
    /// Audit sink for terminal records.
    audit: Arc<dyn ExecutionAuditSink>,
    /// Run identifier.
    run_id: RunId,
    /// Workflow identifier.
    workflow_id: WorkflowId,
    /// Executor identifier stamped into payloads.
    executor_id: String,
    /// True once a terminal lifecycle event was persisted.
    persisted: bool,
}

impl TerminalGuard {
    /// Creates a guard for one stream.
    fn new(
        recorder: Arc<RunEventRecorder>,
        audit: Arc<dyn ExecutionAuditSink>,
        run_id: RunId,
        workflow_id: WorkflowId,
        executor_id: String,
    ) -> Self {
        Self { recorder, audit, run_id, workflow_id, executor_id, persisted: false }
    }

    /// Persists a terminal lifecycle event once; later calls are no-ops.
    fn persist_terminal(&mut self, event_type: &str, extra: Map<String, Value>) {
        if self.persisted {
            return;
        }
        let mut payload = extra;
        payload.insert("workflow_id".to_string(), Value::from(self.workflow_id.as_str()));
        payload.insert("executor_id".to_string(), Value::from(self.executor_id.as_str()));
        let appended = self.recorder.append(
            &self.run_id,
            EventChannel::Lifecycle,
            event_type,
            payload,
            None,
        );
        if appended.is_ok() {
            self.audit.record(
                AuditRecord::new("run_execution_terminal_persisted")
                    .with("workflow_id", self.workflow_id.as_str())
                    .with("run_id", self.run_id.as_str())
                    .with("event_type", event_type),
            );
        }
        self.persisted = true;
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if !self.persisted {
            let mut payload = Map::new();
            payload.insert("error".to_string(), Value::from("missing_terminal_event"));
            self.persist_terminal(EVENT_WORKFLOW_ERROR, payload);
        }
    }
}

// ============================================================================
// SECTION: Entry
// ============================================================================

/// Authoritative run execution entry shared by all execution surfaces.
///
/// Cloning is shallow: clones share the same stores and confirmation state.
#[derive(Clone)]
pub struct RunExecutionEntry {
    /// Workflow repository.
    workflows: Arc<dyn WorkflowRepository>,
    /// Run repository.
    runs: Arc<dyn RunRepository>,
    /// Fail-closed workflow validator.
    validator: Arc<WorkflowValidator>,
    /// Lifecycle-driving event recorder.
    recorder: Arc<RunEventRecorder>,
    /// Execution kernel.
    kernel: Arc<dyn ExecutionKernel>,
    /// Confirmation store for side-effect gating.
    confirmations: Arc<ConfirmationStore>,
    /// Tool registry for repair patches.
    tools: Arc<dyn ToolRepository>,
    /// Audit sink.
    audit: Arc<dyn ExecutionAuditSink>,
    /// Optional per-event sink used in production mode.
    sink: Option<Arc<dyn ExecutionEventSink>>,
    /// Identifier stamped onto every yielded event.
    executor_id: String,
    /// Named bounds.
    limits: EntryLimits,
    /// Per-event persistence strategy.
    mode: PersistenceMode,
}

impl RunExecutionEntry {
    /// Creates an entry over the given collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "Startup wiring enumerates every seam once.")]
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        runs: Arc<dyn RunRepository>,
        validator: Arc<WorkflowValidator>,
        recorder: Arc<RunEventRecorder>,
        kernel: Arc<dyn ExecutionKernel>,
        confirmations: Arc<ConfirmationStore>,
        tools: Arc<dyn ToolRepository>,
        audit: Arc<dyn ExecutionAuditSink>,
        executor_id: impl Into<String>,
        limits: EntryLimits,
        mode: PersistenceMode,
    ) -> Self {
        Self {
            workflows,
            runs,
            validator,
            recorder,
            kernel,
            confirmations,
            tools,
            audit,
            sink: None,
            executor_id: executor_id.into(),
            limits,
            mode,
        }
    }

    /// Injects a custom execution-event sink for production mode.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ExecutionEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Returns the entry's executor identifier.
    #[must_use]
    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    // ------------------------------------------------------------------
    // Prepare
    // ------------------------------------------------------------------

    /// Validates the workflow and claims the run atomically.
    ///
    /// Ordered, fail-closed: workflow validation, then the run gate, then the
    /// kernel policy gate. The claim and the `workflow_start` lifecycle event
    /// happen inside the after-gate callback, so rejections never leave
    /// journal rows behind.
    ///
    /// # Errors
    ///
    /// Returns [`EntryError`] describing the first failed gate.
    pub async fn prepare(&self, request: &EntryRequest) -> Result<(), EntryError> {
        let (workflow_id, run_id) = normalize_ids(&request.workflow_id, &request.run_id)?;

        let workflow = self.workflows.get_by_id(&workflow_id)?;
        self.validator.validate_for_execution(&workflow)?;
        self.validate_run_gate(&workflow_id, &run_id)?;

        let runs = Arc::clone(&self.runs);
        let recorder = Arc::clone(&self.recorder);
        let audit = Arc::clone(&self.audit);
        let executor_id = self.executor_id.clone();
        let claim_workflow_id = workflow_id.clone();
        let claim_run_id = run_id.clone();
        let correlation_id = request.correlation_id.clone();
        let original_decision_id = request.original_decision_id.clone();

        let after_gate = Box::new(move || {
            // Duplicate deliveries may pass the pre-gate status check
            // concurrently; the CAS is the single source of suppression.
            let claimed = runs
                .update_status_if_current(
                    &claim_run_id,
                    RunStatus::Created,
                    RunStatus::Running,
                    None,
                )
                .map_err(KernelError::Store)?;
            if !claimed {
                audit.record(
                    AuditRecord::new("run_execution_duplicate_dropped")
                        .with("workflow_id", claim_workflow_id.as_str())
                        .with("run_id", claim_run_id.as_str())
                        .with("correlation_id", correlation_id.unwrap_or_default())
                        .with("original_decision_id", original_decision_id.unwrap_or_default()),
                );
                return Err(KernelError::Gate(RunGateError::DuplicateExecution {
                    run_id: claim_run_id.as_str().to_string(),
                }));
            }
            let mut payload = Map::new();
            payload.insert("workflow_id".to_string(), Value::from(claim_workflow_id.as_str()));
            payload.insert("executor_id".to_string(), Value::from(executor_id.as_str()));
            recorder
                .append(&claim_run_id, EventChannel::Lifecycle, EVENT_WORKFLOW_START, payload, None)
                .map_err(KernelError::Store)?;
            Ok(())
        });

        self.kernel.gate_execute(&request.kernel_request(), after_gate).await?;
        Ok(())
    }

    /// Checks that the run exists, matches the workflow, and is claimable.
    fn validate_run_gate(
        &self,
        workflow_id: &WorkflowId,
        run_id: &RunId,
    ) -> Result<(), EntryError> {
        let run = match self.runs.get_by_id(run_id) {
            Ok(run) => run,
            Err(error) if error.is_not_found() => {
                return Err(EntryError::Gate(RunGateError::RunNotFound {
                    run_id: run_id.as_str().to_string(),
                }));
            }
            Err(error) => return Err(EntryError::Store(error)),
        };

        if run.workflow_id != *workflow_id {
            return Err(EntryError::Gate(RunGateError::RunWrongWorkflow {
                run_id: run_id.as_str().to_string(),
                workflow_id: workflow_id.as_str().to_string(),
            }));
        }
        if run.status != RunStatus::Created {
            return Err(EntryError::Gate(RunGateError::RunNotExecutable {
                run_id: run_id.as_str().to_string(),
                status: run.status.as_str().to_string(),
            }));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------

    /// Streams execution events for an already-prepared run.
    ///
    /// The returned channel yields normalized events; the driver task owns
    /// the terminal-persistence guarantee and keeps running the finalizer
    /// even when the consumer disconnects.
    #[must_use]
    pub fn stream_after_gate(&self, request: EntryRequest) -> mpsc::Receiver<ExecutionEvent> {
        let (sender, receiver) = mpsc::channel(ENTRY_CHANNEL_CAPACITY);
        let entry = self.clone();
        tokio::spawn(async move {
            entry.drive_stream(request, sender).await;
        });
        receiver
    }

    /// Prepares and then streams.
    ///
    /// # Errors
    ///
    /// Returns [`EntryError`] when any prepare gate rejects.
    pub async fn execute_streaming(
        &self,
        request: EntryRequest,
    ) -> Result<mpsc::Receiver<ExecutionEvent>, EntryError> {
        self.prepare(&request).await?;
        Ok(self.stream_after_gate(request))
    }

    /// Prepares, streams to completion, and returns a summary.
    ///
    /// # Errors
    ///
    /// Returns [`EntryError`] when any prepare gate rejects.
    pub async fn execute_with_results(
        &self,
        request: EntryRequest,
    ) -> Result<ExecutionResults, EntryError> {
        let workflow_id = request.workflow_id.clone();
        let run_id = request.run_id.clone();
        let mut receiver = self.execute_streaming(request).await?;

        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }

        let terminal_type = events.last().map(|event| event.event_type.clone());
        let (status, run_completed) = self.runs.find_by_id(&run_id).ok().flatten().map_or_else(
            || ("unknown".to_string(), false),
            |run| (run.status.as_str().to_string(), run.status == RunStatus::Completed),
        );

        Ok(ExecutionResults {
            success: terminal_type.as_deref() == Some(EVENT_WORKFLOW_COMPLETE) && run_completed,
            status,
            workflow_id,
            run_id,
            executor_id: events
                .last()
                .and_then(|event| event.str_field("executor_id"))
                .unwrap_or(&self.executor_id)
                .to_string(),
            events,
        })
    }

    // ------------------------------------------------------------------
    // Stream driver
    // ------------------------------------------------------------------

    /// Drives one stream to its terminal event.
    async fn drive_stream(&self, request: EntryRequest, sender: mpsc::Sender<ExecutionEvent>) {
        let workflow_id = request.workflow_id.clone();
        let run_id = request.run_id.clone();
        let mut guard = TerminalGuard::new(
            Arc::clone(&self.recorder),
            Arc::clone(&self.audit),
            run_id.clone(),
            workflow_id.clone(),
            self.executor_id.clone(),
        );

        let workflow = match self.workflows.get_by_id(&workflow_id) {
            Ok(workflow) => workflow,
            Err(error) => {
                let event = self.normalize(
                    ExecutionEvent::new(EVENT_WORKFLOW_ERROR).with("error", error.to_string()),
                    &run_id,
                );
                let _ = self.record_execution_event(&run_id, &event);
                let mut payload = Map::new();
                payload.insert("error".to_string(), Value::from(error.to_string()));
                guard.persist_terminal(EVENT_WORKFLOW_ERROR, payload);
                let _ = sender.send(event).await;
                return;
            }
        };

        if let Some(node_id) = workflow.first_side_effect_node() {
            let allowed =
                self.run_confirmation_gate(&workflow_id, &run_id, &node_id, &sender, &mut guard)
                    .await;
            if !allowed {
                return;
            }
        }

        self.run_attempt_loop(&request, &run_id, &workflow_id, &sender, &mut guard).await;
    }

    /// Runs the side-effect confirmation gate. Returns true when execution
    /// may proceed; on deny/timeout/cancel the terminal error is already
    /// persisted and yielded.
    async fn run_confirmation_gate(
        &self,
        workflow_id: &WorkflowId,
        run_id: &RunId,
        node_id: &NodeId,
        sender: &mpsc::Sender<ExecutionEvent>,
        guard: &mut TerminalGuard,
    ) -> bool {
        let pending = match self.confirmations.create_or_get_pending(run_id, workflow_id, node_id)
        {
            Ok(pending) => pending,
            Err(error) => {
                let event = self.normalize(
                    ExecutionEvent::new(EVENT_WORKFLOW_ERROR)
                        .with("error", "confirmation_unavailable")
                        .with("reason", error.to_string()),
                    run_id,
                );
                let _ = self.record_execution_event(run_id, &event);
                let mut payload = Map::new();
                payload.insert("error".to_string(), Value::from("confirmation_unavailable"));
                guard.persist_terminal(EVENT_WORKFLOW_ERROR, payload);
                let _ = sender.send(event).await;
                return false;
            }
        };

        let confirm_required = self.normalize(
            ExecutionEvent::new(EVENT_WORKFLOW_CONFIRM_REQUIRED)
                .with("workflow_id", workflow_id.as_str())
                .with("node_id", node_id.as_str())
                .with("confirm_id", pending.confirm_id.as_str())
                .with("default_decision", ConfirmDecision::Deny.as_str()),
            run_id,
        );
        let _ = self.record_execution_event(run_id, &confirm_required);
        if sender.send(confirm_required).await.is_err() {
            self.persist_stream_cancelled(guard);
            return false;
        }

        let timeout = Duration::from_secs(self.limits.confirm_timeout_seconds);
        let (decision, deny_reason) =
            match self.confirmations.wait_for_decision(&pending.confirm_id, timeout).await {
                Ok(decision) => (decision, "user_denied"),
                Err(ConfirmError::Timeout) => (ConfirmDecision::Deny, "confirm_timeout"),
                Err(_) => (ConfirmDecision::Deny, "confirm_unavailable"),
            };

        let confirmed = self.normalize(
            ExecutionEvent::new(EVENT_WORKFLOW_CONFIRMED)
                .with("workflow_id", workflow_id.as_str())
                .with("node_id", node_id.as_str())
                .with("confirm_id", pending.confirm_id.as_str())
                .with("decision", decision.as_str()),
            run_id,
        );
        let _ = self.record_execution_event(run_id, &confirmed);
        if sender.send(confirmed).await.is_err() {
            self.persist_stream_cancelled(guard);
            return false;
        }

        if decision != ConfirmDecision::Allow {
            let denied = self.normalize(
                ExecutionEvent::new(EVENT_WORKFLOW_ERROR)
                    .with("error", "side_effect_confirm_denied")
                    .with("reason", deny_reason)
                    .with("confirm_id", pending.confirm_id.as_str()),
                run_id,
            );
            let _ = self.record_execution_event(run_id, &denied);
            let mut payload = Map::new();
            payload.insert("error".to_string(), Value::from("side_effect_confirm_denied"));
            payload.insert("reason".to_string(), Value::from(deny_reason));
            payload.insert("confirm_id".to_string(), Value::from(pending.confirm_id.as_str()));
            guard.persist_terminal(EVENT_WORKFLOW_ERROR, payload);
            let _ = sender.send(denied).await;
            return false;
        }
        true
    }

    /// Consumes kernel streams with the bounded repair loop.
    #[allow(
        clippy::too_many_lines,
        reason = "The attempt loop mirrors one state machine; splitting it would scatter the exit paths."
    )]
    async fn run_attempt_loop(
        &self,
        request: &EntryRequest,
        run_id: &RunId,
        workflow_id: &WorkflowId,
        sender: &mpsc::Sender<ExecutionEvent>,
        guard: &mut TerminalGuard,
    ) {
        let started_at = Instant::now();
        let mut attempt: u32 = 1;
        let mut consecutive_failures: u32 = 0;
        let llm_calls: u32 = 0;
        let mut react_started = false;
        let mut patches: Vec<Value> = Vec::new();

        loop {
            eprintln!("DEBUG loop top attempt={attempt} consecutive_failures={consecutive_failures}");
            let mut kernel_events = self.kernel.stream_after_gate(&request.kernel_request());
            let mut last_node_error: Option<ExecutionEvent> = None;
            let mut terminal_error: Option<ExecutionEvent> = None;

            while let Some(raw_event) = kernel_events.recv().await {
                eprintln!("DEBUG raw_event type={}", raw_event.event_type);
                let mut event = self.normalize(raw_event, run_id);
                event.set_default("attempt", attempt);

                if event.validate_contract().is_err() {
                    let invalid_type = event.event_type.clone();
                    self.audit.record(
                        AuditRecord::new("run_execution_event_contract_violation")
                            .with("workflow_id", workflow_id.as_str())
                            .with("run_id", run_id.as_str())
                            .with("invalid_type", invalid_type.clone()),
                    );
                    let violation = self.normalize(
                        ExecutionEvent::new(EVENT_WORKFLOW_ERROR)
                            .with("error", "invalid_execution_event_type")
                            .with("invalid_type", invalid_type.clone())
                            .with("attempt", attempt),
                        run_id,
                    );
                    let _ = self.record_execution_event(run_id, &violation);
                    let mut payload = Map::new();
                    payload
                        .insert("error".to_string(), Value::from("invalid_execution_event_type"));
                    payload.insert("invalid_type".to_string(), Value::from(invalid_type));
                    guard.persist_terminal(EVENT_WORKFLOW_ERROR, payload);
                    let _ = sender.send(violation).await;
                    return;
                }

                if event.event_type == EVENT_NODE_ERROR {
                    last_node_error = Some(event.clone());
                }

                if event.event_type == EVENT_WORKFLOW_COMPLETE {
                    let _ = self.record_execution_event(run_id, &event);
                    guard.persist_terminal(EVENT_WORKFLOW_COMPLETE, Map::new());
                    let _ = sender.send(event).await;
                    return;
                }

                if event.event_type == EVENT_WORKFLOW_ERROR {
                    terminal_error = Some(event);
                    break;
                }

                let _ = self.record_execution_event(run_id, &event);
                if sender.send(event).await.is_err() {
                    self.persist_stream_cancelled(guard);
                    return;
                }
            }

            let Some(mut terminal_error) = terminal_error else {
                // Kernel closed without a terminal event.
                let missing = self.normalize(
                    ExecutionEvent::new(EVENT_WORKFLOW_ERROR)
                        .with("error", "missing_terminal_event")
                        .with("attempt", attempt),
                    run_id,
                );
                let _ = self.record_execution_event(run_id, &missing);
                let mut payload = Map::new();
                payload.insert("error".to_string(), Value::from("missing_terminal_event"));
                guard.persist_terminal(EVENT_WORKFLOW_ERROR, payload);
                let _ = sender.send(missing).await;
                return;
            };

            // Attempt failed: enter the config-only repair loop.
            consecutive_failures += 1;
            let last_error = last_node_error.clone().unwrap_or_else(|| terminal_error.clone());

            if !react_started {
                react_started = true;
                let loop_started = self.normalize(
                    ExecutionEvent::new(EVENT_REACT_LOOP_STARTED)
                        .with("workflow_id", workflow_id.as_str())
                        .with("patch_scope", "config-only")
                        .with("max_attempts", self.limits.max_react_attempts)
                        .with("max_consecutive_failures", self.limits.max_consecutive_failures)
                        .with("max_seconds", self.limits.max_react_seconds)
                        .with("max_llm_calls", self.limits.max_llm_calls)
                        .with("attempt", attempt),
                    run_id,
                );
                let _ = self.record_execution_event(run_id, &loop_started);
                if sender.send(loop_started).await.is_err() {
                    self.persist_stream_cancelled(guard);
                    return;
                }
            }

            let attempt_failed = self.normalize(
                ExecutionEvent::new(EVENT_ATTEMPT_FAILED)
                    .with("workflow_id", workflow_id.as_str())
                    .with("attempt", attempt)
                    .with(
                        "error",
                        terminal_error.str_field("error").unwrap_or_default().to_string(),
                    )
                    .with(
                        "error_type",
                        last_error.str_field("error_type").unwrap_or_default().to_string(),
                    )
                    .with("retryable", last_error.bool_field("retryable").unwrap_or(false))
                    .with("node_id", last_error.str_field("node_id").unwrap_or_default().to_string()),
                run_id,
            );
            let _ = self.record_execution_event(run_id, &attempt_failed);
            if sender.send(attempt_failed).await.is_err() {
                self.persist_stream_cancelled(guard);
                return;
            }

            let stop_reason =
                self.should_stop(attempt, consecutive_failures, llm_calls, started_at);
            if let Some(stop_reason) = stop_reason {
                let report = self.build_termination_report(
                    workflow_id,
                    run_id,
                    stop_reason,
                    stop_reason,
                    &last_error,
                    attempt,
                    consecutive_failures,
                    llm_calls,
                    started_at,
                    &patches,
                );
                let _ = self.record_execution_event(run_id, &report);
                let _ = sender.send(report).await;

                let mut payload = Map::new();
                payload.insert("error".to_string(), Value::from("react_stop"));
                payload.insert("reason".to_string(), Value::from(stop_reason));
                guard.persist_terminal(EVENT_WORKFLOW_ERROR, payload);

                terminal_error.set_default("attempt", attempt);
                let _ = self.record_execution_event(run_id, &terminal_error);
                let _ = sender.send(terminal_error).await;
                return;
            }

            match self.apply_config_only_patch(workflow_id, &last_error) {
                Ok(patch) => {
                    let mut recorded = patch.clone();
                    if let Value::Object(map) = &mut recorded {
                        map.insert("attempt".to_string(), Value::from(attempt));
                    }
                    patches.push(recorded);
                    let patch_applied = self.normalize(
                        ExecutionEvent::new(EVENT_REACT_PATCH_APPLIED)
                            .with("workflow_id", workflow_id.as_str())
                            .with("attempt", attempt)
                            .with("patch", patch)
                            .with("patch_scope", "config-only"),
                        run_id,
                    );
                    let _ = self.record_execution_event(run_id, &patch_applied);
                    if sender.send(patch_applied).await.is_err() {
                        self.persist_stream_cancelled(guard);
                        return;
                    }
                    attempt += 1;
                }
                Err(_rejection) => {
                    let report = self.build_termination_report(
                        workflow_id,
                        run_id,
                        "unrepairable_error",
                        "no_applicable_patch",
                        &last_error,
                        attempt,
                        consecutive_failures,
                        llm_calls,
                        started_at,
                        &patches,
                    );
                    let _ = self.record_execution_event(run_id, &report);
                    let _ = sender.send(report).await;

                    let _ = self.record_execution_event(run_id, &terminal_error);
                    let mut payload = Map::new();
                    payload.insert("error".to_string(), Value::from("react_unrepairable"));
                    guard.persist_terminal(EVENT_WORKFLOW_ERROR, payload);
                    let _ = sender.send(terminal_error).await;
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Repair
    // ------------------------------------------------------------------

    /// Returns the stop reason when any repair bound is exhausted.
    fn should_stop(
        &self,
        attempt: u32,
        consecutive_failures: u32,
        llm_calls: u32,
        started_at: Instant,
    ) -> Option<&'static str> {
        if attempt >= self.limits.max_react_attempts {
            return Some("max_attempts");
        }
        if consecutive_failures >= self.limits.max_consecutive_failures {
            return Some("consecutive_failures");
        }
        if llm_calls >= self.limits.max_llm_calls {
            return Some("max_llm_calls");
        }
        if started_at.elapsed() >= Duration::from_secs(self.limits.max_react_seconds) {
            return Some("max_elapsed");
        }
        None
    }

    /// Builds the termination report preceding the final terminal error.
    #[allow(clippy::too_many_arguments, reason = "The report aggregates every loop counter.")]
    fn build_termination_report(
        &self,
        workflow_id: &WorkflowId,
        run_id: &RunId,
        stop_reason: &str,
        stop_condition: &str,
        last_error: &ExecutionEvent,
        attempt: u32,
        consecutive_failures: u32,
        llm_calls: u32,
        started_at: Instant,
        patches: &[Value],
    ) -> ExecutionEvent {
        let mut last_error_payload = Map::new();
        for key in
            ["node_id", "node_type", "error", "error_type", "retryable", "message", "attempt"]
        {
            if let Some(value) = last_error.fields.get(key)
                && !value.is_null()
            {
                last_error_payload.insert(key.to_string(), value.clone());
            }
        }
        let elapsed_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.normalize(
            ExecutionEvent::new(EVENT_TERMINATION_REPORT)
                .with("workflow_id", workflow_id.as_str())
                .with("patch_scope", "config-only")
                .with("stop_reason", stop_reason)
                .with("stop_condition", stop_condition)
                .with("attempts_total", attempt)
                .with("consecutive_failures", consecutive_failures)
                .with("llm_calls", llm_calls)
                .with("elapsed_ms", elapsed_ms)
                .with("last_error", Value::Object(last_error_payload))
                .with("patches", Value::Array(patches.iter().take(MAX_REPORTED_PATCHES).cloned().collect())),
            run_id,
        )
    }

    /// Attempts a config-only patch for the failed node.
    ///
    /// # Errors
    ///
    /// Returns a structured rejection reason when no patch applies; the
    /// caller emits a termination report and gives up.
    fn apply_config_only_patch(
        &self,
        workflow_id: &WorkflowId,
        error_event: &ExecutionEvent,
    ) -> Result<Value, Value> {
        let Some(node_id) = error_event.str_field("node_id") else {
            return Err(json!({"reason": "missing_node_id"}));
        };
        let node_id = NodeId::new(node_id.trim());
        let error_type = error_event.str_field("error_type").unwrap_or_default().trim().to_string();

        let mut workflow = self
            .workflows
            .get_by_id(workflow_id)
            .map_err(|error| json!({"reason": "workflow_unavailable", "detail": error.to_string()}))?;
        let node_ids_before: Vec<String> =
            workflow.nodes.iter().map(|node| node.node_id.as_str().to_string()).collect();
        let edge_ids_before: Vec<String> =
            workflow.edges.iter().map(|edge| edge.edge_id.as_str().to_string()).collect();

        let Some(node) = workflow.node(&node_id) else {
            return Err(json!({"reason": "node_not_found", "node_id": node_id.as_str()}));
        };
        let node_type = node.node_type;

        let mut changes = Map::new();
        let mut new_config = node.config.clone();

        if error_type == "timeout" || error_event.bool_field("retryable").unwrap_or(false) {
            let before = new_config.get("timeout").cloned();
            let current = before
                .as_ref()
                .and_then(Value::as_f64)
                .unwrap_or(PATCH_TIMEOUT_DEFAULT_SECONDS);
            let target =
                (current * 2.0).clamp(PATCH_TIMEOUT_FLOOR_SECONDS, PATCH_TIMEOUT_CEIL_SECONDS);
            new_config.insert("timeout".to_string(), Value::from(target));
            changes.insert(
                "timeout".to_string(),
                json!({"from": before.unwrap_or(Value::Null), "to": target}),
            );
        } else if error_type == "tool_not_found" {
            if node_type != NodeType::Tool {
                return Err(
                    json!({"reason": "tool_not_found_non_tool_node", "node_id": node_id.as_str()}),
                );
            }
            let candidates = self
                .tools
                .find_published()
                .map_err(|error| json!({"reason": "tool_repository_unavailable", "detail": error.to_string()}))?;
            if candidates.is_empty() {
                return Err(json!({"reason": "no_fallback_tools"}));
            }
            let before = new_config
                .get("tool_id")
                .or_else(|| new_config.get("toolId"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let Some(fallback) = candidates
                .iter()
                .find(|tool| Some(tool.tool_id.as_str().to_string()) != before)
            else {
                return Err(json!({"reason": "no_fallback_tools"}));
            };
            new_config
                .insert("tool_id".to_string(), Value::from(fallback.tool_id.as_str()));
            new_config.remove("toolId");
            changes.insert(
                "tool_id".to_string(),
                json!({
                    "from": before.map_or(Value::Null, Value::from),
                    "to": fallback.tool_id.as_str(),
                }),
            );
        } else {
            return Err(json!({"reason": "unsupported_error_type", "error_type": error_type}));
        }

        if let Some(node) = workflow.node_mut(&node_id) {
            node.config = new_config;
        }

        // Config-only means config-only: any topology diff aborts the repair.
        let node_ids_after: Vec<String> =
            workflow.nodes.iter().map(|node| node.node_id.as_str().to_string()).collect();
        let edge_ids_after: Vec<String> =
            workflow.edges.iter().map(|edge| edge.edge_id.as_str().to_string()).collect();
        if node_ids_after != node_ids_before || edge_ids_after != edge_ids_before {
            return Err(json!({"reason": "patch_scope_violation"}));
        }

        // The patched workflow must still pass the execution gate.
        if let Err(error) = self.validator.validate_for_execution(&workflow) {
            return Err(json!({"reason": "patch_validation_failed", "code": error.code()}));
        }
        self.workflows
            .save(&workflow)
            .map_err(|error| json!({"reason": "workflow_save_failed", "detail": error.to_string()}))?;

        Ok(json!({
            "node_id": node_id.as_str(),
            "error_type": error_type,
            "changes": Value::Object(changes),
        }))
    }

    // ------------------------------------------------------------------
    // Event plumbing
    // ------------------------------------------------------------------

    /// Stamps run and executor identifiers onto a raw event.
    fn normalize(&self, mut event: ExecutionEvent, run_id: &RunId) -> ExecutionEvent {
        event.set("run_id", run_id.as_str());
        event.set_default("executor_id", self.executor_id.as_str());
        event
    }

    /// Persists one execution-channel event according to the mode.
    fn record_execution_event(
        &self,
        run_id: &RunId,
        event: &ExecutionEvent,
    ) -> Result<(), StoreError> {
        match self.mode {
            PersistenceMode::Deterministic => {
                let mut payload = event.fields.clone();
                payload.remove("channel");
                self.recorder
                    .append(run_id, EventChannel::Execution, &event.event_type, payload, None)
                    .map(|_| ())
            }
            PersistenceMode::Production => {
                if let Some(sink) = &self.sink {
                    let _ = sink.record(run_id, event);
                } else {
                    let mut payload = event.fields.clone();
                    payload.remove("channel");
                    let _ = self.recorder.append(
                        run_id,
                        EventChannel::Execution,
                        &event.event_type,
                        payload,
                        None,
                    );
                }
                Ok(())
            }
        }
    }

    /// Persists the terminal error for a disconnected consumer.
    fn persist_stream_cancelled(&self, guard: &mut TerminalGuard) {
        let mut payload = Map::new();
        payload.insert("error".to_string(), Value::from("stream_cancelled"));
        guard.persist_terminal(EVENT_WORKFLOW_ERROR, payload);
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Trims and validates the identifier pair.
fn normalize_ids(
    workflow_id: &WorkflowId,
    run_id: &RunId,
) -> Result<(WorkflowId, RunId), EntryError> {
    let workflow = workflow_id.as_str().trim();
    if workflow.is_empty() {
        return Err(EntryError::DomainValidation("workflow_id is required".to_string()));
    }
    let run = run_id.as_str().trim();
    if run.is_empty() {
        return Err(EntryError::DomainValidation("run_id is required".to_string()));
    }
    Ok((WorkflowId::new(workflow), RunId::new(run)))
}
