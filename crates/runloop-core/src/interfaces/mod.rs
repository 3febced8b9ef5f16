// runloop-core/src/interfaces/mod.rs
// ============================================================================
// Module: Runloop Interfaces
// Description: Backend-agnostic interfaces for storage, tools, and execution.
// Purpose: Define the contract surfaces used by the Runloop runtime.
// Dependencies: crate::core, async-trait, serde, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! Interfaces define how Runloop integrates with storage backends and
//! execution kernels without embedding backend-specific details.
//! Implementations must be deterministic and fail closed on missing or
//! invalid data. Repository traits are synchronous (stores guard their own
//! connections); the execution kernel is asynchronous and streams events
//! through a bounded channel.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::AgentId;
use crate::core::AppendEvent;
use crate::core::CorrelationId;
use crate::core::DecisionId;
use crate::core::EventChannel;
use crate::core::ExecutionEvent;
use crate::core::ProjectId;
use crate::core::Run;
use crate::core::RunEvent;
use crate::core::RunId;
use crate::core::RunStatus;
use crate::core::Timestamp;
use crate::core::ToolId;
use crate::core::WorkflowId;
use crate::core::WorkflowSpec;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Errors surfaced by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind label.
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },
    /// The request shape or payload was invalid.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Backend engine error.
    #[error("store error: {0}")]
    Store(String),
    /// Backend I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Stored data failed integrity checks.
    #[error("store corruption: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true when the error is a missing-entity error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// ============================================================================
// SECTION: Run Repository
// ============================================================================

/// Run row persistence with the CAS lifecycle primitive.
pub trait RunRepository: Send + Sync {
    /// Upserts a run row by `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn save(&self, run: &Run) -> Result<(), StoreError>;

    /// Returns the run with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no row exists.
    fn get_by_id(&self, run_id: &RunId) -> Result<Run, StoreError>;

    /// Returns the run with the given id, or `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn find_by_id(&self, run_id: &RunId) -> Result<Option<Run>, StoreError>;

    /// Returns true when a row exists for the id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn exists(&self, run_id: &RunId) -> Result<bool, StoreError>;

    /// Deletes the run and its journal rows; missing rows are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    fn delete(&self, run_id: &RunId) -> Result<(), StoreError>;

    /// Lists runs for a workflow, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn list_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Run>, StoreError>;

    /// Lists runs for a project, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn list_by_project_id(
        &self,
        project_id: &ProjectId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Run>, StoreError>;

    /// Lists runs originated by an agent, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn list_by_agent_id(&self, agent_id: &AgentId) -> Result<Vec<Run>, StoreError>;

    /// Counts runs for a workflow.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn count_by_workflow_id(&self, workflow_id: &WorkflowId) -> Result<usize, StoreError>;

    /// Conditionally transitions `expected → target` as one atomic statement.
    ///
    /// Returns true when exactly one row changed. Implementations set
    /// `started_at` on the first transition into `running` and persist
    /// `finished_at` when provided for terminal targets. This is the CAS
    /// primitive all lifecycle logic relies on; illegal `expected → target`
    /// pairs report false without touching the row, so no call sequence can
    /// take a run out of a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails (state mismatch is not an
    /// error; it reports `false`).
    fn update_status_if_current(
        &self,
        run_id: &RunId,
        expected: RunStatus,
        target: RunStatus,
        finished_at: Option<Timestamp>,
    ) -> Result<bool, StoreError>;
}

// ============================================================================
// SECTION: Event Journal
// ============================================================================

/// One page of an ordered journal listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPage {
    /// Events ordered by event id ascending.
    pub events: Vec<RunEvent>,
    /// Cursor for the next page, when more rows exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<i64>,
    /// True when rows remain past this page.
    pub has_more: bool,
}

/// Append-only per-run event journal.
pub trait RunEventJournal: Send + Sync {
    /// Appends an event, deduplicating by idempotency key and terminal type.
    ///
    /// When the event carries an `idempotency_key`, the append behaves as
    /// insert-or-get on `(run_id, channel, idempotency_key)` and the returned
    /// row has `deduped=true` on a hit. Terminal types deduplicate on
    /// `(run_id, channel, type)` even without a key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn append(&self, event: AppendEvent) -> Result<RunEvent, StoreError>;

    /// Lists events ordered by event id ascending with cursor pagination.
    ///
    /// `cursor` is the last event id of the previous page; only rows with a
    /// larger id are returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn list(
        &self,
        run_id: &RunId,
        channel: Option<EventChannel>,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<EventPage, StoreError>;

    /// Loads every event for a run across all channels.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn list_all(&self, run_id: &RunId) -> Result<Vec<RunEvent>, StoreError>;

    /// Loads events of one type on one channel, ordered by event id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn list_by_type(
        &self,
        run_id: &RunId,
        channel: EventChannel,
        event_type: &str,
    ) -> Result<Vec<RunEvent>, StoreError>;
}

// ============================================================================
// SECTION: Workflow Repository
// ============================================================================

/// Workflow specification persistence.
pub trait WorkflowRepository: Send + Sync {
    /// Returns the workflow with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no workflow exists.
    fn get_by_id(&self, workflow_id: &WorkflowId) -> Result<WorkflowSpec, StoreError>;

    /// Upserts a workflow specification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn save(&self, workflow: &WorkflowSpec) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Tool Repository
// ============================================================================

/// Tool publication status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Tool is published and selectable.
    Published,
    /// Tool is deprecated and must not be referenced.
    Deprecated,
}

/// Registered tool row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Tool identifier.
    pub tool_id: ToolId,
    /// Display name.
    pub name: String,
    /// Publication status.
    pub status: ToolStatus,
}

/// Tool registry consulted by validation and repair.
pub trait ToolRepository: Send + Sync {
    /// Returns the tool with the given id, when registered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn get(&self, tool_id: &ToolId) -> Result<Option<ToolRecord>, StoreError>;

    /// Lists all published (non-deprecated) tools.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn find_published(&self) -> Result<Vec<ToolRecord>, StoreError>;
}

// ============================================================================
// SECTION: Idempotency Store
// ============================================================================

/// Persisted results keyed by opaque idempotency keys.
pub trait IdempotencyStore: Send + Sync {
    /// Returns true when a result exists for the key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns the persisted result for the key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn get_result(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Persists a result under the key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn save_result(&self, key: &str, result: &Value) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Execution Event Sink
// ============================================================================

/// Injectable per-event sink for execution-channel persistence.
///
/// The entry treats sink failures as best-effort outside deterministic mode.
pub trait ExecutionEventSink: Send + Sync {
    /// Records one normalized execution event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the sink rejects the event.
    fn record(&self, run_id: &RunId, event: &ExecutionEvent) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Run Gate Errors
// ============================================================================

/// Fail-closed gate errors raised before or during a run claim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RunGateError {
    /// The run id does not exist.
    #[error("run_id not found: {run_id}")]
    RunNotFound {
        /// Run identifier that failed to resolve.
        run_id: String,
    },
    /// The run belongs to a different workflow.
    #[error("run_id does not belong to this workflow: {run_id}")]
    RunWrongWorkflow {
        /// Run identifier.
        run_id: String,
        /// Workflow the caller targeted.
        workflow_id: String,
    },
    /// The run is not in a claimable status.
    #[error("run is not executable (status={status})")]
    RunNotExecutable {
        /// Run identifier.
        run_id: String,
        /// Observed status.
        status: String,
    },
    /// A concurrent delivery already claimed the run.
    #[error("duplicate execution dropped (run already claimed): {run_id}")]
    DuplicateExecution {
        /// Run identifier.
        run_id: String,
    },
}

impl RunGateError {
    /// Returns the stable error code for the gate failure.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RunNotFound { .. } => "run_not_found",
            Self::RunWrongWorkflow { .. } => "run_wrong_workflow",
            Self::RunNotExecutable { .. } => "run_not_executable",
            Self::DuplicateExecution { .. } => "duplicate_execution",
        }
    }
}

// ============================================================================
// SECTION: Execution Kernel
// ============================================================================

/// Errors raised by the pre-execution policy gate.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy denied the request.
    #[error("policy denied: {reason}")]
    Denied {
        /// Stable denial reason.
        reason: String,
    },
    /// The policy itself failed.
    #[error("policy failure: {0}")]
    Failure(String),
}

/// Pre-execution policy consulted by the kernel gate.
#[async_trait]
pub trait ExecutionPolicy: Send + Sync {
    /// Checks whether the request may execute.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Denied`] to block execution.
    async fn check(&self, request: &KernelRequest) -> Result<(), PolicyError>;
}

/// Errors raised by [`ExecutionKernel::gate_execute`].
#[derive(Debug, Error)]
pub enum KernelError {
    /// The policy gate denied the request.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// The after-gate callback rejected the claim.
    #[error(transparent)]
    Gate(#[from] RunGateError),
    /// Storage failed inside the gate path.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Request handed to the execution kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelRequest {
    /// Workflow to execute.
    pub workflow_id: WorkflowId,
    /// Initial input value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Correlation identifier threading the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Decision that originated the request, when bridged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_decision_id: Option<DecisionId>,
}

/// Callback run inside the gate, after policy approval and before any kernel
/// side effects. The entry uses it to claim the run and persist
/// `workflow_start` only when the gate passes.
pub type AfterGate = Box<dyn FnOnce() -> Result<(), KernelError> + Send>;

/// Workflow execution kernel contract consumed by the run entry.
#[async_trait]
pub trait ExecutionKernel: Send + Sync {
    /// Runs the policy gate and, when allowed, the after-gate callback.
    ///
    /// Rejections must leave no side effects behind.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] when the policy denies or the callback rejects.
    async fn gate_execute(
        &self,
        request: &KernelRequest,
        after_gate: AfterGate,
    ) -> Result<(), KernelError>;

    /// Starts the kernel stream for an already-gated request.
    ///
    /// The returned channel yields `node_start`, `node_complete`,
    /// `node_error`, and exactly one terminal `workflow_complete` or
    /// `workflow_error`. A stream that closes without a terminal event is a
    /// contract violation the consumer must repair.
    fn stream_after_gate(&self, request: &KernelRequest) -> mpsc::Receiver<ExecutionEvent>;
}
