// runloop-core/src/core/event.rs
// ============================================================================
// Module: Runloop Event Model
// Description: Journal rows, channels, taxonomy, and the execution contract.
// Purpose: Provide the append-only event vocabulary shared by all subsystems.
// Dependencies: crate::core::{identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Every run owns an append-only event journal partitioned into channels.
//! Execution-channel events mirror the kernel stream; lifecycle-channel events
//! carry process-level markers (terminal state, acceptance reflection). Event
//! order is defined by the store-assigned monotone event id, never wall-clock.
//!
//! The execution event contract is fail-closed: kernels may only emit the
//! types enumerated here, and unknown types abort the stream with a terminal
//! error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Types
// ============================================================================

/// Node execution started.
pub const EVENT_NODE_START: &str = "node_start";
/// Node execution finished successfully.
pub const EVENT_NODE_COMPLETE: &str = "node_complete";
/// Node execution failed.
pub const EVENT_NODE_ERROR: &str = "node_error";
/// Workflow stream opened after a successful claim.
pub const EVENT_WORKFLOW_START: &str = "workflow_start";
/// Terminal success marker.
pub const EVENT_WORKFLOW_COMPLETE: &str = "workflow_complete";
/// Terminal failure marker.
pub const EVENT_WORKFLOW_ERROR: &str = "workflow_error";
/// A side-effect node requires confirmation before execution.
pub const EVENT_WORKFLOW_CONFIRM_REQUIRED: &str = "workflow_confirm_required";
/// A confirmation decision was recorded.
pub const EVENT_WORKFLOW_CONFIRMED: &str = "workflow_confirmed";
/// The bounded repair loop started for this run.
pub const EVENT_REACT_LOOP_STARTED: &str = "workflow_react_loop_started";
/// One execution attempt failed.
pub const EVENT_ATTEMPT_FAILED: &str = "workflow_attempt_failed";
/// A config-only repair patch was applied.
pub const EVENT_REACT_PATCH_APPLIED: &str = "workflow_react_patch_applied";
/// The repair loop stopped; report precedes the final terminal error.
pub const EVENT_TERMINATION_REPORT: &str = "workflow_termination_report";
/// Acceptance: execution summary persisted for a terminal run.
pub const EVENT_EXECUTION_COMPLETED: &str = "workflow_execution_completed";
/// Acceptance: deterministic test report persisted.
pub const EVENT_TEST_REPORT: &str = "workflow_test_report";
/// Acceptance: reflection requested with a criteria snapshot.
pub const EVENT_REFLECTION_REQUESTED: &str = "workflow_reflection_requested";
/// Acceptance: reflection verdict persisted.
pub const EVENT_REFLECTION_COMPLETED: &str = "workflow_reflection_completed";
/// Acceptance: REPLAN adjustment requested.
pub const EVENT_ADJUSTMENT_REQUESTED: &str = "workflow_adjustment_requested";

/// Event types a kernel stream may legally emit.
const EXECUTION_CONTRACT_TYPES: &[&str] = &[
    EVENT_NODE_START,
    EVENT_NODE_COMPLETE,
    EVENT_NODE_ERROR,
    EVENT_WORKFLOW_START,
    EVENT_WORKFLOW_COMPLETE,
    EVENT_WORKFLOW_ERROR,
    EVENT_WORKFLOW_CONFIRM_REQUIRED,
    EVENT_WORKFLOW_CONFIRMED,
    EVENT_REACT_LOOP_STARTED,
    EVENT_ATTEMPT_FAILED,
    EVENT_REACT_PATCH_APPLIED,
    EVENT_TERMINATION_REPORT,
];

/// Returns true when the type is a terminal workflow marker.
#[must_use]
pub fn is_terminal_event_type(event_type: &str) -> bool {
    event_type == EVENT_WORKFLOW_COMPLETE || event_type == EVENT_WORKFLOW_ERROR
}

// ============================================================================
// SECTION: Channels
// ============================================================================

/// Logical subpartition of a run's journal.
///
/// # Invariants
/// - Variants are stable for serialization and storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    /// Kernel and entry stream events.
    Execution,
    /// Process-level lifecycle and acceptance markers.
    Lifecycle,
    /// Planning-layer events.
    Planning,
}

impl EventChannel {
    /// Returns the stable string form of the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Lifecycle => "lifecycle",
            Self::Planning => "planning",
        }
    }

    /// Parses a stable string form back into a channel.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "execution" => Some(Self::Execution),
            "lifecycle" => Some(Self::Lifecycle),
            "planning" => Some(Self::Planning),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Journal Rows
// ============================================================================

/// Persisted journal row.
///
/// # Invariants
/// - `event_id` is assigned by the store, monotone per journal.
/// - At most one row exists per `(run_id, channel, idempotency_key)`.
/// - Terminal types are unique per `(run_id, channel, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Store-assigned monotone event identifier.
    pub event_id: i64,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Journal channel.
    pub channel: EventChannel,
    /// Event type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// JSON object payload.
    pub payload: Map<String, Value>,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Optional persistence-level dedup key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// True when the append returned an existing row instead of inserting.
    #[serde(default, skip_serializing)]
    pub deduped: bool,
}

impl RunEvent {
    /// Flattens the row for replay clients: payload keys are hoisted to the
    /// top level and reserved columns win on collision.
    #[must_use]
    pub fn flattened(&self) -> Value {
        let mut out = self.payload.clone();
        out.insert("id".to_string(), Value::from(self.event_id));
        out.insert("run_id".to_string(), Value::from(self.run_id.as_str()));
        out.insert("channel".to_string(), Value::from(self.channel.as_str()));
        out.insert("type".to_string(), Value::from(self.event_type.as_str()));
        out.insert("created_at".to_string(), Value::from(self.created_at.as_unix_millis()));
        Value::Object(out)
    }
}

/// Append request accepted by the journal.
///
/// # Invariants
/// - `payload` must be a JSON object; other shapes are rejected upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEvent {
    /// Owning run identifier.
    pub run_id: RunId,
    /// Journal channel.
    pub channel: EventChannel,
    /// Event type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// JSON object payload.
    pub payload: Map<String, Value>,
    /// Row creation time supplied by the caller.
    pub created_at: Timestamp,
    /// Optional persistence-level dedup key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

// ============================================================================
// SECTION: Execution Stream Events
// ============================================================================

/// Violation of the execution event contract.
#[derive(Debug, Error)]
pub enum EventContractError {
    /// The event type is not part of the execution contract.
    #[error("invalid execution event type: {0}")]
    InvalidType(String),
    /// The event is missing its type tag.
    #[error("execution event is missing a type")]
    MissingType,
}

/// In-flight execution stream event.
///
/// Events are open JSON objects with a mandatory `type` tag; the entry layer
/// stamps `run_id`, `executor_id`, and `attempt` before persisting and
/// yielding downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Event type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Remaining event fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ExecutionEvent {
    /// Creates an event with the given type and no fields.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self { event_type: event_type.into(), fields: Map::new() }
    }

    /// Sets a field, returning the event for chaining.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Inserts a field in place.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Inserts a field only when absent.
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        if !self.fields.contains_key(key) {
            self.fields.insert(key.to_string(), value.into());
        }
    }

    /// Returns a string field when present and non-empty.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
    }

    /// Returns a boolean field when present.
    #[must_use]
    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    /// Returns true when this event is a terminal workflow marker.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        is_terminal_event_type(&self.event_type)
    }

    /// Validates the event against the execution contract.
    ///
    /// # Errors
    ///
    /// Returns [`EventContractError`] when the type is blank or unknown.
    pub fn validate_contract(&self) -> Result<(), EventContractError> {
        if self.event_type.trim().is_empty() {
            return Err(EventContractError::MissingType);
        }
        if !EXECUTION_CONTRACT_TYPES.contains(&self.event_type.as_str()) {
            return Err(EventContractError::InvalidType(self.event_type.clone()));
        }
        Ok(())
    }

    /// Serializes the event as a flat JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = self.fields.clone();
        out.insert("type".to_string(), Value::from(self.event_type.as_str()));
        Value::Object(out)
    }
}
