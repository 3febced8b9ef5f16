// runloop-core/src/core/decision.rs
// ============================================================================
// Module: Runloop Agent Decisions
// Description: Proposed actions flowing from the agent layer onto the bus.
// Purpose: Provide a validated decision shape for coordinator gating.
// Dependencies: crate::core::identifiers, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A decision is a proposed action published by a conversation agent. The
//! coordinator middleware inspects decisions on the event bus and either lets
//! them propagate (validated) or blocks them with a paired rejection. Only
//! validated decisions of actionable types reach the workflow agent bridge.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::DecisionId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when validating a decision shape.
#[derive(Debug, Error)]
pub enum DecisionError {
    /// A required decision field was empty.
    #[error("decision {0} is required")]
    MissingField(&'static str),
}

// ============================================================================
// SECTION: Decision
// ============================================================================

/// Proposed action from the agent layer.
///
/// # Invariants
/// - `decision_type` and `decision_id` are non-empty after validation.
/// - `payload` carries the action arguments (e.g. the workflow and run ids
///   for `execute_workflow`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDecision {
    /// Action kind (e.g. `execute_workflow`).
    pub decision_type: String,
    /// Decision identifier issued by the agent layer.
    pub decision_id: DecisionId,
    /// Correlation identifier threading the request.
    pub correlation_id: CorrelationId,
    /// Action arguments.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl AgentDecision {
    /// Validates the decision shape.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError::MissingField`] when a required field is blank.
    pub fn validate(&self) -> Result<(), DecisionError> {
        if self.decision_type.trim().is_empty() {
            return Err(DecisionError::MissingField("decision_type"));
        }
        if self.decision_id.as_str().trim().is_empty() {
            return Err(DecisionError::MissingField("decision_id"));
        }
        if self.correlation_id.as_str().trim().is_empty() {
            return Err(DecisionError::MissingField("correlation_id"));
        }
        Ok(())
    }

    /// Returns a string payload field when present and non-empty.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
    }
}
