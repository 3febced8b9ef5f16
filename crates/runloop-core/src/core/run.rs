// runloop-core/src/core/run.rs
// ============================================================================
// Module: Runloop Run Entity
// Description: Run lifecycle state machine and row representation.
// Purpose: Capture tracked execution instances with absorbing terminal states.
// Dependencies: crate::core::{hashing, identifiers, time}, rand, serde
// ============================================================================

//! ## Overview
//! A `Run` is one tracked execution of a workflow. Workflow runs follow
//! `created → running → completed|failed`; agent runs follow
//! `pending → running → succeeded|failed`. Terminal states are absorbing, and
//! every status write outside this module goes through the repository CAS
//! primitive so concurrent drivers cannot regress a terminal run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::derive_idempotent_run_id;
use crate::core::hashing::hex_encode;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::WorkflowId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
/// - Terminal variants (`completed`, `succeeded`, `failed`) are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Workflow run created and claimable.
    Created,
    /// Agent run created and claimable.
    Pending,
    /// Run claimed by exactly one driver.
    Running,
    /// Workflow run finished successfully.
    Completed,
    /// Agent run finished successfully.
    Succeeded,
    /// Run finished with an error.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RunStatus {
    /// Returns the stable string form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parses a stable string form back into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true when the transition to `target` is legal.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        match self {
            Self::Created | Self::Pending => matches!(target, Self::Running),
            Self::Running => matches!(target, Self::Completed | Self::Succeeded | Self::Failed),
            Self::Completed | Self::Succeeded | Self::Failed => false,
        }
    }

    /// Returns true when the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Succeeded | Self::Failed)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by run construction and state transitions.
#[derive(Debug, Error)]
pub enum RunError {
    /// A required identifier was empty.
    #[error("{0} is required")]
    MissingField(&'static str),
    /// The requested status transition is illegal.
    #[error("illegal run transition: {from} -> {to}")]
    IllegalTransition {
        /// Status before the attempted transition.
        from: RunStatus,
        /// Requested target status.
        to: RunStatus,
    },
}

// ============================================================================
// SECTION: Identifier Minting
// ============================================================================

/// Mints a fresh random run identifier.
///
/// Idempotent creation derives ids instead; see
/// [`Run::new_idempotent_workflow_run`].
#[must_use]
pub fn mint_run_id() -> RunId {
    let mut bytes = [0_u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    RunId::new(format!("run_{}", hex_encode(&bytes)))
}

// ============================================================================
// SECTION: Run Entity
// ============================================================================

/// Tracked execution instance of a workflow.
///
/// # Invariants
/// - `started_at` is set on first entry into `running`.
/// - `finished_at` is set on first entry into a terminal status.
/// - Idempotent runs derive `run_id` from `(project, workflow, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier (unique).
    pub run_id: RunId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Executed workflow identifier.
    pub workflow_id: WorkflowId,
    /// Originating agent for agent runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// First entry into `running`, when reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// First entry into a terminal status, when reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Error message for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    /// Creates a workflow run in the `created` status.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::MissingField`] when any identifier is blank.
    pub fn new_workflow_run(
        run_id: RunId,
        project_id: ProjectId,
        workflow_id: WorkflowId,
        created_at: Timestamp,
    ) -> Result<Self, RunError> {
        if run_id.as_str().trim().is_empty() {
            return Err(RunError::MissingField("run_id"));
        }
        if project_id.as_str().trim().is_empty() {
            return Err(RunError::MissingField("project_id"));
        }
        if workflow_id.as_str().trim().is_empty() {
            return Err(RunError::MissingField("workflow_id"));
        }
        Ok(Self {
            run_id,
            project_id,
            workflow_id,
            agent_id: None,
            status: RunStatus::Created,
            created_at,
            started_at: None,
            finished_at: None,
            error: None,
        })
    }

    /// Creates an agent run in the `pending` status.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::MissingField`] when any identifier is blank.
    pub fn new_agent_run(
        run_id: RunId,
        project_id: ProjectId,
        workflow_id: WorkflowId,
        agent_id: AgentId,
        created_at: Timestamp,
    ) -> Result<Self, RunError> {
        if agent_id.as_str().trim().is_empty() {
            return Err(RunError::MissingField("agent_id"));
        }
        let mut run = Self::new_workflow_run(run_id, project_id, workflow_id, created_at)?;
        run.agent_id = Some(agent_id);
        run.status = RunStatus::Pending;
        Ok(run)
    }

    /// Creates a workflow run whose id derives from an idempotency key.
    ///
    /// Reissued requests with the same `(project, workflow, key)` converge to
    /// the same run id and therefore the same row.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::MissingField`] when any input is blank.
    pub fn new_idempotent_workflow_run(
        project_id: ProjectId,
        workflow_id: WorkflowId,
        idempotency_key: &str,
        created_at: Timestamp,
    ) -> Result<Self, RunError> {
        if idempotency_key.trim().is_empty() {
            return Err(RunError::MissingField("idempotency_key"));
        }
        let run_id = RunId::new(derive_idempotent_run_id(
            project_id.as_str(),
            workflow_id.as_str(),
            idempotency_key,
        ));
        Self::new_workflow_run(run_id, project_id, workflow_id, created_at)
    }

    /// Transitions the run into `running`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::IllegalTransition`] unless the run is claimable.
    pub fn start(&mut self, at: Timestamp) -> Result<(), RunError> {
        self.transition(RunStatus::Running)?;
        if self.started_at.is_none() {
            self.started_at = Some(at);
        }
        Ok(())
    }

    /// Transitions the run into `completed`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::IllegalTransition`] unless the run is `running`.
    pub fn complete(&mut self, at: Timestamp) -> Result<(), RunError> {
        self.transition(RunStatus::Completed)?;
        self.finished_at = Some(at);
        self.error = None;
        Ok(())
    }

    /// Transitions the run into `succeeded` (agent runs).
    ///
    /// # Errors
    ///
    /// Returns [`RunError::IllegalTransition`] unless the run is `running`.
    pub fn succeed(&mut self, at: Timestamp) -> Result<(), RunError> {
        self.transition(RunStatus::Succeeded)?;
        self.finished_at = Some(at);
        self.error = None;
        Ok(())
    }

    /// Transitions the run into `failed` with an optional error message.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::IllegalTransition`] unless the run is `running`.
    pub fn fail(&mut self, at: Timestamp, error: Option<&str>) -> Result<(), RunError> {
        self.transition(RunStatus::Failed)?;
        self.finished_at = Some(at);
        if let Some(message) = error {
            let trimmed = message.trim();
            if !trimmed.is_empty() {
                self.error = Some(trimmed.to_string());
            }
        }
        Ok(())
    }

    /// Returns true when the run is in a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a transition after checking legality.
    fn transition(&mut self, target: RunStatus) -> Result<(), RunError> {
        if !self.status.can_transition_to(target) {
            return Err(RunError::IllegalTransition { from: self.status, to: target });
        }
        self.status = target;
        Ok(())
    }
}
