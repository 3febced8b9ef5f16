// runloop-core/src/runtime/confirm.rs
// ============================================================================
// Module: Run Confirmation Store
// Description: In-memory allow/deny gate for side-effect nodes.
// Purpose: Block side-effect execution until a human decision or timeout.
// Dependencies: crate::core, rand, tokio
// ============================================================================

//! ## Overview
//! One pending confirmation exists per run; concurrent creators for the same
//! run share the waitable. Deny is the default for timeout, cancellation, and
//! unknown confirmation ids. Confirmation ids are never reused across runs:
//! each pending entry mints a fresh random id, and entries are cleaned up
//! after the wait completes so a later run for the same workflow starts over.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::core::ConfirmId;
use crate::core::NodeId;
use crate::core::RunId;
use crate::core::Timestamp;
use crate::core::WorkflowId;
use crate::core::hex_encode;

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Confirmation decision for a side-effect gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmDecision {
    /// Side effect may execute.
    Allow,
    /// Side effect must not execute.
    Deny,
}

impl ConfirmDecision {
    /// Returns the stable string form of the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }

    /// Parses a stable string form back into a decision.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the confirmation store.
#[derive(Debug, Error)]
pub enum ConfirmError {
    /// A required identifier was blank.
    #[error("{0} is required")]
    MissingField(&'static str),
    /// The confirmation id is unknown or already expired.
    #[error("confirmation not found (may be expired)")]
    NotFound,
    /// The confirmation belongs to a different run.
    #[error("confirm_id does not belong to this run_id")]
    WrongRun,
    /// No decision arrived inside the wait budget.
    #[error("confirmation wait timed out")]
    Timeout,
    /// The store lock was poisoned.
    #[error("confirmation store lock poisoned")]
    Poisoned,
}

// ============================================================================
// SECTION: Pending Confirmations
// ============================================================================

/// Pending side-effect confirmation handed to the streaming entry.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    /// Confirmation identifier (fresh per run, never reused).
    pub confirm_id: ConfirmId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Workflow identifier.
    pub workflow_id: WorkflowId,
    /// Side-effect node awaiting confirmation.
    pub node_id: NodeId,
    /// Creation time (unix millis).
    pub created_at_ms: i64,
    /// Waitable decision slot shared by all waiters.
    receiver: watch::Receiver<Option<ConfirmDecision>>,
}

/// Store-side entry holding the decision sender.
struct PendingEntry {
    /// Pending confirmation snapshot handed to waiters.
    pending: PendingConfirmation,
    /// Decision publisher.
    sender: watch::Sender<Option<ConfirmDecision>>,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// In-memory confirmation store keyed by run and confirmation ids.
#[derive(Default)]
pub struct ConfirmationStore {
    /// Guarded pending tables.
    inner: Mutex<ConfirmInner>,
}

/// Pending tables behind the store lock.
#[derive(Default)]
struct ConfirmInner {
    /// Pending entries keyed by confirmation id.
    by_confirm_id: HashMap<String, PendingEntry>,
    /// Active confirmation id per run.
    by_run_id: HashMap<String, String>,
}

impl ConfirmationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pending confirmation or returns the existing one for the run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfirmError::MissingField`] when any identifier is blank.
    pub fn create_or_get_pending(
        &self,
        run_id: &RunId,
        workflow_id: &WorkflowId,
        node_id: &NodeId,
    ) -> Result<PendingConfirmation, ConfirmError> {
        if run_id.as_str().trim().is_empty() {
            return Err(ConfirmError::MissingField("run_id"));
        }
        if workflow_id.as_str().trim().is_empty() {
            return Err(ConfirmError::MissingField("workflow_id"));
        }
        if node_id.as_str().trim().is_empty() {
            return Err(ConfirmError::MissingField("node_id"));
        }

        let mut inner = self.inner.lock().map_err(|_| ConfirmError::Poisoned)?;
        if let Some(confirm_id) = inner.by_run_id.get(run_id.as_str())
            && let Some(entry) = inner.by_confirm_id.get(confirm_id)
            && entry.sender.borrow().is_none()
        {
            return Ok(entry.pending.clone());
        }

        let confirm_id = mint_confirm_id();
        let (sender, receiver) = watch::channel(None);
        let pending = PendingConfirmation {
            confirm_id: ConfirmId::new(confirm_id.clone()),
            run_id: run_id.clone(),
            workflow_id: workflow_id.clone(),
            node_id: node_id.clone(),
            created_at_ms: Timestamp::now().as_unix_millis(),
            receiver,
        };
        inner
            .by_confirm_id
            .insert(confirm_id.clone(), PendingEntry { pending: pending.clone(), sender });
        inner.by_run_id.insert(run_id.as_str().to_string(), confirm_id);
        Ok(pending)
    }

    /// Resolves a pending confirmation with a decision.
    ///
    /// Repeated resolutions of an already-decided confirmation are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`ConfirmError::NotFound`] for unknown ids and
    /// [`ConfirmError::WrongRun`] when the ids disagree.
    pub fn resolve(
        &self,
        run_id: &RunId,
        confirm_id: &ConfirmId,
        decision: ConfirmDecision,
    ) -> Result<(), ConfirmError> {
        if run_id.as_str().trim().is_empty() {
            return Err(ConfirmError::MissingField("run_id"));
        }
        if confirm_id.as_str().trim().is_empty() {
            return Err(ConfirmError::MissingField("confirm_id"));
        }

        let inner = self.inner.lock().map_err(|_| ConfirmError::Poisoned)?;
        let entry = inner.by_confirm_id.get(confirm_id.as_str()).ok_or(ConfirmError::NotFound)?;
        if entry.pending.run_id != *run_id {
            return Err(ConfirmError::WrongRun);
        }
        if entry.sender.borrow().is_some() {
            return Ok(());
        }
        let _ = entry.sender.send(Some(decision));
        Ok(())
    }

    /// Waits for a decision, treating timeout as the caller's deny signal.
    ///
    /// The pending entry is cleaned up on every exit path so a later run
    /// mints a fresh confirmation id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfirmError::Timeout`] when no decision arrives in time and
    /// [`ConfirmError::NotFound`] for unknown ids.
    pub async fn wait_for_decision(
        &self,
        confirm_id: &ConfirmId,
        timeout: Duration,
    ) -> Result<ConfirmDecision, ConfirmError> {
        let mut receiver = {
            let inner = self.inner.lock().map_err(|_| ConfirmError::Poisoned)?;
            inner
                .by_confirm_id
                .get(confirm_id.as_str())
                .map(|entry| entry.pending.receiver.clone())
                .ok_or(ConfirmError::NotFound)?
        };

        let outcome = tokio::time::timeout(timeout, async {
            loop {
                if let Some(decision) = *receiver.borrow_and_update() {
                    return Ok(decision);
                }
                if receiver.changed().await.is_err() {
                    return Err(ConfirmError::NotFound);
                }
            }
        })
        .await;

        self.cleanup(confirm_id)?;
        match outcome {
            Ok(decision) => decision,
            Err(_) => Err(ConfirmError::Timeout),
        }
    }

    /// Removes a pending entry and its run binding.
    fn cleanup(&self, confirm_id: &ConfirmId) -> Result<(), ConfirmError> {
        let mut inner = self.inner.lock().map_err(|_| ConfirmError::Poisoned)?;
        if let Some(entry) = inner.by_confirm_id.remove(confirm_id.as_str()) {
            let run_key = entry.pending.run_id.as_str().to_string();
            if inner.by_run_id.get(&run_key).is_some_and(|current| current == confirm_id.as_str())
            {
                inner.by_run_id.remove(&run_key);
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Mints a fresh random confirmation identifier.
fn mint_confirm_id() -> String {
    let mut bytes = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("cfm_{}", hex_encode(&bytes))
}
