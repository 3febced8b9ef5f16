// runloop-core/src/runtime/recorder.rs
// ============================================================================
// Module: Run Event Recorder
// Description: Journal appends that drive the run lifecycle state machine.
// Purpose: Keep status transitions concurrency-safe while persisting events.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! Every append attempts the claimable→running CAS, and terminal event types
//! drive `running → completed|failed` with `finished_at`. Losing a CAS race
//! is not an error: another driver already performed the transition, and
//! terminal states never regress because a terminal row no longer matches the
//! `running` precondition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;

use crate::core::AppendEvent;
use crate::core::EVENT_WORKFLOW_COMPLETE;
use crate::core::EVENT_WORKFLOW_ERROR;
use crate::core::EventChannel;
use crate::core::RunEvent;
use crate::core::RunId;
use crate::core::RunStatus;
use crate::core::Timestamp;
use crate::interfaces::RunEventJournal;
use crate::interfaces::RunRepository;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// Append-side use case combining the journal and the run state machine.
pub struct RunEventRecorder {
    /// Run repository for existence checks and CAS transitions.
    runs: Arc<dyn RunRepository>,
    /// Event journal.
    journal: Arc<dyn RunEventJournal>,
    /// False disables all run writes (test-only escape hatch).
    persistence_enabled: bool,
}

impl RunEventRecorder {
    /// Creates a recorder over the given repository and journal.
    #[must_use]
    pub fn new(runs: Arc<dyn RunRepository>, journal: Arc<dyn RunEventJournal>) -> Self {
        Self { runs, journal, persistence_enabled: true }
    }

    /// Disables run persistence (events and transitions become no-ops).
    #[must_use]
    pub const fn with_persistence_disabled(mut self) -> Self {
        self.persistence_enabled = false;
        self
    }

    /// Appends an event and drives the run lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the run does not exist and
    /// propagates journal failures.
    pub fn append(
        &self,
        run_id: &RunId,
        channel: EventChannel,
        event_type: &str,
        payload: Map<String, Value>,
        idempotency_key: Option<String>,
    ) -> Result<RunEvent, StoreError> {
        if !self.persistence_enabled {
            return Ok(RunEvent {
                event_id: 0,
                run_id: run_id.clone(),
                channel,
                event_type: event_type.to_string(),
                payload,
                created_at: Timestamp::now(),
                idempotency_key,
                deduped: false,
            });
        }

        self.runs.get_by_id(run_id)?;

        // Claim race losers proceed: the transition already happened.
        let claimed = self.runs.update_status_if_current(
            run_id,
            RunStatus::Created,
            RunStatus::Running,
            None,
        )?;
        if !claimed {
            self.runs.update_status_if_current(
                run_id,
                RunStatus::Pending,
                RunStatus::Running,
                None,
            )?;
        }

        if event_type == EVENT_WORKFLOW_COMPLETE {
            self.runs.update_status_if_current(
                run_id,
                RunStatus::Running,
                RunStatus::Completed,
                Some(Timestamp::now()),
            )?;
        } else if event_type == EVENT_WORKFLOW_ERROR {
            self.runs.update_status_if_current(
                run_id,
                RunStatus::Running,
                RunStatus::Failed,
                Some(Timestamp::now()),
            )?;
        }

        self.journal.append(AppendEvent {
            run_id: run_id.clone(),
            channel,
            event_type: event_type.to_string(),
            payload,
            created_at: Timestamp::now(),
            idempotency_key,
        })
    }
}
