// runloop-core/src/runtime/evidence.rs
// ============================================================================
// Module: Evidence Collector
// Description: Deterministic evidence snapshots from persisted run events.
// Purpose: Derive replayable execution facts for the acceptance evaluator.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! The collector loads every persisted event for a run, sorts by event id in
//! memory, and aggregates counts, per-type references, the terminal event
//! type, and the confirmation outcome. It never depends on row-return order
//! or streaming timing, so the snapshot is identical for a fixed set of rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

use crate::core::EVENT_WORKFLOW_COMPLETE;
use crate::core::EVENT_WORKFLOW_CONFIRM_REQUIRED;
use crate::core::EVENT_WORKFLOW_CONFIRMED;
use crate::core::EVENT_WORKFLOW_ERROR;
use crate::core::ExecutionSummary;
use crate::core::RunEvidenceSnapshot;
use crate::core::RunId;
use crate::core::format_run_event_ref;
use crate::interfaces::RunEventJournal;
use crate::interfaces::RunRepository;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Collector
// ============================================================================

/// Builds deterministic evidence snapshots for terminal runs.
pub struct EvidenceCollector {
    /// Run repository for the existence gate.
    runs: Arc<dyn RunRepository>,
    /// Event journal.
    journal: Arc<dyn RunEventJournal>,
}

impl EvidenceCollector {
    /// Creates a collector over the given repository and journal.
    #[must_use]
    pub fn new(runs: Arc<dyn RunRepository>, journal: Arc<dyn RunEventJournal>) -> Self {
        Self { runs, journal }
    }

    /// Collects the evidence snapshot for a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the run does not exist; evidence
    /// is never silently empty for a missing run.
    pub fn collect(&self, run_id: &RunId) -> Result<RunEvidenceSnapshot, StoreError> {
        if run_id.as_str().trim().is_empty() {
            return Err(StoreError::Invalid("run_id is required".to_string()));
        }
        self.runs.get_by_id(run_id)?;

        let mut events = self.journal.list_all(run_id)?;
        events.sort_by_key(|event| event.event_id);

        let mut summary = ExecutionSummary { run_event_count: events.len(), ..Default::default() };
        let mut run_event_refs = Vec::with_capacity(events.len());
        let mut terminal_complete = false;

        for event in &events {
            let reference = format_run_event_ref(run_id, event.channel, event.event_id);
            run_event_refs.push(reference.clone());

            *summary.type_counts.entry(event.event_type.clone()).or_default() += 1;
            summary
                .event_refs_by_type
                .entry(event.event_type.clone())
                .or_default()
                .push(reference);
            *summary.channel_counts.entry(event.channel.as_str().to_string()).or_default() += 1;

            match event.event_type.as_str() {
                EVENT_WORKFLOW_COMPLETE => terminal_complete = true,
                EVENT_WORKFLOW_ERROR => {
                    if !terminal_complete {
                        summary.terminal_event_type = Some(EVENT_WORKFLOW_ERROR.to_string());
                    }
                }
                EVENT_WORKFLOW_CONFIRM_REQUIRED => summary.confirm_required = true,
                EVENT_WORKFLOW_CONFIRMED => {
                    let decision = event
                        .payload
                        .get("decision")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|decision| !decision.is_empty());
                    if let Some(decision) = decision {
                        summary.confirm_decision = Some(decision.to_string());
                    }
                }
                _ => {}
            }
        }
        if terminal_complete {
            summary.terminal_event_type = Some(EVENT_WORKFLOW_COMPLETE.to_string());
        }

        summary.first_event_id = events.first().map(|event| event.event_id);
        summary.last_event_id = events.last().map(|event| event.event_id);

        Ok(RunEvidenceSnapshot {
            run_id: run_id.clone(),
            run_event_refs,
            artifact_refs: Vec::new(),
            test_report_ref: None,
            execution_summary: summary,
        })
    }
}
