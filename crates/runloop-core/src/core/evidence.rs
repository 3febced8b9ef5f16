// runloop-core/src/core/evidence.rs
// ============================================================================
// Module: Runloop Run Evidence Model
// Description: Deterministic evidence snapshots derived from the event journal.
// Purpose: Provide replayable execution facts for acceptance evaluation.
// Dependencies: crate::core::{event, identifiers}, serde
// ============================================================================

//! ## Overview
//! Evidence is derived exclusively from persisted run events, never from
//! streaming order, so partial or aborted streams cannot hide facts. A
//! snapshot is deterministic for a fixed set of rows: events are sorted by
//! event id and summary maps use ordered keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::event::EventChannel;
use crate::core::identifiers::RunId;

// ============================================================================
// SECTION: Event References
// ============================================================================

/// Formats the stable string reference for a persisted run event.
///
/// The compact form embeds into lifecycle payloads and evidence maps.
#[must_use]
pub fn format_run_event_ref(run_id: &RunId, channel: EventChannel, event_id: i64) -> String {
    format!("run_event:{}:{}:{event_id}", run_id.as_str(), channel.as_str())
}

// ============================================================================
// SECTION: Execution Summary
// ============================================================================

/// Aggregated execution facts for one run.
///
/// # Invariants
/// - Maps are ordered by key; the summary is independent of row-return order.
/// - `terminal_event_type` prefers `workflow_complete` over `workflow_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExecutionSummary {
    /// Total persisted event count.
    pub run_event_count: usize,
    /// Event counts keyed by type.
    pub type_counts: BTreeMap<String, usize>,
    /// Event references keyed by type.
    pub event_refs_by_type: BTreeMap<String, Vec<String>>,
    /// Event counts keyed by channel.
    pub channel_counts: BTreeMap<String, usize>,
    /// Terminal event type when one was persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_event_type: Option<String>,
    /// True when a confirmation was required for this run.
    pub confirm_required: bool,
    /// Recorded confirmation decision, when one was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_decision: Option<String>,
    /// Lowest persisted event id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_event_id: Option<i64>,
    /// Highest persisted event id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<i64>,
}

impl ExecutionSummary {
    /// Returns event references for a type, empty when absent.
    #[must_use]
    pub fn refs_for_type(&self, event_type: &str) -> &[String] {
        self.event_refs_by_type.get(event_type).map_or(&[], Vec::as_slice)
    }

    /// Returns true when the confirmation gate allows acceptance: either no
    /// confirmation was required or the recorded decision was `allow`.
    #[must_use]
    pub fn confirm_allowed(&self) -> bool {
        !self.confirm_required || self.confirm_decision.as_deref() == Some("allow")
    }
}

// ============================================================================
// SECTION: Evidence Snapshot
// ============================================================================

/// Deterministic evidence bundle for one run.
///
/// # Invariants
/// - `run_event_refs` is ordered by event id ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvidenceSnapshot {
    /// Run identifier the evidence belongs to.
    pub run_id: RunId,
    /// Stable references to every persisted event, ordered by event id.
    pub run_event_refs: Vec<String>,
    /// Artifact references (reserved).
    #[serde(default)]
    pub artifact_refs: Vec<String>,
    /// Test report reference, when one was attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_report_ref: Option<String>,
    /// Aggregated execution facts.
    pub execution_summary: ExecutionSummary,
}

impl RunEvidenceSnapshot {
    /// Returns the terminal event type when one was persisted.
    #[must_use]
    pub fn terminal_event_type(&self) -> Option<&str> {
        self.execution_summary.terminal_event_type.as_deref()
    }

    /// Returns true when a terminal event exists for this run.
    #[must_use]
    pub fn has_terminal_event(&self) -> bool {
        self.execution_summary.terminal_event_type.is_some()
    }
}
