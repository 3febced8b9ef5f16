// runloop-core/src/runtime/audit.rs
// ============================================================================
// Module: Execution Audit
// Description: Observability hooks for run execution and acceptance flows.
// Purpose: Provide structured audit records without hard logging dependencies.
// Dependencies: crate::core, serde, serde_json
// ============================================================================

//! ## Overview
//! This module exposes a thin audit interface for run governance events. It
//! is intentionally dependency-light so downstream deployments can plug in
//! their own log pipeline without redesign. Records must avoid leaking raw
//! node payloads; identifiers and stable labels only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::Timestamp;

// ============================================================================
// SECTION: Records
// ============================================================================

/// One structured audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Stable event label (`run_execution_duplicate_dropped`, …).
    pub event: String,
    /// Record time (unix millis).
    pub at: i64,
    /// Structured fields (identifiers and labels only).
    pub fields: Map<String, Value>,
}

impl AuditRecord {
    /// Creates a record with the given label and no fields.
    #[must_use]
    pub fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            at: Timestamp::now().as_unix_millis(),
            fields: Map::new(),
        }
    }

    /// Adds a field, returning the record for chaining.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for run governance records.
pub trait ExecutionAuditSink: Send + Sync {
    /// Records one audit record.
    fn record(&self, record: AuditRecord);
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl ExecutionAuditSink for NoopAuditSink {
    fn record(&self, _record: AuditRecord) {}
}

/// Audit sink writing single-line JSON records to stderr.
pub struct StderrAuditSink;

impl ExecutionAuditSink for StderrAuditSink {
    #[allow(clippy::print_stderr, reason = "This sink's contract is stderr line output.")]
    fn record(&self, record: AuditRecord) {
        if let Ok(line) = serde_json::to_string(&record) {
            eprintln!("{line}");
        }
    }
}
