// runloop-core/src/core/mod.rs
// ============================================================================
// Module: Runloop Core Types
// Description: Canonical Runloop domain schema and run-journal structures.
// Purpose: Provide stable, serializable types for workflows, runs, and events.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Runloop core types define workflow specifications, run lifecycle state,
//! the event journal vocabulary, acceptance criteria contracts, and evidence
//! snapshots. These types are the canonical source of truth for any derived
//! API surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod criteria;
pub mod decision;
pub mod event;
pub mod evidence;
pub mod hashing;
pub mod identifiers;
pub mod run;
pub mod time;
pub mod workflow;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use criteria::CriteriaConflict;
pub use criteria::CriteriaSnapshot;
pub use criteria::CriteriaSource;
pub use criteria::Criterion;
pub use criteria::VerificationMethod;
pub use decision::AgentDecision;
pub use decision::DecisionError;
pub use event::AppendEvent;
pub use event::EVENT_ADJUSTMENT_REQUESTED;
pub use event::EVENT_ATTEMPT_FAILED;
pub use event::EVENT_EXECUTION_COMPLETED;
pub use event::EVENT_NODE_COMPLETE;
pub use event::EVENT_NODE_ERROR;
pub use event::EVENT_NODE_START;
pub use event::EVENT_REACT_LOOP_STARTED;
pub use event::EVENT_REACT_PATCH_APPLIED;
pub use event::EVENT_REFLECTION_COMPLETED;
pub use event::EVENT_REFLECTION_REQUESTED;
pub use event::EVENT_TERMINATION_REPORT;
pub use event::EVENT_TEST_REPORT;
pub use event::EVENT_WORKFLOW_COMPLETE;
pub use event::EVENT_WORKFLOW_CONFIRM_REQUIRED;
pub use event::EVENT_WORKFLOW_CONFIRMED;
pub use event::EVENT_WORKFLOW_ERROR;
pub use event::EVENT_WORKFLOW_START;
pub use event::EventChannel;
pub use event::EventContractError;
pub use event::ExecutionEvent;
pub use event::RunEvent;
pub use event::is_terminal_event_type;
pub use evidence::ExecutionSummary;
pub use evidence::RunEvidenceSnapshot;
pub use evidence::format_run_event_ref;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::derive_criterion_id;
pub use hashing::derive_idempotent_run_id;
pub use hashing::derive_reflection_id;
pub use hashing::hex_encode;
pub use hashing::sha256_canonical_json;
pub use hashing::sha256_hex;
pub use identifiers::AgentId;
pub use identifiers::ConfirmId;
pub use identifiers::CorrelationId;
pub use identifiers::CriterionId;
pub use identifiers::DecisionId;
pub use identifiers::EdgeId;
pub use identifiers::NodeId;
pub use identifiers::ProjectId;
pub use identifiers::RunId;
pub use identifiers::ToolId;
pub use identifiers::WorkflowId;
pub use run::Run;
pub use run::RunError;
pub use run::RunStatus;
pub use run::mint_run_id;
pub use time::Timestamp;
pub use workflow::EdgeSpec;
pub use workflow::NodeSpec;
pub use workflow::NodeType;
pub use workflow::WorkflowSpec;
