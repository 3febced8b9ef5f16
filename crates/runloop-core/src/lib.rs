// runloop-core/src/lib.rs
// ============================================================================
// Module: Runloop Core Library
// Description: Public API surface for the Runloop core.
// Purpose: Expose core types, interfaces, and runtime services.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Runloop core provides the workflow execution engine with its reflective
//! acceptance loop: tracked runs with an append-only event journal,
//! fail-closed validation, side-effect confirmation, a bounded config-only
//! repair loop, and strict acceptance verdicts. It is backend-agnostic and
//! integrates through explicit interfaces rather than embedding into agent
//! frameworks.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AfterGate;
pub use interfaces::EventPage;
pub use interfaces::ExecutionEventSink;
pub use interfaces::ExecutionKernel;
pub use interfaces::ExecutionPolicy;
pub use interfaces::IdempotencyStore;
pub use interfaces::KernelError;
pub use interfaces::KernelRequest;
pub use interfaces::PolicyError;
pub use interfaces::RunEventJournal;
pub use interfaces::RunGateError;
pub use interfaces::RunRepository;
pub use interfaces::StoreError;
pub use interfaces::ToolRecord;
pub use interfaces::ToolRepository;
pub use interfaces::ToolStatus;
pub use interfaces::WorkflowRepository;
pub use runtime::AcceptanceEvaluator;
pub use runtime::AcceptanceLoop;
pub use runtime::AcceptanceRequest;
pub use runtime::AcceptanceResult;
pub use runtime::AcceptanceVerdict;
pub use runtime::ConfirmDecision;
pub use runtime::ConfirmationStore;
pub use runtime::CriteriaManager;
pub use runtime::DagExecutionKernel;
pub use runtime::EntryLimits;
pub use runtime::EntryRequest;
pub use runtime::EventBus;
pub use runtime::EvidenceCollector;
pub use runtime::ExecutorRegistry;
pub use runtime::IdempotencyCoordinator;
pub use runtime::MemoryIdempotencyStore;
pub use runtime::MemoryRunStore;
pub use runtime::MemoryToolStore;
pub use runtime::MemoryWorkflowStore;
pub use runtime::PersistenceMode;
pub use runtime::RunEventRecorder;
pub use runtime::RunExecutionEntry;
pub use runtime::WorkflowValidator;
