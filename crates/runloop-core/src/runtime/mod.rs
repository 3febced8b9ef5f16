// runloop-core/src/runtime/mod.rs
// ============================================================================
// Module: Runloop Runtime
// Description: Execution, acceptance, and coordination services.
// Purpose: Provide the governed run pipeline over the core types.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The runtime wires the core types into the governed execution pipeline:
//! validation, the run claim, side-effect confirmation, the streaming entry
//! with its bounded repair loop, the acceptance reflection loop, and the
//! decision bridge. Shared services are constructed once at startup and
//! injected explicitly; nothing here is a process-global singleton.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod acceptance;
pub mod async_recorder;
pub mod audit;
pub mod bus;
pub mod confirm;
pub mod contracts;
pub mod criteria;
pub mod entry;
pub mod evaluator;
pub mod evidence;
pub mod idempotency;
pub mod kernel;
pub mod recorder;
pub mod store;
pub mod validator;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use acceptance::AcceptanceError;
pub use acceptance::AcceptanceLoop;
pub use acceptance::AcceptanceRequest;
pub use async_recorder::AsyncEventRecorder;
pub use async_recorder::RecorderStats;
pub use audit::AuditRecord;
pub use audit::ExecutionAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use bus::AdjustmentRequested;
pub use bus::CoordinatorMiddleware;
pub use bus::DecisionBridge;
pub use bus::DomainEvent;
pub use bus::EventBus;
pub use bus::EventKind;
pub use bus::EventMiddleware;
pub use bus::EventSubscriber;
pub use bus::ExecutionResult;
pub use bus::MiddlewareOutcome;
pub use confirm::ConfirmDecision;
pub use confirm::ConfirmError;
pub use confirm::ConfirmationStore;
pub use confirm::PendingConfirmation;
pub use contracts::CAPABILITIES_SCHEMA_VERSION;
pub use contracts::NodeContract;
pub use contracts::SQLITE_DATABASE_URL_PREFIX;
pub use contracts::SUPPORTED_MODEL_PROVIDERS;
pub use contracts::editor_node_contracts;
pub use criteria::BASELINE_SUCCESS_CRITERION_TEXT;
pub use criteria::CriteriaManager;
pub use entry::EntryError;
pub use entry::EntryLimits;
pub use entry::EntryRequest;
pub use entry::ExecutionResults;
pub use entry::PersistenceMode;
pub use entry::RunExecutionEntry;
pub use evaluator::AcceptanceEvaluator;
pub use evaluator::AcceptanceResult;
pub use evaluator::AcceptanceVerdict;
pub use evaluator::EvaluationContext;
pub use evaluator::EvaluatorError;
pub use evidence::EvidenceCollector;
pub use idempotency::IdempotencyCoordinator;
pub use kernel::ConfigEchoExecutor;
pub use kernel::DagExecutionKernel;
pub use kernel::ExecutorRegistry;
pub use kernel::FailingExecutor;
pub use kernel::NodeExecutionError;
pub use kernel::NodeExecutor;
pub use kernel::NodeInput;
pub use kernel::PassthroughExecutor;
pub use kernel::StaticExecutor;
pub use recorder::RunEventRecorder;
pub use store::MemoryIdempotencyStore;
pub use store::MemoryRunStore;
pub use store::MemoryToolStore;
pub use store::MemoryWorkflowStore;
pub use validator::ValidationError;
pub use validator::WorkflowValidator;
