// runloop-server/src/app.rs
// ============================================================================
// Module: Server Wiring
// Description: Container construction and the axum router.
// Purpose: Build every runtime service once at startup and inject explicitly.
// Dependencies: axum, runloop-core, runloop-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! The container wires the store, recorder, validator, kernel, entry,
//! confirmation store, acceptance loop, event bus, and idempotency
//! coordinator. Nothing is a process-global singleton: every handler reads
//! the shared state injected into the router, and tests construct the same
//! container around an in-memory store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use axum::routing::post;
use runloop_core::AcceptanceEvaluator;
use runloop_core::AcceptanceLoop;
use runloop_core::ConfirmationStore;
use runloop_core::DagExecutionKernel;
use runloop_core::EventBus;
use runloop_core::ExecutorRegistry;
use runloop_core::IdempotencyCoordinator;
use runloop_core::MemoryIdempotencyStore;
use runloop_core::MemoryRunStore;
use runloop_core::MemoryToolStore;
use runloop_core::MemoryWorkflowStore;
use runloop_core::PersistenceMode;
use runloop_core::RunEventJournal;
use runloop_core::RunEventRecorder;
use runloop_core::RunExecutionEntry;
use runloop_core::RunRepository;
use runloop_core::ToolRepository;
use runloop_core::WorkflowRepository;
use runloop_core::WorkflowValidator;
use runloop_core::runtime::AsyncEventRecorder;
use runloop_core::runtime::ConfigEchoExecutor;
use runloop_core::runtime::CoordinatorMiddleware;
use runloop_core::runtime::DecisionBridge;
use runloop_core::runtime::NoopAuditSink;
use runloop_core::runtime::PassthroughExecutor;
use runloop_core::runtime::async_recorder::DEFAULT_QUEUE_SIZE;
use runloop_core::workflow::NodeType;
use runloop_store_sqlite::SqliteRunStore;
use runloop_store_sqlite::SqliteStoreConfig;
use thiserror::Error;

use crate::config::ConfigError;
use crate::config::RunloopConfig;
use crate::config::StoreKind;
use crate::routes;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server startup errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Storage failed to initialize.
    #[error("store init failed: {0}")]
    Store(String),
    /// The listener failed to bind or serve.
    #[error("server io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Server State
// ============================================================================

/// Shared state injected into every handler.
pub struct ServerState {
    /// Loaded configuration.
    pub config: RunloopConfig,
    /// Run repository.
    pub runs: Arc<dyn RunRepository>,
    /// Event journal.
    pub journal: Arc<dyn RunEventJournal>,
    /// Workflow repository (in-process editor surface).
    pub workflows: Arc<dyn WorkflowRepository>,
    /// Tool registry.
    pub tools: Arc<MemoryToolStore>,
    /// Fail-closed workflow validator.
    pub validator: Arc<WorkflowValidator>,
    /// Run execution entry.
    pub entry: Arc<RunExecutionEntry>,
    /// Confirmation store.
    pub confirmations: Arc<ConfirmationStore>,
    /// Acceptance loop orchestrator.
    pub acceptance: Arc<AcceptanceLoop>,
    /// Event bus with the coordinator middleware installed.
    pub bus: Arc<EventBus>,
    /// Idempotency coordinator for run creation.
    pub idempotency: Arc<IdempotencyCoordinator>,
}

impl ServerState {
    /// Builds the container from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when a backend fails to initialize.
    pub fn from_config(config: RunloopConfig) -> Result<Arc<Self>, ServerError> {
        let (runs, journal): (Arc<dyn RunRepository>, Arc<dyn RunEventJournal>) =
            match config.store.kind {
                StoreKind::Memory => {
                    let store = MemoryRunStore::new();
                    (Arc::new(store.clone()), Arc::new(store))
                }
                StoreKind::Sqlite => {
                    let path = config
                        .store
                        .path
                        .clone()
                        .ok_or_else(|| ServerError::Store("sqlite requires a path".to_string()))?;
                    let store = SqliteRunStore::new(&SqliteStoreConfig {
                        path,
                        busy_timeout_ms: 5_000,
                        sync_mode: runloop_store_sqlite::SqliteSyncMode::Full,
                    })
                    .map_err(|error| ServerError::Store(error.to_string()))?;
                    (Arc::new(store.clone()), Arc::new(store))
                }
            };

        let workflows: Arc<dyn WorkflowRepository> = Arc::new(MemoryWorkflowStore::new());
        let tools = Arc::new(MemoryToolStore::new());
        let tools_dyn: Arc<dyn ToolRepository> = Arc::clone(&tools) as Arc<dyn ToolRepository>;

        let executors = default_executors();
        let validator =
            Arc::new(WorkflowValidator::new(executors.available_types(), Arc::clone(&tools_dyn)));

        let mut recorder =
            RunEventRecorder::new(Arc::clone(&runs), Arc::clone(&journal));
        if config.execution.disable_run_persistence {
            recorder = recorder.with_persistence_disabled();
        }
        let recorder = Arc::new(recorder);

        let kernel =
            Arc::new(DagExecutionKernel::new(Arc::clone(&workflows), executors, None));
        let confirmations = Arc::new(ConfirmationStore::new());

        let mode = config.execution.e2e_test_mode.persistence_mode();
        let mut entry = RunExecutionEntry::new(
            Arc::clone(&workflows),
            Arc::clone(&runs),
            Arc::clone(&validator),
            Arc::clone(&recorder),
            kernel,
            Arc::clone(&confirmations),
            Arc::clone(&tools_dyn),
            Arc::new(NoopAuditSink),
            "run_entry_v1",
            config.execution.limits(),
            mode,
        );
        if mode == PersistenceMode::Production {
            // Production streams drain events through the bounded queue
            // instead of blocking on the journal.
            let sink = AsyncEventRecorder::start(Arc::clone(&recorder), DEFAULT_QUEUE_SIZE);
            entry = entry.with_sink(Arc::new(sink));
        }
        let entry = Arc::new(entry);

        let bus = Arc::new(EventBus::new());
        bus.add_middleware(Arc::new(CoordinatorMiddleware::new(BTreeSet::new())));
        let bridge = DecisionBridge::new(
            Arc::clone(&entry),
            BTreeSet::from(["execute_workflow".to_string()]),
            &bus,
        );
        bus.subscribe(Arc::new(bridge));

        let acceptance = Arc::new(AcceptanceLoop::new(
            Arc::clone(&runs),
            Arc::clone(&journal),
            Arc::clone(&workflows),
            Arc::clone(&recorder),
            AcceptanceEvaluator::new(config.acceptance.require_test_report_for_pass),
            Some(Arc::clone(&bus)),
        ));

        let idempotency =
            Arc::new(IdempotencyCoordinator::new(Arc::new(MemoryIdempotencyStore::new())));

        Ok(Arc::new(Self {
            config,
            runs,
            journal,
            workflows,
            tools,
            validator,
            entry,
            confirmations,
            acceptance,
            bus,
            idempotency,
        }))
    }
}

/// Registers the default executor set.
fn default_executors() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(NodeType::Start, Arc::new(PassthroughExecutor));
    registry.register(NodeType::End, Arc::new(PassthroughExecutor));
    registry.register(NodeType::Condition, Arc::new(PassthroughExecutor));
    registry.register(NodeType::Tool, Arc::new(ConfigEchoExecutor));
    registry.register(NodeType::HttpRequest, Arc::new(ConfigEchoExecutor));
    registry.register(NodeType::Database, Arc::new(ConfigEchoExecutor));
    registry.register(NodeType::File, Arc::new(ConfigEchoExecutor));
    registry.register(NodeType::Notification, Arc::new(ConfigEchoExecutor));
    registry.register(NodeType::TextModel, Arc::new(ConfigEchoExecutor));
    registry
}

// ============================================================================
// SECTION: Router and Serve
// ============================================================================

/// Builds the API router over the shared state.
#[must_use]
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(
            "/api/projects/{project_id}/workflows/{workflow_id}/runs",
            post(routes::create_run).get(routes::list_runs),
        )
        .route("/api/workflows/{workflow_id}/execute/stream", post(routes::execute_stream))
        .route("/api/runs/{run_id}", get(routes::get_run))
        .route("/api/runs/{run_id}/events", get(routes::list_run_events))
        .route("/api/runs/{run_id}/confirm", post(routes::confirm_run))
        .route("/api/workflows/capabilities", get(routes::get_capabilities))
        .with_state(state)
}

/// Binds the configured listener and serves until shutdown.
///
/// # Errors
///
/// Returns [`ServerError`] when binding or serving fails.
pub async fn serve(state: Arc<ServerState>) -> Result<(), ServerError> {
    let address = SocketAddr::new(state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| ServerError::Io(error.to_string()))?;
    let router = build_router(state);
    axum::serve(listener, router).await.map_err(|error| ServerError::Io(error.to_string()))
}
