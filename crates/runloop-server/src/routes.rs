// runloop-server/src/routes.rs
// ============================================================================
// Module: API Routes
// Description: HTTP handlers for runs, streaming execution, and replay.
// Purpose: Expose the run pipeline with idempotent creation and SSE framing.
// Dependencies: axum, runloop-core, serde, serde_json, tokio-stream
// ============================================================================

//! ## Overview
//! Handlers stay thin: DTO mapping and protocol output only. Governance
//! (validation, claims, confirmation, repair) lives in the run entry; the
//! handlers translate its typed rejections into stable JSON error codes.
//! The SSE stream frames each event as `data: <json>` and always ends with a
//! terminal `workflow_complete` or `workflow_error` event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse::Event;
use runloop_core::ConfirmDecision;
use runloop_core::ConfirmId;
use runloop_core::EntryRequest;
use runloop_core::EventChannel;
use runloop_core::ProjectId;
use runloop_core::Run;
use runloop_core::RunId;
use runloop_core::Timestamp;
use runloop_core::WorkflowId;
use runloop_core::mint_run_id;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::app::ServerState;
use crate::capabilities::build_manifest;
use crate::error::ApiError;

// ============================================================================
// SECTION: DTOs
// ============================================================================

/// Pagination query for run listings.
#[derive(Debug, Deserialize)]
pub struct RunListQuery {
    /// Page size.
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    /// Page offset.
    #[serde(default)]
    pub offset: usize,
}

/// Returns the default run list page size.
const fn default_list_limit() -> usize {
    100
}

/// Body for streaming execution.
#[derive(Debug, Deserialize)]
pub struct ExecuteStreamBody {
    /// Run to claim and execute.
    pub run_id: String,
    /// Initial input value.
    #[serde(default)]
    pub initial_input: Option<Value>,
}

/// Query for event replay.
#[derive(Debug, Deserialize)]
pub struct EventListQuery {
    /// Channel filter.
    #[serde(default)]
    pub channel: Option<String>,
    /// Cursor: last event id of the previous page.
    #[serde(default)]
    pub cursor: Option<i64>,
    /// Page size.
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

/// Returns the default event replay page size.
const fn default_event_limit() -> usize {
    200
}

/// Body for confirmation decisions.
#[derive(Debug, Deserialize)]
pub struct ConfirmBody {
    /// Pending confirmation identifier.
    pub confirm_id: String,
    /// Decision (`allow` or `deny`).
    pub decision: String,
}

// ============================================================================
// SECTION: Run Creation
// ============================================================================

/// Serializes the creation response row.
fn creation_response(run: &Run) -> Value {
    json!({
        "id": run.run_id.as_str(),
        "status": run.status.as_str(),
        "created_at": run.created_at.as_unix_millis(),
    })
}

/// `POST /api/projects/{project_id}/workflows/{workflow_id}/runs`
///
/// # Errors
///
/// Returns [`ApiError`] for unknown workflows or storage failures.
pub async fn create_run(
    State(state): State<Arc<ServerState>>,
    Path((project_id, workflow_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = ProjectId::new(project_id);
    let workflow_id = WorkflowId::new(workflow_id);
    state.workflows.get_by_id(&workflow_id)?;

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);

    let body = if let Some(key) = idempotency_key {
        let scope =
            format!("run_create:{}:{}:{key}", project_id.as_str(), workflow_id.as_str());
        let state_for_work = Arc::clone(&state);
        let project_for_work = project_id.clone();
        let workflow_for_work = workflow_id.clone();
        state
            .idempotency
            .run(&scope, move || async move {
                let run = Run::new_idempotent_workflow_run(
                    project_for_work,
                    workflow_for_work,
                    &key,
                    Timestamp::now(),
                )
                .map_err(|error| {
                    runloop_core::StoreError::Invalid(error.to_string())
                })?;
                // The derived id makes reissued requests land on one row.
                if let Some(existing) = state_for_work.runs.find_by_id(&run.run_id)? {
                    return Ok(creation_response(&existing));
                }
                state_for_work.runs.save(&run)?;
                Ok(creation_response(&run))
            })
            .await?
    } else {
        let run =
            Run::new_workflow_run(mint_run_id(), project_id, workflow_id, Timestamp::now())
                .map_err(|error| ApiError::bad_request("domain_validation", error.to_string()))?;
        state.runs.save(&run)?;
        creation_response(&run)
    };

    Ok((StatusCode::CREATED, Json(body)))
}

/// `GET /api/projects/{project_id}/workflows/{workflow_id}/runs`
///
/// # Errors
///
/// Returns [`ApiError`] on storage failures.
pub async fn list_runs(
    State(state): State<Arc<ServerState>>,
    Path((_project_id, workflow_id)): Path<(String, String)>,
    Query(query): Query<RunListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workflow_id = WorkflowId::new(workflow_id);
    let runs = state.runs.list_by_workflow_id(&workflow_id, query.limit, query.offset)?;
    let total = state.runs.count_by_workflow_id(&workflow_id)?;
    Ok(Json(json!({
        "total": total,
        "runs": runs.iter().map(run_response).collect::<Vec<_>>(),
    })))
}

/// `GET /api/runs/{run_id}`
///
/// # Errors
///
/// Returns [`ApiError::not_found`] for unknown runs.
pub async fn get_run(
    State(state): State<Arc<ServerState>>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.runs.get_by_id(&RunId::new(run_id))?;
    Ok(Json(run_response(&run)))
}

/// Serializes a full run row.
fn run_response(run: &Run) -> Value {
    json!({
        "id": run.run_id.as_str(),
        "project_id": run.project_id.as_str(),
        "workflow_id": run.workflow_id.as_str(),
        "agent_id": run.agent_id.as_ref().map(|agent| agent.as_str()),
        "status": run.status.as_str(),
        "created_at": run.created_at.as_unix_millis(),
        "started_at": run.started_at.map(Timestamp::as_unix_millis),
        "finished_at": run.finished_at.map(Timestamp::as_unix_millis),
        "error": run.error,
    })
}

// ============================================================================
// SECTION: Streaming Execution
// ============================================================================

/// `POST /api/workflows/{workflow_id}/execute/stream`
///
/// # Errors
///
/// Returns [`ApiError`] before any event is written when a prepare gate
/// rejects (validator 400, policy 403, missing entities 404).
pub async fn execute_stream(
    State(state): State<Arc<ServerState>>,
    Path(workflow_id): Path<String>,
    Json(body): Json<ExecuteStreamBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut request =
        EntryRequest::new(WorkflowId::new(workflow_id), RunId::new(body.run_id));
    request.input = body.initial_input;

    let receiver = state.entry.execute_streaming(request).await?;
    let stream = ReceiverStream::new(receiver).map(|event| {
        Ok::<Event, Infallible>(Event::default().data(event.to_json().to_string()))
    });
    Ok(Sse::new(stream))
}

// ============================================================================
// SECTION: Event Replay
// ============================================================================

/// `GET /api/runs/{run_id}/events`
///
/// # Errors
///
/// Returns [`ApiError`] for unknown runs or channels.
pub async fn list_run_events(
    State(state): State<Arc<ServerState>>,
    Path(run_id): Path<String>,
    Query(query): Query<EventListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = RunId::new(run_id);
    state.runs.get_by_id(&run_id)?;

    let channel = match query.channel.as_deref() {
        None => None,
        Some(raw) => Some(EventChannel::parse(raw).ok_or_else(|| {
            ApiError::bad_request("invalid_channel", format!("unknown channel: {raw}"))
        })?),
    };

    let page = state.journal.list(&run_id, channel, query.cursor, query.limit)?;
    Ok(Json(json!({
        "run_id": run_id.as_str(),
        "events": page.events.iter().map(runloop_core::RunEvent::flattened).collect::<Vec<_>>(),
        "has_more": page.has_more,
        "next_cursor": page.next_cursor,
    })))
}

// ============================================================================
// SECTION: Confirmation
// ============================================================================

/// `POST /api/runs/{run_id}/confirm`
///
/// # Errors
///
/// Returns [`ApiError`] for unknown confirmations or malformed decisions.
pub async fn confirm_run(
    State(state): State<Arc<ServerState>>,
    Path(run_id): Path<String>,
    Json(body): Json<ConfirmBody>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = ConfirmDecision::parse(body.decision.trim()).ok_or_else(|| {
        ApiError::bad_request("domain_validation", "decision must be 'allow' or 'deny'")
    })?;
    state.confirmations.resolve(
        &RunId::new(run_id),
        &ConfirmId::new(body.confirm_id),
        decision,
    )?;
    Ok(Json(json!({"ok": true})))
}

// ============================================================================
// SECTION: Capabilities
// ============================================================================

/// `GET /api/workflows/capabilities`
pub async fn get_capabilities(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(build_manifest(&state.validator))
}
