// runloop-server/src/error.rs
// ============================================================================
// Module: API Error Mapping
// Description: Stable error codes and HTTP status mapping.
// Purpose: Translate domain failures into templated JSON error responses.
// Dependencies: axum, runloop-core, serde
// ============================================================================

//! ## Overview
//! Every API failure serializes as `{"error": {"code", "message"}}` with a
//! stable code. Mapping follows the error taxonomy: missing entities are 404,
//! validation and run-gate failures are 400, policy denials are 403, and
//! storage faults are opaque 500s.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use runloop_core::StoreError;
use runloop_core::runtime::AcceptanceError;
use runloop_core::runtime::ConfirmError;
use runloop_core::runtime::EntryError;
use serde::Serialize;
use serde_json::json;

// ============================================================================
// SECTION: API Error
// ============================================================================

/// API-facing error with a stable code.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// HTTP status.
    #[serde(skip)]
    pub status: StatusCode,
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Creates an error with the given parts.
    #[must_use]
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self { status, code: code.to_string(), message: message.into() }
    }

    /// Creates a 400 validation error.
    #[must_use]
    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    /// Creates a 404 missing-entity error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}

// ============================================================================
// SECTION: Conversions
// ============================================================================

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match &error {
            StoreError::NotFound { .. } => Self::not_found(error.to_string()),
            StoreError::Invalid(message) => Self::bad_request("domain_validation", message.clone()),
            StoreError::Store(_) | StoreError::Io(_) | StoreError::Corrupt(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage failure")
            }
        }
    }
}

impl From<EntryError> for ApiError {
    fn from(error: EntryError) -> Self {
        match &error {
            EntryError::DomainValidation(message) => {
                Self::bad_request("domain_validation", message.clone())
            }
            EntryError::Validation(inner) => {
                Self::bad_request(inner.code(), error.to_string())
            }
            EntryError::Gate(inner) => Self::bad_request(inner.code(), error.to_string()),
            EntryError::Policy(_) => {
                Self::new(StatusCode::FORBIDDEN, "policy_denied", error.to_string())
            }
            EntryError::Store(inner) if inner.is_not_found() => {
                Self::not_found(error.to_string())
            }
            EntryError::Store(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage failure")
            }
        }
    }
}

impl From<ConfirmError> for ApiError {
    fn from(error: ConfirmError) -> Self {
        match error {
            ConfirmError::NotFound => Self::bad_request("confirm_not_found", error.to_string()),
            ConfirmError::WrongRun => Self::bad_request("confirm_wrong_run", error.to_string()),
            ConfirmError::MissingField(_) | ConfirmError::Timeout => {
                Self::bad_request("domain_validation", error.to_string())
            }
            ConfirmError::Poisoned => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "confirm_store_error", "store failure")
            }
        }
    }
}

impl From<AcceptanceError> for ApiError {
    fn from(error: AcceptanceError) -> Self {
        match &error {
            AcceptanceError::MissingField(_) | AcceptanceError::Evaluator(_) => {
                Self::bad_request("domain_validation", error.to_string())
            }
            AcceptanceError::Store(inner) if inner.is_not_found() => {
                Self::not_found(error.to_string())
            }
            AcceptanceError::Store(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage failure")
            }
        }
    }
}
