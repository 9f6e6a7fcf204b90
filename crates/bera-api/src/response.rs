//! JSON error bodies and domain error → status mapping.

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bera_deploy::DeployError;
use bera_release::LedgerError;
use bera_state::{SYSTEM_ACTOR, StateError};
use serde::Serialize;

/// Header naming the caller on release activity entries.
pub(crate) const ACTOR_HEADER: &str = "x-bera-actor";

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ErrorBody {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

pub(crate) fn success() -> Response {
    Json(serde_json::json!({ "success": true })).into_response()
}

pub(crate) fn state_error(e: StateError) -> Response {
    let status = match &e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::Constraint(_) => StatusCode::BAD_REQUEST,
        StateError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

pub(crate) fn ledger_error(e: LedgerError) -> Response {
    let status = match &e {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Invalid(_) => StatusCode::BAD_REQUEST,
        LedgerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

pub(crate) fn deploy_error(e: DeployError) -> Response {
    let status = match &e {
        DeployError::NotFound(_) => StatusCode::NOT_FOUND,
        DeployError::Conflict(_) => StatusCode::CONFLICT,
        DeployError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

/// The caller named by `x-bera-actor`, or `system`.
pub(crate) fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(SYSTEM_ACTOR)
        .to_string()
}
