//! REST API handlers for applications, config, history and deploys.
//!
//! Reads go straight to the `StateStore`; anything that creates a release
//! goes through the `ReleaseLedger` or the `DeployPipeline`.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bera_deploy::DeployRequest;
use bera_state::{ConfigVar, Release};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ApiState;
use crate::response::{
    actor, deploy_error, error_response, ledger_error, state_error, success,
};

pub const DEFAULT_LOG_LIMIT: usize = 100;
pub const MAX_LOG_LIMIT: usize = 1000;
pub const DEFAULT_REGION: &str = "us";

// ── Applications ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub region: Option<String>,
}

/// GET /api/apps
pub async fn list_apps(State(state): State<ApiState>) -> Response {
    match state.store.list_apps() {
        Ok(apps) => Json(apps).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/apps
pub async fn create_app(
    State(state): State<ApiState>,
    Json(req): Json<CreateAppRequest>,
) -> Response {
    let region = req.region.as_deref().unwrap_or(DEFAULT_REGION);
    match state.store.create_app(req.name.trim(), region) {
        Ok(app) => {
            info!(app_id = %app.id, name = %app.name, "application created");
            (StatusCode::CREATED, Json(app)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// GET /api/apps/{id}
pub async fn get_app(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.get_app(&id) {
        Ok(Some(app)) => Json(app).into_response(),
        Ok(None) => error_response("App not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// DELETE /api/apps/{id}
pub async fn delete_app(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    remove_app(&state, &id).await
}

/// Cancel any running deploy, then delete the app and its history. The
/// delete waits for cancelled runs to write their last line, so nothing is
/// left behind under the app's id.
pub(crate) async fn remove_app(state: &ApiState, id: &str) -> Response {
    state.pipeline.cancel_and_wait(id).await;
    match state.store.delete_app(id) {
        Ok(true) => {
            info!(app_id = %id, "application deleted");
            success()
        }
        Ok(false) => error_response("App not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

// ── Config vars ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    pub key: String,
    pub value: String,
}

/// A config change and the release it produced.
#[derive(Debug, Serialize)]
pub struct ConfigChange {
    pub config_var: ConfigVar,
    pub release: Release,
}

/// GET /api/apps/{id}/config
pub async fn list_config(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.list_config_vars(&id) {
        Ok(vars) => Json(vars).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/apps/{id}/config
pub async fn set_config(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SetConfigRequest>,
) -> Response {
    match state
        .ledger
        .set_config_var(&id, req.key.trim(), &req.value, &actor(&headers))
    {
        Ok((config_var, release)) => Json(ConfigChange {
            config_var,
            release,
        })
        .into_response(),
        Err(e) => ledger_error(e),
    }
}

/// DELETE /api/apps/{id}/config/{key}
pub async fn remove_config(
    State(state): State<ApiState>,
    Path((id, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    match state.ledger.remove_config_var(&id, &key, &actor(&headers)) {
        Ok((config_var, release)) => Json(ConfigChange {
            config_var,
            release,
        })
        .into_response(),
        Err(e) => ledger_error(e),
    }
}

/// DELETE /api/config/{id}
pub async fn remove_config_by_id(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    match state.ledger.remove_config_var_by_id(id, &actor(&headers)) {
        Ok((config_var, release)) => Json(ConfigChange {
            config_var,
            release,
        })
        .into_response(),
        Err(e) => ledger_error(e),
    }
}

// ── History ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

/// GET /api/apps/{id}/logs
pub async fn recent_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    match state.store.recent_logs(&id, limit) {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/apps/{id}/releases
pub async fn list_releases(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.ledger.list_releases(&id) {
        Ok(releases) => Json(releases).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// GET /api/apps/{id}/activity
pub async fn list_activity(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.list_activity(&id) {
        Ok(activity) => Json(activity).into_response(),
        Err(e) => state_error(e),
    }
}

// ── Deploys ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployBody {
    pub repo_url: Option<String>,
    pub branch: Option<String>,
}

/// POST /api/apps/{id}/deploy
///
/// The body is optional. Responds 202 once the app is `deploying`; the
/// run continues in the background.
pub async fn start_deploy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: DeployBody = if body.is_empty() {
        DeployBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(b) => b,
            Err(e) => {
                return error_response(&format!("invalid deploy body: {e}"), StatusCode::BAD_REQUEST);
            }
        }
    };

    let request = DeployRequest {
        app_id: id,
        repo_url: body.repo_url,
        branch: body.branch,
        actor: actor(&headers),
    };
    match state.pipeline.start_deploy(request) {
        // Dropping the ticket detaches the run.
        Ok(_ticket) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "started" })),
        )
            .into_response(),
        Err(e) => deploy_error(e),
    }
}

/// POST /api/apps/{id}/deploy/cancel
pub async fn cancel_deploy(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    if state.pipeline.cancel(&id) {
        Json(serde_json::json!({ "status": "cancelling" })).into_response()
    } else {
        error_response("no deploy in progress", StatusCode::NOT_FOUND)
    }
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
