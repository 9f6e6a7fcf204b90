//! Admin handlers.
//!
//! Every route here sits behind [`require_admin`], which checks the
//! presented bearer token against the configured admin tokens. Tokens are
//! issued elsewhere; with none configured the admin surface is closed.

use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bera_state::{AppStatus, CatalogItem};
use serde::Serialize;
use tracing::{info, warn};

use crate::ApiState;
use crate::handlers::remove_app;
use crate::response::{error_response, state_error, success};

pub const ADMIN_ACTOR: &str = "admin";
pub const RECENT_ACTIVITY_LIMIT: usize = 50;

/// Reject requests without a configured bearer token.
pub async fn require_admin(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let verdict = match token {
        None => Err("Unauthorized"),
        Some(t) if !t.is_empty() && state.admin_tokens.iter().any(|known| known == t) => Ok(()),
        Some(_) => Err("Invalid token"),
    };

    match verdict {
        Ok(()) => next.run(request).await,
        Err(msg) => {
            warn!(path = %request.uri().path(), "admin request refused: {msg}");
            error_response(msg, StatusCode::UNAUTHORIZED)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_apps: u64,
    pub total_releases: u64,
    pub total_addons: u64,
    pub running_apps: u64,
    pub live_subscribers: usize,
    pub active_deploys: usize,
}

/// GET /api/admin/stats
pub async fn stats(State(state): State<ApiState>) -> Response {
    match state.store.stats() {
        Ok(totals) => Json(AdminStats {
            total_apps: totals.total_apps,
            total_releases: totals.total_releases,
            total_addons: totals.total_addons,
            running_apps: totals.running_apps,
            live_subscribers: state.bus.subscriber_count(),
            active_deploys: state.pipeline.active_deploys(),
        })
        .into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/admin/activity
pub async fn recent_activity(State(state): State<ApiState>) -> Response {
    match state.store.recent_activity(RECENT_ACTIVITY_LIMIT) {
        Ok(activity) => Json(activity).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/admin/catalog
pub async fn create_catalog_item(
    State(state): State<ApiState>,
    Json(item): Json<CatalogItem>,
) -> Response {
    match state.store.insert_catalog_item(&item) {
        Ok(()) => {
            info!(catalog_id = %item.id, "catalog item added");
            (StatusCode::CREATED, Json(item)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// DELETE /api/admin/catalog/{id}
pub async fn delete_catalog_item(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.delete_catalog_item(&id) {
        Ok(true) => success(),
        Ok(false) => error_response("catalog item not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// POST /api/admin/apps/{id}/stop
pub async fn stop_app(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    state.pipeline.cancel_and_wait(&id).await;
    set_status(
        &state,
        &id,
        AppStatus::Idle,
        "app:stop",
        "Admin stopped the application",
    )
}

/// POST /api/admin/apps/{id}/start
pub async fn start_app(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    set_status(
        &state,
        &id,
        AppStatus::Running,
        "app:start",
        "Admin started the application",
    )
}

fn set_status(
    state: &ApiState,
    id: &str,
    status: AppStatus,
    action: &str,
    description: &str,
) -> Response {
    match state
        .store
        .set_app_status_with_activity(id, status, ADMIN_ACTOR, action, description)
    {
        Ok(app) => {
            info!(app_id = %id, %status, "application status changed by admin");
            Json(app).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// DELETE /api/admin/apps/{id}
pub async fn delete_app(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    remove_app(&state, &id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bera_core::BeraConfig;
    use bera_deploy::ImmediateTimer;
    use bera_state::StateStore;
    use bera_stream::Topic;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let mut config = BeraConfig::default();
        config.admin.tokens = vec!["s3cret".into()];
        ApiState::with_timer(store, &config, Arc::new(ImmediateTimer))
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn stats_include_live_subscribers() {
        let state = test_state();
        let app = state.store.create_app("web", "us").unwrap();
        state.store.set_app_status(&app.id, AppStatus::Running).unwrap();
        let (_id, _rx) = state.bus.subscribe_channel(Topic::All, 8);

        let resp = stats(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["totalApps"], 1);
        assert_eq!(body["runningApps"], 1);
        assert_eq!(body["liveSubscribers"], 1);
    }

    #[tokio::test]
    async fn stop_and_start_write_activity() {
        let state = test_state();
        let app = state.store.create_app("web", "us").unwrap();

        let resp = start_app(State(state.clone()), Path(app.id.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = stop_app(State(state.clone()), Path(app.id.clone())).await;
        assert_eq!(body_json(resp).await["status"], "idle");

        let activity = state.store.list_activity(&app.id).unwrap();
        let actions: Vec<&str> = activity.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["app:stop", "app:start"]);
        assert!(activity.iter().all(|a| a.actor == "admin"));

        let resp = recent_activity(State(state)).await;
        let body = body_json(resp).await;
        assert_eq!(body[0]["app_name"], "web");
    }

    #[tokio::test]
    async fn stop_unknown_app_is_not_found() {
        let state = test_state();
        let resp = stop_app(State(state), Path("ghost".into())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn catalog_management() {
        let state = test_state();
        let item = CatalogItem {
            id: "log-drain".into(),
            name: "Log Drain".into(),
            description: "Forward logs".into(),
            category: "Monitoring".into(),
            icon: "activity".into(),
        };
        let resp = create_catalog_item(State(state.clone()), Json(item.clone())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = create_catalog_item(State(state.clone()), Json(item)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = delete_catalog_item(State(state.clone()), Path("log-drain".into())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = delete_catalog_item(State(state), Path("log-drain".into())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
