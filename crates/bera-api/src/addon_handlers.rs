//! Add-on handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;

use crate::ApiState;
use crate::response::{ledger_error, state_error};

pub const DEFAULT_PLAN: &str = "Free";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachAddonRequest {
    pub addon_id: String,
    pub plan: Option<String>,
}

/// GET /api/addons/catalog
pub async fn list_catalog(State(state): State<ApiState>) -> Response {
    match state.store.list_catalog() {
        Ok(items) => Json(items).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/apps/{id}/addons
pub async fn list_addons(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.list_addons(&id) {
        Ok(addons) => Json(addons).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/apps/{id}/addons
pub async fn attach_addon(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<AttachAddonRequest>,
) -> Response {
    let plan = req.plan.as_deref().unwrap_or(DEFAULT_PLAN);
    match state.ledger.attach_addon(&id, &req.addon_id, plan) {
        Ok(attached) => {
            info!(app_id = %id, addon = %attached.addon.name, %plan, "addon provisioned");
            (StatusCode::CREATED, Json(attached.addon)).into_response()
        }
        Err(e) => ledger_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bera_core::BeraConfig;
    use bera_deploy::ImmediateTimer;
    use bera_state::{CatalogItem, StateStore};

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        store
            .seed_catalog(&[CatalogItem {
                id: "bera-redis".into(),
                name: "Bera Redis".into(),
                description: "In-memory key-value store".into(),
                category: "Data Store".into(),
                icon: "zap".into(),
            }])
            .unwrap();
        ApiState::with_timer(store, &BeraConfig::default(), Arc::new(ImmediateTimer))
    }

    #[tokio::test]
    async fn catalog_lists_seeded_items() {
        let state = test_state();
        let resp = list_catalog(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn attach_injects_config_and_release() {
        let state = test_state();
        let app = state.store.create_app("web", "us").unwrap();

        let resp = attach_addon(
            State(state.clone()),
            Path(app.id.clone()),
            Json(AttachAddonRequest {
                addon_id: "bera-redis".into(),
                plan: None,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let addons = state.store.list_addons(&app.id).unwrap();
        assert_eq!(addons.len(), 1);
        assert_eq!(addons[0].plan, "Free");

        let vars = state.store.list_config_vars(&app.id).unwrap();
        assert_eq!(vars[0].key, "BERA_REDIS_URL");
        assert_eq!(state.store.release_count(&app.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn attach_unknown_addon_is_not_found() {
        let state = test_state();
        let app = state.store.create_app("web", "us").unwrap();
        let resp = attach_addon(
            State(state),
            Path(app.id),
            Json(AttachAddonRequest {
                addon_id: "nope".into(),
                plan: Some("Pro".into()),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
