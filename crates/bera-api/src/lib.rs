//! bera-api: REST API for Bera Host.
//!
//! Provides axum route handlers for applications, config vars, releases,
//! logs, add-ons and deploys, the admin surface, and the `/ws` live log
//! stream.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/apps` | List applications |
//! | POST | `/api/apps` | Create an application |
//! | GET | `/api/apps/{id}` | Get an application |
//! | DELETE | `/api/apps/{id}` | Delete an application and its history |
//! | GET | `/api/apps/{id}/config` | List config vars |
//! | POST | `/api/apps/{id}/config` | Set a config var (new release) |
//! | DELETE | `/api/apps/{id}/config/{key}` | Remove a config var (new release) |
//! | DELETE | `/api/config/{id}` | Remove a config var by id (new release) |
//! | GET | `/api/apps/{id}/logs` | Most recent logs, oldest first |
//! | GET | `/api/apps/{id}/releases` | Releases, newest first |
//! | GET | `/api/apps/{id}/activity` | Activity, newest first |
//! | POST | `/api/apps/{id}/deploy` | Start a deploy |
//! | POST | `/api/apps/{id}/deploy/cancel` | Cancel an in-flight deploy |
//! | GET | `/api/apps/{id}/addons` | List attached add-ons |
//! | POST | `/api/apps/{id}/addons` | Attach an add-on (new release) |
//! | GET | `/api/addons/catalog` | Add-on catalog |
//! | GET | `/api/admin/stats` | Store totals and live subscribers |
//! | GET | `/api/admin/activity` | Latest activity across apps |
//! | POST | `/api/admin/catalog` | Add a catalog entry |
//! | DELETE | `/api/admin/catalog/{id}` | Remove a catalog entry |
//! | POST | `/api/admin/apps/{id}/stop` | Stop an application |
//! | POST | `/api/admin/apps/{id}/start` | Start an application |
//! | DELETE | `/api/admin/apps/{id}` | Delete an application |
//! | GET | `/ws` | Live log stream, `?app=` filters by application |
//! | GET | `/healthz` | Liveness |

pub mod addon_handlers;
pub mod admin_handlers;
pub mod handlers;
mod response;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use bera_core::BeraConfig;
use bera_deploy::{DeployPipeline, DeployScript, Timer, TokioTimer};
use bera_release::ReleaseLedger;
use bera_state::StateStore;
use bera_stream::EventBus;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub ledger: ReleaseLedger,
    pub bus: Arc<EventBus>,
    pub pipeline: DeployPipeline,
    pub admin_tokens: Arc<Vec<String>>,
    pub subscriber_buffer: usize,
}

impl ApiState {
    /// Wire the ledger, bus and pipeline over `store` with real step delays.
    pub fn new(store: StateStore, config: &BeraConfig) -> Self {
        Self::with_timer(store, config, Arc::new(TokioTimer))
    }

    pub fn with_timer(store: StateStore, config: &BeraConfig, timer: Arc<dyn Timer>) -> Self {
        let ledger = ReleaseLedger::new(Arc::new(store.clone()));
        let bus = Arc::new(EventBus::new(Arc::new(store.clone())));
        let pipeline = DeployPipeline::new(
            Arc::new(store.clone()),
            ledger.clone(),
            bus.clone(),
            timer,
            DeployScript::standard(config.step_delay()),
        )
        .with_policy(config.deploy.policy);

        Self {
            store,
            ledger,
            bus,
            pipeline,
            admin_tokens: Arc::new(config.admin.tokens.clone()),
            subscriber_buffer: config.stream.subscriber_buffer,
        }
    }
}

/// Build the complete router (REST + admin + WebSocket).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/apps", get(handlers::list_apps).post(handlers::create_app))
        .route("/apps/{id}", get(handlers::get_app).delete(handlers::delete_app))
        .route("/apps/{id}/config", get(handlers::list_config).post(handlers::set_config))
        .route("/apps/{id}/config/{key}", delete(handlers::remove_config))
        .route("/config/{id}", delete(handlers::remove_config_by_id))
        .route("/apps/{id}/logs", get(handlers::recent_logs))
        .route("/apps/{id}/releases", get(handlers::list_releases))
        .route("/apps/{id}/activity", get(handlers::list_activity))
        .route("/apps/{id}/deploy", post(handlers::start_deploy))
        .route("/apps/{id}/deploy/cancel", post(handlers::cancel_deploy))
        .route(
            "/apps/{id}/addons",
            get(addon_handlers::list_addons).post(addon_handlers::attach_addon),
        )
        .route("/addons/catalog", get(addon_handlers::list_catalog));

    let admin_routes = Router::new()
        .route("/stats", get(admin_handlers::stats))
        .route("/activity", get(admin_handlers::recent_activity))
        .route("/catalog", post(admin_handlers::create_catalog_item))
        .route("/catalog/{id}", delete(admin_handlers::delete_catalog_item))
        .route("/apps/{id}/stop", post(admin_handlers::stop_app))
        .route("/apps/{id}/start", post(admin_handlers::start_app))
        .route("/apps/{id}", delete(admin_handlers::delete_app))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_handlers::require_admin,
        ));

    Router::new()
        .nest("/api", api_routes.nest("/admin", admin_routes))
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
