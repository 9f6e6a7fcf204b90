//! Narrow store interfaces used by the ledger, the event bus and the deploy
//! pipeline.
//!
//! [`StateStore`] implements all of them. Consumers hold them as trait
//! objects so tests can wrap the store and inject failures.

use crate::error::StateResult;
use crate::store::{AttachedAddon, StateStore};
use crate::types::*;

/// Application lookups and lifecycle status.
pub trait AppStore: Send + Sync {
    fn get_app(&self, app_id: &str) -> StateResult<Option<Application>>;

    /// Set the status and touch `updated_at`.
    fn set_app_status(&self, app_id: &str, status: AppStatus) -> StateResult<Application>;
}

/// Durable log sink.
pub trait LogStore: Send + Sync {
    fn append_log(&self, event: &LogEvent) -> StateResult<u64>;
}

/// Release history and the config mutations that feed it.
pub trait ReleaseStore: Send + Sync {
    fn record_release(
        &self,
        app_id: &str,
        description: &str,
        status: ReleaseStatus,
        actor: &str,
    ) -> StateResult<Release>;

    fn list_releases(&self, app_id: &str) -> StateResult<Vec<Release>>;

    fn release_count(&self, app_id: &str) -> StateResult<u64>;

    fn set_config_var(
        &self,
        app_id: &str,
        key: &str,
        value: &str,
        actor: &str,
    ) -> StateResult<(ConfigVar, Release)>;

    fn remove_config_var(
        &self,
        app_id: &str,
        key: &str,
        actor: &str,
    ) -> StateResult<(ConfigVar, Release)>;

    /// Look up by id and remove in one step.
    fn remove_config_var_by_id(&self, id: u64, actor: &str) -> StateResult<(ConfigVar, Release)>;

    fn attach_addon(&self, app_id: &str, catalog_id: &str, plan: &str)
    -> StateResult<AttachedAddon>;
}

impl AppStore for StateStore {
    fn get_app(&self, app_id: &str) -> StateResult<Option<Application>> {
        StateStore::get_app(self, app_id)
    }

    fn set_app_status(&self, app_id: &str, status: AppStatus) -> StateResult<Application> {
        StateStore::set_app_status(self, app_id, status)
    }
}

impl LogStore for StateStore {
    fn append_log(&self, event: &LogEvent) -> StateResult<u64> {
        StateStore::append_log(self, event)
    }
}

impl ReleaseStore for StateStore {
    fn record_release(
        &self,
        app_id: &str,
        description: &str,
        status: ReleaseStatus,
        actor: &str,
    ) -> StateResult<Release> {
        StateStore::record_release(self, app_id, description, status, actor)
    }

    fn list_releases(&self, app_id: &str) -> StateResult<Vec<Release>> {
        StateStore::list_releases(self, app_id)
    }

    fn release_count(&self, app_id: &str) -> StateResult<u64> {
        StateStore::release_count(self, app_id)
    }

    fn set_config_var(
        &self,
        app_id: &str,
        key: &str,
        value: &str,
        actor: &str,
    ) -> StateResult<(ConfigVar, Release)> {
        StateStore::set_config_var(self, app_id, key, value, actor)
    }

    fn remove_config_var(
        &self,
        app_id: &str,
        key: &str,
        actor: &str,
    ) -> StateResult<(ConfigVar, Release)> {
        StateStore::remove_config_var(self, app_id, key, actor)
    }

    fn remove_config_var_by_id(&self, id: u64, actor: &str) -> StateResult<(ConfigVar, Release)> {
        StateStore::remove_config_var_by_id(self, id, actor)
    }

    fn attach_addon(
        &self,
        app_id: &str,
        catalog_id: &str,
        plan: &str,
    ) -> StateResult<AttachedAddon> {
        StateStore::attach_addon(self, app_id, catalog_id, plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn state_store_works_through_trait_objects() {
        let store = StateStore::open_in_memory().unwrap();
        let app = store.create_app("web", "us").unwrap();

        let apps: Arc<dyn AppStore> = Arc::new(store.clone());
        let logs: Arc<dyn LogStore> = Arc::new(store.clone());
        let releases: Arc<dyn ReleaseStore> = Arc::new(store.clone());

        apps.set_app_status(&app.id, AppStatus::Deploying).unwrap();
        logs.append_log(&LogEvent::build(&app.id, "-----> Cloning")).unwrap();
        releases
            .record_release(&app.id, "Deploy main", ReleaseStatus::Succeeded, "system")
            .unwrap();

        assert_eq!(apps.get_app(&app.id).unwrap().unwrap().status, AppStatus::Deploying);
        assert_eq!(releases.release_count(&app.id).unwrap(), 1);
        assert_eq!(store.recent_logs(&app.id, 10).unwrap().len(), 1);
    }
}
