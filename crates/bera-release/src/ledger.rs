//! The release ledger.
//!
//! `ReleaseLedger` wraps a [`ReleaseStore`] and is the single entry point
//! for anything that creates a release: config mutations, add-on
//! attachment, and deploy completion.

use std::sync::Arc;

use bera_state::{AttachedAddon, ConfigVar, Release, ReleaseStatus, ReleaseStore};
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};

#[derive(Clone)]
pub struct ReleaseLedger {
    store: Arc<dyn ReleaseStore>,
}

impl ReleaseLedger {
    pub fn new(store: Arc<dyn ReleaseStore>) -> Self {
        Self { store }
    }

    /// Append a succeeded release with the next version for `app_id`.
    pub fn record_release(
        &self,
        app_id: &str,
        description: &str,
        actor: &str,
    ) -> LedgerResult<Release> {
        self.record(app_id, description, ReleaseStatus::Succeeded, actor)
    }

    /// Append a failed release; it still consumes a version.
    pub fn record_failed_release(
        &self,
        app_id: &str,
        description: &str,
        actor: &str,
    ) -> LedgerResult<Release> {
        self.record(app_id, description, ReleaseStatus::Failed, actor)
    }

    fn record(
        &self,
        app_id: &str,
        description: &str,
        status: ReleaseStatus,
        actor: &str,
    ) -> LedgerResult<Release> {
        let release = self
            .store
            .record_release(app_id, description, status, actor)
            .map_err(|e| {
                warn!(%app_id, error = %e, "failed to record release");
                LedgerError::from(e)
            })?;
        info!(
            %app_id,
            version = release.version,
            status = ?release.status,
            description = %release.description,
            "release recorded"
        );
        Ok(release)
    }

    /// All releases of `app_id`, highest version first.
    pub fn list_releases(&self, app_id: &str) -> LedgerResult<Vec<Release>> {
        Ok(self.store.list_releases(app_id)?)
    }

    pub fn release_count(&self, app_id: &str) -> LedgerResult<u64> {
        Ok(self.store.release_count(app_id)?)
    }

    /// Add or overwrite a config var. The write and its release commit
    /// together.
    pub fn set_config_var(
        &self,
        app_id: &str,
        key: &str,
        value: &str,
        actor: &str,
    ) -> LedgerResult<(ConfigVar, Release)> {
        let (var, release) = self.store.set_config_var(app_id, key, value, actor)?;
        info!(%app_id, %key, version = release.version, "config var set");
        Ok((var, release))
    }

    /// Remove a config var by key. A missing key is `NotFound` and records
    /// nothing.
    pub fn remove_config_var(
        &self,
        app_id: &str,
        key: &str,
        actor: &str,
    ) -> LedgerResult<(ConfigVar, Release)> {
        let (var, release) = self.store.remove_config_var(app_id, key, actor)?;
        info!(%app_id, %key, version = release.version, "config var removed");
        Ok((var, release))
    }

    /// Remove a config var by its numeric id.
    pub fn remove_config_var_by_id(
        &self,
        id: u64,
        actor: &str,
    ) -> LedgerResult<(ConfigVar, Release)> {
        let (var, release) = self.store.remove_config_var_by_id(id, actor)?;
        info!(app_id = %var.app_id, key = %var.key, version = release.version, "config var removed");
        Ok((var, release))
    }

    /// Attach a catalog add-on; its injected config var produces a release.
    pub fn attach_addon(
        &self,
        app_id: &str,
        catalog_id: &str,
        plan: &str,
    ) -> LedgerResult<AttachedAddon> {
        let attached = self.store.attach_addon(app_id, catalog_id, plan)?;
        info!(
            %app_id,
            addon = %attached.addon.name,
            key = %attached.config_var.key,
            version = attached.release.version,
            "addon attached"
        );
        Ok(attached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use bera_state::{CatalogItem, StateError, StateResult, StateStore};

    /// Delegates to a real store until `fail` is flipped.
    struct FlakyStore {
        inner: StateStore,
        fail: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> StateResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                Err(StateError::Unavailable("disk detached".into()))
            } else {
                Ok(())
            }
        }
    }

    impl ReleaseStore for FlakyStore {
        fn record_release(
            &self,
            app_id: &str,
            description: &str,
            status: ReleaseStatus,
            actor: &str,
        ) -> StateResult<Release> {
            self.check()?;
            self.inner.record_release(app_id, description, status, actor)
        }

        fn list_releases(&self, app_id: &str) -> StateResult<Vec<Release>> {
            self.check()?;
            self.inner.list_releases(app_id)
        }

        fn release_count(&self, app_id: &str) -> StateResult<u64> {
            self.check()?;
            self.inner.release_count(app_id)
        }

        fn set_config_var(
            &self,
            app_id: &str,
            key: &str,
            value: &str,
            actor: &str,
        ) -> StateResult<(ConfigVar, Release)> {
            self.check()?;
            self.inner.set_config_var(app_id, key, value, actor)
        }

        fn remove_config_var(
            &self,
            app_id: &str,
            key: &str,
            actor: &str,
        ) -> StateResult<(ConfigVar, Release)> {
            self.check()?;
            self.inner.remove_config_var(app_id, key, actor)
        }

        fn remove_config_var_by_id(
            &self,
            id: u64,
            actor: &str,
        ) -> StateResult<(ConfigVar, Release)> {
            self.check()?;
            self.inner.remove_config_var_by_id(id, actor)
        }

        fn attach_addon(
            &self,
            app_id: &str,
            catalog_id: &str,
            plan: &str,
        ) -> StateResult<AttachedAddon> {
            self.check()?;
            self.inner.attach_addon(app_id, catalog_id, plan)
        }
    }

    fn setup() -> (StateStore, ReleaseLedger, String) {
        let store = StateStore::open_in_memory().unwrap();
        let app = store.create_app("web", "us").unwrap();
        let ledger = ReleaseLedger::new(Arc::new(store.clone()));
        (store, ledger, app.id)
    }

    #[test]
    fn first_release_is_version_one() {
        let (_, ledger, app_id) = setup();
        let release = ledger.record_release(&app_id, "Deploy main", "alice").unwrap();
        assert_eq!(release.version, 1);
        assert_eq!(release.status, ReleaseStatus::Succeeded);
    }

    #[test]
    fn failed_release_takes_a_version() {
        let (_, ledger, app_id) = setup();
        ledger.record_release(&app_id, "Deploy main", "alice").unwrap();
        let failed = ledger
            .record_failed_release(&app_id, "Deploy main failed: tests", "alice")
            .unwrap();
        assert_eq!(failed.version, 2);
        assert_eq!(failed.status, ReleaseStatus::Failed);
    }

    #[test]
    fn unknown_app_is_not_found() {
        let (_, ledger, _) = setup();
        let err = ledger.record_release("ghost", "Deploy main", "alice").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn each_config_change_adds_exactly_one_release() {
        let (_, ledger, app_id) = setup();
        ledger.set_config_var(&app_id, "A", "1", "alice").unwrap();
        ledger.set_config_var(&app_id, "B", "2", "alice").unwrap();
        ledger.set_config_var(&app_id, "A", "3", "alice").unwrap();
        ledger.remove_config_var(&app_id, "B", "alice").unwrap();

        let releases = ledger.list_releases(&app_id).unwrap();
        let versions: Vec<u64> = releases.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![4, 3, 2, 1]);
        assert_eq!(releases[0].description, "Remove config var B");
        assert_eq!(releases[3].description, "Set config var A");
    }

    #[test]
    fn remove_missing_key_records_nothing() {
        let (_, ledger, app_id) = setup();
        let err = ledger.remove_config_var(&app_id, "NOPE", "alice").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert_eq!(ledger.release_count(&app_id).unwrap(), 0);
    }

    #[test]
    fn empty_key_is_invalid() {
        let (_, ledger, app_id) = setup();
        let err = ledger.set_config_var(&app_id, "  ", "1", "alice").unwrap_err();
        assert!(matches!(err, LedgerError::Invalid(_)));
    }

    #[test]
    fn remove_by_id() {
        let (store, ledger, app_id) = setup();
        let (var, _) = ledger.set_config_var(&app_id, "PORT", "80", "alice").unwrap();
        let (removed, release) = ledger.remove_config_var_by_id(var.id, "alice").unwrap();
        assert_eq!(removed.key, "PORT");
        assert_eq!(release.version, 2);
        assert!(store.list_config_vars(&app_id).unwrap().is_empty());

        let err = ledger.remove_config_var_by_id(var.id, "alice").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn addon_attachment_is_a_release() {
        let (store, ledger, app_id) = setup();
        store
            .insert_catalog_item(&CatalogItem {
                id: "bera-redis".into(),
                name: "Bera Redis".into(),
                description: "Key-value store".into(),
                category: "Data Store".into(),
                icon: "zap".into(),
            })
            .unwrap();
        ledger.record_release(&app_id, "Deploy main", "alice").unwrap();

        let attached = ledger.attach_addon(&app_id, "bera-redis", "Free").unwrap();
        assert_eq!(attached.release.version, 2);
        assert_eq!(attached.release.description, "Set config var BERA_REDIS_URL");
    }

    #[test]
    fn store_failure_is_persistence_error_and_writes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let app = store.create_app("web", "us").unwrap();
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            fail: AtomicBool::new(true),
        });
        let ledger = ReleaseLedger::new(flaky.clone());

        let err = ledger.set_config_var(&app.id, "A", "1", "alice").unwrap_err();
        assert!(matches!(err, LedgerError::Persistence(_)));
        assert!(store.list_config_vars(&app.id).unwrap().is_empty());
        assert_eq!(store.release_count(&app.id).unwrap(), 0);

        flaky.fail.store(false, Ordering::SeqCst);
        let release = ledger.record_release(&app.id, "Deploy main", "alice").unwrap();
        assert_eq!(release.version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fifty_concurrent_releases_get_distinct_gapless_versions() {
        let (_, ledger, app_id) = setup();
        let mut handles = Vec::new();
        for i in 0..50 {
            let ledger = ledger.clone();
            let app_id = app_id.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                ledger
                    .record_release(&app_id, &format!("Deploy {i}"), "alice")
                    .unwrap()
                    .version
            }));
        }

        let mut versions = BTreeSet::new();
        for handle in handles {
            assert!(versions.insert(handle.await.unwrap()), "duplicate version");
        }
        assert_eq!(versions, (1..=50).collect::<BTreeSet<u64>>());
    }
}
