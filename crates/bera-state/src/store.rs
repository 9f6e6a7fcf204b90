//! StateStore: redb-backed state persistence for Bera Host.
//!
//! Provides typed operations over applications, config vars, releases,
//! logs, activity, and add-ons. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Actor recorded for changes the platform makes on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Result of attaching an add-on: the add-on row, the config var it
/// injected and the release that change produced.
#[derive(Debug, Clone)]
pub struct AttachedAddon {
    pub addon: Addon,
    pub config_var: ConfigVar,
    pub release: Release,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        self.write(|txn| {
            // Opening a table in a write transaction creates it if absent.
            for def in [APPS, CONFIG_VARS, RELEASES, LOGS, ACTIVITY, ADDONS, ADDON_CATALOG] {
                txn.open_table(def).map_err(map_err!(Table))?;
            }
            txn.open_table(APP_NAMES).map_err(map_err!(Table))?;
            txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            Ok(())
        })
    }

    /// Run `op` inside one write transaction, committing only if it succeeds.
    ///
    /// redb hands out a single write transaction at a time, so everything
    /// `op` reads is still current when it commits.
    fn write<T>(&self, op: impl FnOnce(&WriteTransaction) -> StateResult<T>) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let out = op(&txn)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(out)
    }

    fn read_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let found = table.get(key).map_err(map_err!(Read))?;
        match found {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All rows of one application, in key order.
    fn scan_app<T: DeserializeOwned>(&self, def: JsonTable, app_id: &str) -> StateResult<Vec<T>> {
        let (lo, hi) = prefix_bounds(app_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(lo.as_str()..hi.as_str()).map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    fn scan_all<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    // ── Applications ───────────────────────────────────────────────

    /// Create an application with a fresh id. Names are unique.
    pub fn create_app(&self, name: &str, region: &str) -> StateResult<Application> {
        let app = Application::new(name, region);
        self.insert_app(&app)?;
        Ok(app)
    }

    /// Insert a fully-formed application (used by seeding and `create_app`).
    pub fn insert_app(&self, app: &Application) -> StateResult<()> {
        if app.name.trim().is_empty() {
            return Err(StateError::Constraint("app name must not be empty".into()));
        }
        self.write(|txn| {
            {
                let mut names = txn.open_table(APP_NAMES).map_err(map_err!(Table))?;
                if names.get(app.name.as_str()).map_err(map_err!(Read))?.is_some() {
                    return Err(StateError::Constraint(format!(
                        "app name '{}' is already taken",
                        app.name
                    )));
                }
                names
                    .insert(app.name.as_str(), app.id.as_str())
                    .map_err(map_err!(Write))?;
            }
            if get_json_in::<Application>(txn, APPS, &app.id)?.is_some() {
                return Err(StateError::Constraint(format!("app id '{}' already exists", app.id)));
            }
            insert_json(txn, APPS, &app.id, app)
        })?;
        debug!(app_id = %app.id, name = %app.name, "application stored");
        Ok(())
    }

    pub fn get_app(&self, app_id: &str) -> StateResult<Option<Application>> {
        self.read_json(APPS, app_id)
    }

    /// List all applications, newest first.
    pub fn list_apps(&self) -> StateResult<Vec<Application>> {
        let mut apps: Vec<Application> = self.scan_all(APPS)?;
        apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apps)
    }

    /// Set an application's status and bump its `updated_at`.
    pub fn set_app_status(&self, app_id: &str, status: AppStatus) -> StateResult<Application> {
        let app = self.write(|txn| update_status_in(txn, app_id, status))?;
        debug!(%app_id, %status, "application status updated");
        Ok(app)
    }

    /// Set status and append an activity entry in the same transaction.
    pub fn set_app_status_with_activity(
        &self,
        app_id: &str,
        status: AppStatus,
        actor: &str,
        action: &str,
        description: &str,
    ) -> StateResult<Application> {
        self.write(|txn| {
            let app = update_status_in(txn, app_id, status)?;
            append_activity_in(txn, &ActivityEvent::new(app_id, actor, action, description))?;
            Ok(app)
        })
    }

    /// Delete an application and every row that belongs to it.
    /// Returns true if it existed.
    pub fn delete_app(&self, app_id: &str) -> StateResult<bool> {
        let existed = self.write(|txn| {
            let Some(app) = get_json_in::<Application>(txn, APPS, app_id)? else {
                return Ok(false);
            };
            {
                let mut apps = txn.open_table(APPS).map_err(map_err!(Table))?;
                apps.remove(app_id).map_err(map_err!(Write))?;
                let mut names = txn.open_table(APP_NAMES).map_err(map_err!(Table))?;
                names.remove(app.name.as_str()).map_err(map_err!(Write))?;
            }
            for def in [CONFIG_VARS, RELEASES, LOGS, ACTIVITY, ADDONS] {
                delete_app_rows_in(txn, def, app_id)?;
            }
            Ok(true)
        })?;
        debug!(%app_id, existed, "application deleted");
        Ok(existed)
    }

    // ── Config vars ────────────────────────────────────────────────

    /// Config vars of an application, ordered by key.
    pub fn list_config_vars(&self, app_id: &str) -> StateResult<Vec<ConfigVar>> {
        self.scan_app(CONFIG_VARS, app_id)
    }

    /// Look a config var up by its numeric id.
    pub fn find_config_var(&self, id: u64) -> StateResult<Option<ConfigVar>> {
        let vars: Vec<ConfigVar> = self.scan_all(CONFIG_VARS)?;
        Ok(vars.into_iter().find(|v| v.id == id))
    }

    /// Add or overwrite a config var and record the release it causes,
    /// atomically.
    pub fn set_config_var(
        &self,
        app_id: &str,
        key: &str,
        value: &str,
        actor: &str,
    ) -> StateResult<(ConfigVar, Release)> {
        if key.trim().is_empty() {
            return Err(StateError::Constraint("config var key must not be empty".into()));
        }
        let description = format!("Set config var {key}");
        self.write(|txn| {
            require_app(txn, app_id)?;
            let var = upsert_config_in(txn, app_id, key, value)?;
            let release =
                append_release_in(txn, app_id, &description, ReleaseStatus::Succeeded, actor)?;
            Ok((var, release))
        })
    }

    /// Remove a config var and record the release it causes, atomically.
    pub fn remove_config_var(
        &self,
        app_id: &str,
        key: &str,
        actor: &str,
    ) -> StateResult<(ConfigVar, Release)> {
        self.write(|txn| remove_config_in(txn, app_id, key, actor))
    }

    /// Remove the config var with this numeric id. The lookup and the
    /// removal share one transaction, so a var re-added under the same key
    /// in the meantime is never touched.
    pub fn remove_config_var_by_id(&self, id: u64, actor: &str) -> StateResult<(ConfigVar, Release)> {
        self.write(|txn| {
            let found = {
                let table = txn.open_table(CONFIG_VARS).map_err(map_err!(Table))?;
                let mut found = None;
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let var: ConfigVar = decode(value.value())?;
                    if var.id == id {
                        found = Some(var);
                        break;
                    }
                }
                found
            };
            let var = found.ok_or_else(|| StateError::NotFound(format!("config var {id}")))?;
            remove_config_in(txn, &var.app_id, &var.key, actor)
        })
    }

    // ── Releases ───────────────────────────────────────────────────

    /// Mint the next version for `app_id` and append the release plus its
    /// activity entry.
    pub fn record_release(
        &self,
        app_id: &str,
        description: &str,
        status: ReleaseStatus,
        actor: &str,
    ) -> StateResult<Release> {
        let release =
            self.write(|txn| append_release_in(txn, app_id, description, status, actor))?;
        debug!(%app_id, version = release.version, "release recorded");
        Ok(release)
    }

    /// Releases of an application, highest version first.
    pub fn list_releases(&self, app_id: &str) -> StateResult<Vec<Release>> {
        let mut releases: Vec<Release> = self.scan_app(RELEASES, app_id)?;
        releases.reverse();
        Ok(releases)
    }

    pub fn release_count(&self, app_id: &str) -> StateResult<u64> {
        let (lo, hi) = prefix_bounds(app_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        let count = table
            .range(lo.as_str()..hi.as_str())
            .map_err(map_err!(Read))?
            .count();
        Ok(count as u64)
    }

    // ── Logs ───────────────────────────────────────────────────────

    /// Append a log line. Returns its global sequence number.
    pub fn append_log(&self, event: &LogEvent) -> StateResult<u64> {
        self.write(|txn| {
            let seq = next_seq_in(txn, LOG_SEQ)?;
            insert_json(txn, LOGS, &seq_key(&event.app_id, seq), event)?;
            Ok(seq)
        })
    }

    /// The most recent `limit` log lines of an application, oldest first.
    pub fn recent_logs(&self, app_id: &str, limit: usize) -> StateResult<Vec<LogEvent>> {
        let (lo, hi) = prefix_bounds(app_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(lo.as_str()..hi.as_str())
            .map_err(map_err!(Read))?
            .rev()
            .take(limit)
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        results.reverse();
        Ok(results)
    }

    // ── Activity ───────────────────────────────────────────────────

    pub fn append_activity(&self, event: &ActivityEvent) -> StateResult<()> {
        self.write(|txn| append_activity_in(txn, event))
    }

    /// Activity of one application, newest first.
    pub fn list_activity(&self, app_id: &str) -> StateResult<Vec<ActivityEvent>> {
        let mut events: Vec<ActivityEvent> = self.scan_app(ACTIVITY, app_id)?;
        events.reverse();
        Ok(events)
    }

    /// The latest `limit` activity entries across all applications, newest
    /// first, joined with the application name.
    pub fn recent_activity(&self, limit: usize) -> StateResult<Vec<ActivityWithApp>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIVITY).map_err(map_err!(Table))?;
        let apps = txn.open_table(APPS).map_err(map_err!(Table))?;

        let mut entries: Vec<(u64, ActivityEvent)> = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let seq = key
                .value()
                .rsplit_once(':')
                .and_then(|(_, s)| s.parse::<u64>().ok())
                .unwrap_or(0);
            entries.push((seq, decode(value.value())?));
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        let mut results = Vec::new();
        for (_, event) in entries {
            if results.len() >= limit {
                break;
            }
            let app_guard = apps.get(event.app_id.as_str()).map_err(map_err!(Read))?;
            // Inner join: entries of vanished apps are skipped.
            if let Some(guard) = app_guard {
                let app: Application = decode(guard.value())?;
                results.push(ActivityWithApp {
                    event,
                    app_name: app.name,
                });
            }
        }
        Ok(results)
    }

    // ── Add-ons ────────────────────────────────────────────────────

    pub fn list_catalog(&self) -> StateResult<Vec<CatalogItem>> {
        self.scan_all(ADDON_CATALOG)
    }

    pub fn get_catalog_item(&self, id: &str) -> StateResult<Option<CatalogItem>> {
        self.read_json(ADDON_CATALOG, id)
    }

    /// Add a catalog entry. Ids are unique.
    pub fn insert_catalog_item(&self, item: &CatalogItem) -> StateResult<()> {
        if item.id.trim().is_empty() {
            return Err(StateError::Constraint("catalog id must not be empty".into()));
        }
        self.write(|txn| {
            if get_json_in::<CatalogItem>(txn, ADDON_CATALOG, &item.id)?.is_some() {
                return Err(StateError::Constraint(format!(
                    "catalog item '{}' already exists",
                    item.id
                )));
            }
            insert_json(txn, ADDON_CATALOG, &item.id, item)
        })
    }

    /// Delete a catalog entry. Returns true if it existed.
    pub fn delete_catalog_item(&self, id: &str) -> StateResult<bool> {
        self.write(|txn| {
            let mut table = txn.open_table(ADDON_CATALOG).map_err(map_err!(Table))?;
            let existed = table.remove(id).map_err(map_err!(Write))?.is_some();
            Ok(existed)
        })
    }

    /// Insert every item if the catalog is empty. Returns how many were added.
    pub fn seed_catalog(&self, items: &[CatalogItem]) -> StateResult<usize> {
        self.write(|txn| {
            let empty = {
                let table = txn.open_table(ADDON_CATALOG).map_err(map_err!(Table))?;
                table.iter().map_err(map_err!(Read))?.next().is_none()
            };
            if !empty {
                return Ok(0);
            }
            for item in items {
                insert_json(txn, ADDON_CATALOG, &item.id, item)?;
            }
            Ok(items.len())
        })
    }

    pub fn list_addons(&self, app_id: &str) -> StateResult<Vec<Addon>> {
        self.scan_app(ADDONS, app_id)
    }

    /// Attach a catalog add-on to an application.
    ///
    /// The add-on row, its injected `<NAME>_URL` config var, the resulting
    /// release and an `addon:create` activity entry commit together.
    pub fn attach_addon(
        &self,
        app_id: &str,
        catalog_id: &str,
        plan: &str,
    ) -> StateResult<AttachedAddon> {
        let attached = self.write(|txn| {
            require_app(txn, app_id)?;
            let item: CatalogItem = get_json_in(txn, ADDON_CATALOG, catalog_id)?
                .ok_or_else(|| StateError::NotFound(format!("addon {catalog_id}")))?;

            let addon = Addon {
                id: short_id(),
                app_id: app_id.to_string(),
                name: item.name.clone(),
                plan: plan.to_string(),
                status: "provisioning".to_string(),
            };
            insert_json(txn, ADDONS, &addon.table_key(), &addon)?;

            let key = item.config_key();
            let credential = format!("bera://{}:{}@internal:5432", item.id, &short_id()[..4]);
            let config_var = upsert_config_in(txn, app_id, &key, &credential)?;
            let release = append_release_in(
                txn,
                app_id,
                &format!("Set config var {key}"),
                ReleaseStatus::Succeeded,
                SYSTEM_ACTOR,
            )?;
            append_activity_in(
                txn,
                &ActivityEvent::new(
                    app_id,
                    SYSTEM_ACTOR,
                    "addon:create",
                    &format!("Attached {}", item.name),
                ),
            )?;
            Ok(AttachedAddon {
                addon,
                config_var,
                release,
            })
        })?;
        debug!(%app_id, addon = %attached.addon.name, "addon attached");
        Ok(attached)
    }

    // ── Stats ──────────────────────────────────────────────────────

    pub fn stats(&self) -> StateResult<StoreStats> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let apps = txn.open_table(APPS).map_err(map_err!(Table))?;
        let releases = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        let addons = txn.open_table(ADDONS).map_err(map_err!(Table))?;

        let mut stats = StoreStats::default();
        for entry in apps.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let app: Application = decode(value.value())?;
            stats.total_apps += 1;
            if app.status == AppStatus::Running {
                stats.running_apps += 1;
            }
        }
        stats.total_releases = releases.iter().map_err(map_err!(Read))?.count() as u64;
        stats.total_addons = addons.iter().map_err(map_err!(Read))?.count() as u64;
        Ok(stats)
    }
}

// ── Transaction helpers ────────────────────────────────────────────

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn insert_json<T: Serialize>(
    txn: &WriteTransaction,
    def: JsonTable,
    key: &str,
    value: &T,
) -> StateResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    let mut table = txn.open_table(def).map_err(map_err!(Table))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn get_json_in<T: DeserializeOwned>(
    txn: &WriteTransaction,
    def: JsonTable,
    key: &str,
) -> StateResult<Option<T>> {
    let table = txn.open_table(def).map_err(map_err!(Table))?;
    let found = table.get(key).map_err(map_err!(Read))?;
    match found {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn require_app(txn: &WriteTransaction, app_id: &str) -> StateResult<Application> {
    get_json_in(txn, APPS, app_id)?.ok_or_else(|| StateError::NotFound(format!("app {app_id}")))
}

fn update_status_in(
    txn: &WriteTransaction,
    app_id: &str,
    status: AppStatus,
) -> StateResult<Application> {
    let mut app = require_app(txn, app_id)?;
    app.status = status;
    app.updated_at = Utc::now();
    insert_json(txn, APPS, app_id, &app)?;
    Ok(app)
}

/// Bump and return the named counter.
fn next_seq_in(txn: &WriteTransaction, name: &str) -> StateResult<u64> {
    let mut table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
    let current = table
        .get(name)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(name, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn append_activity_in(txn: &WriteTransaction, event: &ActivityEvent) -> StateResult<()> {
    let seq = next_seq_in(txn, ACTIVITY_SEQ)?;
    insert_json(txn, ACTIVITY, &seq_key(&event.app_id, seq), event)
}

/// Write a config var, keeping the id of an existing row with the same key.
fn remove_config_in(
    txn: &WriteTransaction,
    app_id: &str,
    key: &str,
    actor: &str,
) -> StateResult<(ConfigVar, Release)> {
    require_app(txn, app_id)?;
    let ck = config_key(app_id, key);
    let removed = {
        let mut table = txn.open_table(CONFIG_VARS).map_err(map_err!(Table))?;
        let guard = table.remove(ck.as_str()).map_err(map_err!(Write))?;
        match guard {
            Some(bytes) => decode::<ConfigVar>(bytes.value())?,
            None => {
                return Err(StateError::NotFound(format!("config var {key} on app {app_id}")));
            }
        }
    };
    let description = format!("Remove config var {key}");
    let release = append_release_in(txn, app_id, &description, ReleaseStatus::Succeeded, actor)?;
    Ok((removed, release))
}

fn upsert_config_in(
    txn: &WriteTransaction,
    app_id: &str,
    key: &str,
    value: &str,
) -> StateResult<ConfigVar> {
    let ck = config_key(app_id, key);
    let id = match get_json_in::<ConfigVar>(txn, CONFIG_VARS, &ck)? {
        Some(existing) => existing.id,
        None => next_seq_in(txn, CONFIG_ID)?,
    };
    let var = ConfigVar {
        id,
        app_id: app_id.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    };
    insert_json(txn, CONFIG_VARS, &ck, &var)?;
    Ok(var)
}

/// Append the next release of `app_id` plus its `release` activity entry.
///
/// The next version is read from the last key under the application's
/// prefix; that read and the insert share one write transaction.
fn append_release_in(
    txn: &WriteTransaction,
    app_id: &str,
    description: &str,
    status: ReleaseStatus,
    actor: &str,
) -> StateResult<Release> {
    require_app(txn, app_id)?;
    let (lo, hi) = prefix_bounds(app_id);
    let latest = {
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        let mut range = table.range(lo.as_str()..hi.as_str()).map_err(map_err!(Read))?;
        let last = range.next_back();
        let version = match last {
            Some(entry) => {
                let (_, value) = entry.map_err(map_err!(Read))?;
                decode::<Release>(value.value())?.version
            }
            None => 0,
        };
        version
    };

    let release = Release {
        app_id: app_id.to_string(),
        version: latest + 1,
        description: description.to_string(),
        status,
        created_at: Utc::now(),
    };
    insert_json(txn, RELEASES, &release.table_key(), &release)?;
    append_activity_in(
        txn,
        &ActivityEvent::new(app_id, actor, "release", description),
    )?;
    Ok(release)
}

/// Remove every row under an application's key prefix.
fn delete_app_rows_in(txn: &WriteTransaction, def: JsonTable, app_id: &str) -> StateResult<usize> {
    let (lo, hi) = prefix_bounds(app_id);
    let mut table = txn.open_table(def).map_err(map_err!(Table))?;
    let keys: Vec<String> = table
        .range(lo.as_str()..hi.as_str())
        .map_err(map_err!(Read))?
        .map(|entry| entry.map(|(key, _)| key.value().to_string()))
        .collect::<Result<_, _>>()
        .map_err(map_err!(Read))?;
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(keys.len())
}
