//! Domain types for the Bera Host state store.
//!
//! These types represent the persisted state of applications, their config
//! vars, releases, logs, activity, and add-ons. All types are serializable
//! to/from JSON for storage in redb tables.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tables::seq_key;

/// Opaque application identifier.
pub type AppId = String;

/// Generate a short application or add-on identifier.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ── Application ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: AppId,
    /// Unique across the store.
    pub name: String,
    pub region: String,
    pub status: AppStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Idle,
    Deploying,
    Running,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Idle => "idle",
            AppStatus::Deploying => "deploying",
            AppStatus::Running => "running",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Application {
    pub fn new(name: &str, region: &str) -> Self {
        Self::with_id(&short_id(), name, region)
    }

    pub fn with_id(id: &str, name: &str, region: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            region: region.to_string(),
            status: AppStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigVar {
    pub id: u64,
    pub app_id: AppId,
    pub key: String,
    pub value: String,
}

impl ConfigVar {
    pub fn table_key(&self) -> String {
        config_key(&self.app_id, &self.key)
    }
}

pub(crate) fn config_key(app_id: &str, key: &str) -> String {
    format!("{app_id}:{key}")
}

// ── Release ───────────────────────────────────────────────────────

/// One immutable point in an application's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub app_id: AppId,
    /// 1-based, gapless per application.
    pub version: u64,
    pub description: String,
    pub status: ReleaseStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Succeeded,
    Failed,
}

impl Release {
    pub fn table_key(&self) -> String {
        seq_key(&self.app_id, self.version)
    }
}

// ── Logs ──────────────────────────────────────────────────────────

/// Where a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Build,
    App,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Build => "build",
            LogSource::App => "app",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEvent {
    pub app_id: AppId,
    pub source: LogSource,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(app_id: &str, source: LogSource, content: impl Into<String>) -> Self {
        Self {
            app_id: app_id.to_string(),
            source,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn build(app_id: &str, content: impl Into<String>) -> Self {
        Self::new(app_id, LogSource::Build, content)
    }
}

// ── Activity ──────────────────────────────────────────────────────

/// Audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEvent {
    pub app_id: AppId,
    pub actor: String,
    pub action: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(app_id: &str, actor: &str, action: &str, description: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            description: description.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Activity entry joined with its application's name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityWithApp {
    #[serde(flatten)]
    pub event: ActivityEvent,
    pub app_name: String,
}

// ── Add-ons ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub icon: String,
}

impl CatalogItem {
    /// Config var injected into an app when this add-on is attached,
    /// e.g. `Bera Postgres` → `BERA_POSTGRES_URL`.
    pub fn config_key(&self) -> String {
        format!("{}_URL", self.name.to_uppercase().replace(' ', "_"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Addon {
    pub id: String,
    pub app_id: AppId,
    pub name: String,
    pub plan: String,
    pub status: String,
}

impl Addon {
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.app_id, self.id)
    }
}

// ── Stats ─────────────────────────────────────────────────────────

/// Store-wide totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreStats {
    pub total_apps: u64,
    pub total_releases: u64,
    pub total_addons: u64,
    pub running_apps: u64,
}
