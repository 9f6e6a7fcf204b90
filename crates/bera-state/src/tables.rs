//! redb table definitions for the Bera Host state store.
//!
//! Row tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Per-application keys are `{app_id}:{suffix}`; numeric suffixes
//! are zero-padded to 20 digits so lexicographic order is numeric order.

use redb::TableDefinition;

/// Shape shared by every JSON row table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Applications keyed by `{app_id}`.
pub const APPS: JsonTable = TableDefinition::new("apps");

/// Unique name index: `{name}` → `{app_id}`.
pub const APP_NAMES: TableDefinition<&str, &str> = TableDefinition::new("app_names");

/// Config vars keyed by `{app_id}:{key}`.
pub const CONFIG_VARS: JsonTable = TableDefinition::new("config_vars");

/// Releases keyed by `{app_id}:{version}`.
pub const RELEASES: JsonTable = TableDefinition::new("releases");

/// Log lines keyed by `{app_id}:{seq}`; `seq` is global and monotonic.
pub const LOGS: JsonTable = TableDefinition::new("logs");

/// Activity entries keyed by `{app_id}:{seq}`.
pub const ACTIVITY: JsonTable = TableDefinition::new("activity");

/// Attached add-ons keyed by `{app_id}:{addon_id}`.
pub const ADDONS: JsonTable = TableDefinition::new("addons");

/// Add-on catalog keyed by `{catalog_id}`.
pub const ADDON_CATALOG: JsonTable = TableDefinition::new("addon_catalog");

/// Named monotonic counters (`log_seq`, `activity_seq`, `config_id`).
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

pub const LOG_SEQ: &str = "log_seq";
pub const ACTIVITY_SEQ: &str = "activity_seq";
pub const CONFIG_ID: &str = "config_id";

/// Zero-padded per-application row key.
pub fn seq_key(app_id: &str, seq: u64) -> String {
    format!("{app_id}:{seq:020}")
}

/// Inclusive start / exclusive end of an application's key range.
///
/// `;` sorts immediately after `:`, so `[app:, app;)` covers exactly the
/// keys that start with `app:`.
pub fn prefix_bounds(app_id: &str) -> (String, String) {
    (format!("{app_id}:"), format!("{app_id};"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_keys_sort_numerically() {
        assert!(seq_key("a1", 9) < seq_key("a1", 10));
        assert!(seq_key("a1", 99_999) < seq_key("a1", 100_000));
    }

    #[test]
    fn prefix_bounds_exclude_neighbouring_ids() {
        let (lo, hi) = prefix_bounds("abc");
        let inside = seq_key("abc", 1);
        let longer_id = seq_key("abcd", 1);
        assert!(lo.as_str() <= inside.as_str() && inside.as_str() < hi.as_str());
        assert!(!(lo.as_str() <= longer_id.as_str() && longer_id.as_str() < hi.as_str()));
    }
}
