//! bera-state: embedded state store for Bera Host.
//!
//! Backed by [redb](https://docs.rs/redb), persists applications, config
//! vars, releases, logs, activity, and add-ons.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Per-application rows use `{app_id}:{suffix}` keys, with zero-padded
//! numeric suffixes where order matters, so a range scan over one
//! application's prefix yields rows in version or production order.
//!
//! Every mutation is a single redb write transaction. redb admits one
//! writer at a time, which is what serializes release version assignment.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod traits;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{AttachedAddon, SYSTEM_ACTOR, StateStore};
pub use traits::{AppStore, LogStore, ReleaseStore};
pub use types::*;
