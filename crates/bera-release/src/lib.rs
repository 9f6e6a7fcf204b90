//! Bera Host release ledger.
//!
//! Every configuration change and every finished deploy becomes a
//! [`Release`](bera_state::Release): an immutable, per-application,
//! 1-based version with no gaps. The ledger mints versions through the
//! store's single write transaction, so concurrent callers never observe
//! the same next version.
//!
//! # Components
//!
//! - **`ledger`**: `ReleaseLedger`, the only writer of release rows
//! - **`error`**: `LedgerError`

pub mod error;
pub mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use ledger::ReleaseLedger;
