use bera_state::StateError;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<StateError> for LedgerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => LedgerError::NotFound(what),
            StateError::Constraint(msg) => LedgerError::Invalid(msg),
            other => LedgerError::Persistence(other.to_string()),
        }
    }
}
