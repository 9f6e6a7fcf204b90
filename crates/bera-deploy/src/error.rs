use bera_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<StateError> for DeployError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => DeployError::NotFound(what),
            other => DeployError::Persistence(other.to_string()),
        }
    }
}
