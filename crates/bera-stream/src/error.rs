use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The event could not be written to the log store. Live delivery
    /// still happened; `delivered` counts it.
    #[error("failed to persist log event: {reason} (delivered to {delivered} subscribers)")]
    Persistence { reason: String, delivered: usize },

    #[error("failed to encode stream message: {0}")]
    Encode(#[from] serde_json::Error),
}
