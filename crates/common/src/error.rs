use thiserror::Error;

/// Common error types used across the watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Fatal, startup only.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The explorer could not answer for this address after all retries.
    #[error("Explorer unavailable for {address} after {attempts} attempt(s): {reason}")]
    ExplorerUnavailable {
        address: String,
        attempts: u32,
        reason: String,
    },

    /// Cursor persistence failed; the cursor must not be treated as advanced.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl WatchError {
    /// Short label used as a metric outcome.
    pub fn kind(&self) -> &'static str {
        match self {
            WatchError::Config(_) => "config_error",
            WatchError::ExplorerUnavailable { .. } => "explorer_unavailable",
            WatchError::Storage(_) => "storage_error",
        }
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
