use thiserror::Error;

/// Unified error type for the synchronization core.
///
/// Only conditions that stop a run (or stop it from starting) are errors.
/// A busy lock, a skipped entity and a cancellation request are ordinary
/// outcomes and are reported through `RunOutcome`, `EntityOutcome` and
/// `SyncReport::stopped_early` instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid configuration or invocation (no method requested, bad config file)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A requested strategy name is neither a qualified identity nor a known alias
    #[error("Unknown strategy '{name}' (known names: {known})")]
    UnknownStrategy { name: String, known: String },

    /// The durable store backing the lock, cursors or local entities failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A failure that makes every subsequent call fail the same way
    #[error("Fatal error in {context}: {message}")]
    Fatal { context: String, message: String },

    /// The status lock was taken over or released while the run was active
    #[error("Sync status lock '{0}' is no longer held by this process")]
    LockLost(String),

    /// A single-entity invocation referenced a record that does not exist
    #[error("{model_type} '{id}' not found")]
    NotFound { model_type: String, id: String },

    /// IO errors outside the store (config and log files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn fatal(context: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Fatal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Whether the error was raised before any strategy could run.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SyncError::Configuration(_) | SyncError::UnknownStrategy { .. }
        )
    }
}

impl From<sled::Error> for SyncError {
    fn from(error: sled::Error) -> Self {
        SyncError::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

/// Result type alias for operations that can fail with a [`SyncError`]
pub type SyncResult<T> = Result<T, SyncError>;
