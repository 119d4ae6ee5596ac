//! Error types shared across the reconciler.

use thiserror::Error;

/// Errors that can occur while reconciling between git and the cluster.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to decode manifest '{path}': {message}")]
    Decode { path: String, message: String },

    #[error("failed to serialize manifest: {0}")]
    Serialize(String),

    #[error("workspace path not found: {0}")]
    NotFound(String),

    #[error("invalid workspace path: {0}")]
    InvalidPath(String),

    #[error("git operation failed: {0}")]
    Git(String),

    #[error("push rejected, remote has diverged")]
    ConflictRetry,

    #[error("cluster request failed: {0}")]
    Cluster(String),

    #[error("invalid label selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("patch could not be applied: {0}")]
    Patch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the error is expected to clear on its own, so the reconcile
    /// should be retried by re-delivering the identity.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::ConflictRetry | SyncError::Git(_) | SyncError::Cluster(_)
        )
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(err: serde_yaml::Error) -> Self {
        SyncError::Serialize(err.to_string())
    }
}

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, SyncError>;
