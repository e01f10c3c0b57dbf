//! Error types for the composition engine.
//!
//! Graph-level and permission failures propagate to the caller. Node-level
//! failures (a missing sample, an unreadable recording) are logged by the
//! graph and degrade to silence, so they only surface from the loaders.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for composition operations
pub type Result<T> = std::result::Result<T, CompositionError>;

#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("Microphone unavailable: {reason}")]
    PermissionDenied { reason: String },

    #[error("Audio resource unavailable: {path}: {reason}")]
    ResourceUnavailable { path: PathBuf, reason: String },

    #[error("Audio graph failed to start: {reason}")]
    GraphStartFailure { reason: String },

    #[error("Failed to write {path}: {reason}")]
    WriteFailure { path: PathBuf, reason: String },

    #[error("No writable destination at {path}")]
    NoWritableDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompositionError {
    /// Stable code for this error kind
    pub fn error_code(&self) -> &'static str {
        match self {
            CompositionError::PermissionDenied { .. } => "PERMISSION_DENIED",
            CompositionError::ResourceUnavailable { .. } => "RESOURCE_UNAVAILABLE",
            CompositionError::GraphStartFailure { .. } => "GRAPH_START_FAILURE",
            CompositionError::WriteFailure { .. } => "WRITE_FAILURE",
            CompositionError::NoWritableDestination { .. } => "NO_WRITABLE_DESTINATION",
            CompositionError::InvalidConfig { .. } => "INVALID_CONFIG",
            CompositionError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the user can fix this and retry without restarting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CompositionError::PermissionDenied { .. }
                | CompositionError::ResourceUnavailable { .. }
                | CompositionError::WriteFailure { .. }
                | CompositionError::NoWritableDestination { .. }
        )
    }

    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CompositionError::ResourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write_failure(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CompositionError::WriteFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
