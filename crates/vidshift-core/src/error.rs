//! vidshift Error Definitions
//!
//! Defines error types used throughout the core.

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Permission Errors
    // =========================================================================
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Permission permanently denied: {0}. Enable it in the system settings")]
    PermissionDeniedPermanently(String),

    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("A conversion is already running")]
    JobAlreadyRunning,

    #[error("Staging failed: {0}")]
    StagingFailed(String),

    #[error("No converted artifact available: {0}")]
    NoArtifact(String),

    // =========================================================================
    // Export Errors
    // =========================================================================
    #[error("Export of {path} failed: {source}")]
    ExportError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// What the user can do about an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserAction {
    /// Asking again may succeed.
    Retry,
    /// Only a change in the system settings helps.
    OpenSettings,
    /// Nothing actionable beyond reading the message.
    None,
}

impl CoreError {
    /// Wraps an I/O failure that happened while exporting `path`.
    pub fn export(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        CoreError::ExportError {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Actionable choice to surface next to the message.
    pub fn user_action(&self) -> UserAction {
        match self {
            CoreError::PermissionDenied(_) | CoreError::ExportError { .. } => UserAction::Retry,
            CoreError::PermissionDeniedPermanently(_) => UserAction::OpenSettings,
            _ => UserAction::None,
        }
    }
}
