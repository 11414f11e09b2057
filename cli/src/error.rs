//! Unified error handling for the runner.

use crate::config::ConfigError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] hubsync_engine::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    /// Diagnostic payload to log alongside the error, if any.
    pub fn attachment(&self) -> Option<&str> {
        match self {
            AppError::Engine(e) => e.attachment(),
            _ => None,
        }
    }
}

/// Result type alias for workflows.
pub type Result<T> = std::result::Result<T, AppError>;
