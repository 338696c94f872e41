//! Error types for remotebuild.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A submitted build spec is malformed or incomplete.
    #[error("invalid build spec: {0}")]
    Validation(String),

    /// Server-side prerequisites are missing (no image, no credentials).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("execution failed: {0}")]
    Execution(String),

    /// An artifact transfer failed. Files sent before the failure stay sent.
    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no valid upload method passed")]
    NoValidUploadMethod,

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
