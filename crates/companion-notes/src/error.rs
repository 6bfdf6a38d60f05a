//! Error types for the SiYuan kernel client.

use thiserror::Error;

/// Errors that can occur when talking to the SiYuan kernel.
#[derive(Error, Debug)]
pub enum NotesError {
    /// The kernel answered with a non-2xx status or a non-zero envelope code
    #[error("siyuan API error ({status}): {message}")]
    Api { message: String, status: u16 },

    /// Transport-level failure (connection refused, timeout, bad TLS, ...)
    #[error("siyuan transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The kernel answered 2xx but the body did not have the expected shape
    #[error("unexpected siyuan response: {0}")]
    InvalidResponse(String),
}

impl NotesError {
    /// Create an API error from a message and HTTP status.
    pub fn api(message: impl Into<String>, status: u16) -> Self {
        Self::Api {
            message: message.into(),
            status,
        }
    }
}

/// Result type for SiYuan kernel operations.
pub type Result<T> = std::result::Result<T, NotesError>;
