//! Error types for buildfarm-ports

use thiserror::Error;

/// Errors raised by an external collaborator behind a port
#[derive(Error, Debug)]
pub enum PortError {
    /// The requested key, stack or object does not exist
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The collaborator could not be reached or refused the request
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    /// A vendor CLI exited unsuccessfully
    #[error("`{program}` exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    /// The collaborator answered with something we cannot interpret
    #[error("malformed response from {service}: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PortError {
    pub fn not_found(what: impl Into<String>) -> Self {
        PortError::NotFound { what: what.into() }
    }

    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        PortError::Unavailable {
            service,
            message: message.into(),
        }
    }

    /// Whether this error means "absent" rather than "broken".
    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }
}

/// Result type for port operations
pub type PortResult<T> = std::result::Result<T, PortError>;
