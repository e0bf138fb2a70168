//! Error types for azdo-tools.

use thiserror::Error;

/// Main error type for Azure DevOps operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected by the service as malformed (HTTP 400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication failed (HTTP 401)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Authenticated but not allowed (HTTP 403)
    #[error("Permission error: {0}")]
    Permission(String),

    /// Resource does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// API returned another error status
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// HTTP transport failed before a status was available
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Central translator: map an HTTP status and service message to the
    /// error taxonomy. Anything outside the known statuses stays a generic
    /// API error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Error::Validation(message),
            401 => Error::Authentication(message),
            403 => Error::Permission(message),
            404 => Error::NotFound(message),
            _ => Error::Api { status, message },
        }
    }

    /// Classify an error that only surfaced as text, by message substrings.
    /// Used where the underlying failure did not carry an HTTP status.
    pub fn from_message(context: &str, message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("unauthorized")
            || lower.contains("authentication")
            || lower.contains("401")
        {
            Error::Authentication(format!("{}: {}", context, message))
        } else if lower.contains("not found")
            || lower.contains("does not exist")
            || lower.contains("404")
        {
            Error::NotFound(format!("{}: {}", context, message))
        } else {
            Error::Other(anyhow::anyhow!("{}: {}", context, message))
        }
    }

    /// Human-facing form rendered into tool output text.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(msg) => format!("Validation Error: {}", msg),
            Error::Authentication(msg) => format!("Authentication Failed: {}", msg),
            Error::Permission(msg) => format!("Permission Denied: {}", msg),
            Error::NotFound(msg) => format!("Not Found: {}", msg),
            Error::Api { status, message } => {
                format!("Azure DevOps API Error: {} (status {})", message, status)
            }
            other => format!("Azure DevOps API Error: {}", other),
        }
    }
}

/// Result type alias for azdo operations.
pub type Result<T> = std::result::Result<T, Error>;
