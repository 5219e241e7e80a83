//! Error types for Chatlink.
//!
//! The variants follow the taxonomy the HTTP layer maps onto responses:
//! input errors are client mistakes, `NotConnected` is retryable once the
//! account is paired, protocol failures and timeouts are server-side.

use thiserror::Error;

/// Result type alias using the Chatlink error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Chatlink.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or invalid identifier, recipient or message body
    #[error("Invalid input: {0}")]
    Input(String),

    /// The operation requires a connected session
    #[error("Session for '{user_id}' is not connected (state: {lifecycle})")]
    NotConnected { user_id: String, lifecycle: String },

    /// Socket construction or send failure
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unknown user or missing account
    #[error("Not found: {0}")]
    NotFound(String),

    /// An operation exceeded its deadline
    #[error("Timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/chatlink/config.toml"),
            Error::Input(_) => Some("Check the user id, recipient and message body"),
            Error::NotConnected { .. } => Some("Scan the pairing QR code, then retry"),
            Error::NotFound(_) => Some("Pair the account again to create a new session"),
            Error::Timeout { .. } => Some("Try again; the chat service may be slow to respond"),
            Error::Protocol(_) | Error::Http(_) => Some("The chat service is having issues. Try again later"),
            _ => None,
        }
    }

    /// Whether the caller may retry the same request later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected { .. } | Error::Timeout { .. } | Error::Protocol(_) | Error::Http(_)
        )
    }

    /// Create a not-connected error.
    pub fn not_connected(user_id: impl Into<String>, lifecycle: impl std::fmt::Display) -> Self {
        Error::NotConnected {
            user_id: user_id.into(),
            lifecycle: lifecycle.to_string(),
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}
