//! Relay provider error types.

use thiserror::Error;

/// Errors raised by the HTTP relay provider.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No relay account is configured for the user.
    #[error("no relay account configured for '{0}'")]
    MissingAccount(String),

    /// The account lacks an instance id or token.
    #[error("relay credentials for '{user_id}' are incomplete: missing {missing}")]
    IncompleteCredentials {
        user_id: String,
        missing: &'static str,
    },

    /// The message cannot be sent as given.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The relay did not answer within the request timeout.
    #[error("relay request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The relay answered with a non-success status.
    #[error("relay returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The relay accepted the request but reported an error.
    #[error("relay rejected the message: {0}")]
    Rejected(String),

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<RelayError> for chatlink_core::Error {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::MissingAccount(user_id) => {
                chatlink_core::Error::NotFound(format!("relay account for '{}'", user_id))
            }
            e @ RelayError::IncompleteCredentials { .. } => chatlink_core::Error::Config(e.to_string()),
            RelayError::InvalidMessage(msg) => chatlink_core::Error::Input(msg),
            RelayError::Timeout { elapsed_ms } => chatlink_core::Error::Timeout {
                operation: "relay send".to_string(),
                elapsed_ms,
            },
            e @ RelayError::Rejected(_) => chatlink_core::Error::Protocol(e.to_string()),
            e @ (RelayError::Status { .. } | RelayError::Http(_)) => {
                chatlink_core::Error::Http(e.to_string())
            }
        }
    }
}
