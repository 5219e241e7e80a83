//! Session-specific error types.

use chatlink_core::Lifecycle;
use thiserror::Error;

/// Errors raised by a protocol socket or its factory.
#[derive(Debug, Clone, Error)]
pub enum SocketError {
    /// The socket could not be constructed.
    #[error("failed to open socket: {0}")]
    OpenFailed(String),

    /// A send was rejected or never acknowledged.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The socket is no longer usable.
    #[error("connection closed")]
    ConnectionClosed,

    /// Any other protocol library failure.
    #[error("{0}")]
    Other(String),
}

/// Errors raised by a credential store.
#[derive(Debug, Error)]
pub enum AuthStoreError {
    /// The user id cannot be mapped onto a directory.
    #[error("invalid user id '{0}'")]
    InvalidUserId(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by session operations.
///
/// Cloneable so that a single initialization outcome can be handed to every
/// coalesced caller.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Missing or invalid identifier, recipient or body.
    #[error("invalid input: {0}")]
    Input(String),

    /// The operation requires a connected session.
    #[error("session for '{user_id}' is not connected (state: {lifecycle})")]
    NotConnected { user_id: String, lifecycle: Lifecycle },

    /// Socket construction or send failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credential directory could not be read or written.
    #[error("credential store error: {0}")]
    CredentialStore(String),

    /// No session and no stored credentials for the user.
    #[error("no session found for '{0}'")]
    NotFound(String),

    /// The text went out but a media item failed; later items were not sent.
    #[error("message {message_id} delivered, media item {index} failed: {message}")]
    MediaFailed {
        message_id: String,
        index: usize,
        message: String,
    },
}

impl SessionError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an input error.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }
}

impl From<SocketError> for SessionError {
    fn from(e: SocketError) -> Self {
        SessionError::Protocol(e.to_string())
    }
}

impl From<AuthStoreError> for SessionError {
    fn from(e: AuthStoreError) -> Self {
        match e {
            AuthStoreError::InvalidUserId(id) => SessionError::Input(format!("invalid user id '{}'", id)),
            other => SessionError::CredentialStore(other.to_string()),
        }
    }
}

impl From<chatlink_core::Error> for SessionError {
    fn from(e: chatlink_core::Error) -> Self {
        match e {
            chatlink_core::Error::Input(msg) => SessionError::Input(msg),
            other => SessionError::Protocol(other.to_string()),
        }
    }
}

impl From<SessionError> for chatlink_core::Error {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Input(msg) => chatlink_core::Error::Input(msg),
            SessionError::NotConnected { user_id, lifecycle } => {
                chatlink_core::Error::not_connected(user_id, lifecycle)
            }
            SessionError::NotFound(user_id) => chatlink_core::Error::NotFound(user_id),
            other => chatlink_core::Error::Protocol(other.to_string()),
        }
    }
}
