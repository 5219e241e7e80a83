//! Protocol socket abstraction.
//!
//! The chat protocol itself (encryption, multi-device sync, framing) lives in
//! an external library. This module describes the narrow surface the session
//! manager needs from it: a factory that opens a socket for a user's stored
//! credentials, an ordered stream of lifecycle events, and a handful of
//! send/teardown calls.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use chatlink_core::config::SocketSettings;
use chatlink_core::Address;

use crate::auth_store::CredentialState;
use crate::error::SocketError;

/// Why a socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Closed by the service (428)
    ConnectionClosed,
    /// Network dropped or timed out (408)
    ConnectionLost,
    /// Another client took over the account (440)
    ConnectionReplaced,
    /// Logged out from the phone (401)
    LoggedOut,
    /// Stored credentials are corrupt (500)
    BadSession,
    /// Service asked for a fresh connection (515)
    RestartRequired,
    /// Account not allowed to connect (403)
    Forbidden,
    /// Device list out of sync (411)
    MultideviceMismatch,
    /// Service temporarily unavailable (503)
    ServiceUnavailable,
    /// Every allowed QR code was issued without a scan
    PairingExhausted,
    /// The QR code expired without a scan
    PairingTimeout,
    /// The socket never opened
    ConnectionTimeout,
    /// Unrecognized close code
    Other(u16),
}

impl DisconnectReason {
    /// Map a protocol close code onto a reason.
    pub fn from_code(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            403 => Self::Forbidden,
            408 => Self::ConnectionLost,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::ServiceUnavailable,
            515 => Self::RestartRequired,
            other => Self::Other(other),
        }
    }

    /// Whether the stored credentials can no longer be used.
    pub fn invalidates_identity(self) -> bool {
        matches!(
            self,
            Self::LoggedOut
                | Self::BadSession
                | Self::Forbidden
                | Self::MultideviceMismatch
                | Self::PairingExhausted
                | Self::PairingTimeout
                | Self::ConnectionTimeout
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::ConnectionReplaced => write!(f, "connection replaced"),
            Self::LoggedOut => write!(f, "logged out"),
            Self::BadSession => write!(f, "bad session"),
            Self::RestartRequired => write!(f, "restart required"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::MultideviceMismatch => write!(f, "multi-device mismatch"),
            Self::ServiceUnavailable => write!(f, "service unavailable"),
            Self::PairingExhausted => write!(f, "pairing attempts exhausted"),
            Self::PairingTimeout => write!(f, "pairing timed out"),
            Self::ConnectionTimeout => write!(f, "connection timed out"),
            Self::Other(code) => write!(f, "closed with code {}", code),
        }
    }
}

/// Events emitted by a socket, in emission order.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A new pairing code should be shown to the user.
    PairingCode(String),
    /// The connection is authenticated.
    Opened,
    /// The connection closed.
    Closed(DisconnectReason),
    /// The library rotated keys; the new state must be persisted.
    CredentialsChanged(CredentialState),
}

/// Options handed to the factory on every open.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Deadline for the initial connection
    pub connect_timeout: Duration,
    /// Deadline for individual protocol queries
    pub default_query_timeout: Duration,
    /// Client identification triple
    pub browser: [String; 3],
    /// Whether link previews are generated for text sends
    pub link_previews: bool,
}

impl SocketOptions {
    /// Build options from configuration.
    pub fn from_settings(settings: &SocketSettings, connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            default_query_timeout: Duration::from_millis(settings.default_query_timeout_ms),
            browser: settings.browser.clone(),
            link_previews: settings.link_previews,
        }
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::from_settings(&SocketSettings::default(), Duration::from_secs(60))
    }
}

/// A live connection to the chat service.
#[async_trait]
pub trait ProtocolSocket: Send + Sync {
    /// Send a text message, returning the provider-assigned message id.
    async fn send_text(&self, to: &Address, text: &str) -> Result<String, SocketError>;

    /// Send a media message by URL with an optional caption.
    async fn send_media(
        &self,
        to: &Address,
        url: &str,
        caption: Option<&str>,
    ) -> Result<String, SocketError>;

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<(), SocketError>;

    /// Close the connection. Must be idempotent.
    async fn close(&self) -> Result<(), SocketError>;
}

/// A freshly opened socket together with its event stream.
pub struct OpenedSocket {
    /// The socket handle
    pub socket: std::sync::Arc<dyn ProtocolSocket>,
    /// Ordered lifecycle events; ends when the library drops the emitter
    pub events: mpsc::Receiver<SocketEvent>,
}

/// Opens protocol sockets.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// Open a socket for `user_id` using the stored credentials.
    async fn open(
        &self,
        user_id: &str,
        credentials: CredentialState,
        options: &SocketOptions,
    ) -> Result<OpenedSocket, SocketError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_from_code() {
        assert_eq!(DisconnectReason::from_code(401), DisconnectReason::LoggedOut);
        assert_eq!(DisconnectReason::from_code(515), DisconnectReason::RestartRequired);
        assert_eq!(DisconnectReason::from_code(440), DisconnectReason::ConnectionReplaced);
        assert_eq!(DisconnectReason::from_code(999), DisconnectReason::Other(999));
    }

    #[test]
    fn test_identity_invalidating_reasons() {
        assert!(DisconnectReason::LoggedOut.invalidates_identity());
        assert!(DisconnectReason::PairingTimeout.invalidates_identity());
        assert!(DisconnectReason::ConnectionTimeout.invalidates_identity());
        assert!(!DisconnectReason::ConnectionLost.invalidates_identity());
        assert!(!DisconnectReason::RestartRequired.invalidates_identity());
        assert!(!DisconnectReason::ConnectionReplaced.invalidates_identity());
    }

    #[test]
    fn test_options_from_settings() {
        let settings = SocketSettings::default();
        let options = SocketOptions::from_settings(&settings, Duration::from_secs(5));
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.default_query_timeout, Duration::from_millis(60_000));
        assert_eq!(options.browser[0], "Chrome (Linux)");
    }
}
