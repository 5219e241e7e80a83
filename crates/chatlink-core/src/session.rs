//! Session lifecycle and status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one user's session against the chat service.
///
/// `Uninitialized` is reported for users without a registry entry and is
/// never stored. `Failed` marks an orphaned entry waiting for the reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// No session exists for the user
    Uninitialized,
    /// Socket opened, waiting for the service to answer
    Connecting,
    /// A pairing QR code is on display
    AwaitingScan,
    /// Authenticated and able to send
    Connected,
    /// Waiting out the backoff before a fresh socket is opened
    Reconnecting,
    /// Terminal; the entry escaped normal cleanup
    Failed,
}

impl Lifecycle {
    /// Whether a live socket belongs to this lifecycle.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Lifecycle::Connecting
                | Lifecycle::AwaitingScan
                | Lifecycle::Connected
                | Lifecycle::Reconnecting
        )
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::AwaitingScan => write!(f, "awaiting_scan"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time view of a session, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// User the session belongs to
    pub user_id: String,
    /// Current lifecycle
    pub lifecycle: Lifecycle,
    /// Rendered pairing payload, only while awaiting a scan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_image: Option<String>,
    /// QR codes issued since the last successful connection
    #[serde(default)]
    pub pairing_attempts: u32,
    /// Last observed failure (advisory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Session instance counter; changes on every re-initialization
    #[serde(default)]
    pub generation: u64,
    /// Time of the last state change
    pub updated_at: DateTime<Utc>,
}

impl SessionStatus {
    /// Status reported for a user with no session.
    pub fn uninitialized(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            lifecycle: Lifecycle::Uninitialized,
            pairing_image: None,
            pairing_attempts: 0,
            last_error: None,
            generation: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether the session can send messages.
    pub fn is_connected(&self) -> bool {
        self.lifecycle == Lifecycle::Connected
    }

    /// Whether the user has to scan a QR code to proceed.
    pub fn qr_required(&self) -> bool {
        !self.is_connected() && self.pairing_image.is_some()
    }

    /// Whether a connection attempt is underway.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self.lifecycle,
            Lifecycle::Connecting | Lifecycle::AwaitingScan | Lifecycle::Reconnecting
        )
    }
}
