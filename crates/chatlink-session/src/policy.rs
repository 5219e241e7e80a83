//! Reconnect decisions after a socket closes.

use std::time::Duration;

use crate::socket::DisconnectReason;

/// What to do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Delete stored credentials and drop the session.
    Purge,
    /// Open a fresh socket after the delay.
    RetryAfter(Duration),
    /// Drop the session but keep the credentials.
    GiveUpNoPurge,
}

/// Pure mapping from a disconnect reason and attempt count to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempt budget, shared with the pairing limit
    pub max_attempts: u32,
    /// Delay for the first retry
    pub base_delay: Duration,
    /// Delays never exceed this
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Decide how to react to a close.
    pub fn decide(&self, reason: DisconnectReason, attempts: u32) -> ReconnectDecision {
        if reason.invalidates_identity() {
            return ReconnectDecision::Purge;
        }
        if reason == DisconnectReason::ConnectionReplaced {
            return ReconnectDecision::GiveUpNoPurge;
        }
        if attempts >= self.max_attempts {
            return ReconnectDecision::Purge;
        }
        ReconnectDecision::RetryAfter(self.delay_for(attempts))
    }

    /// Backoff delay for the given attempt count, capped at `max_delay`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts.min(16)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5), Duration::from_secs(30))
    }
}
