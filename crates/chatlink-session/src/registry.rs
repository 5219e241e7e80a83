//! Authoritative map of user id to session state.
//!
//! All access goes through a single mutex. No method awaits while the lock
//! is held, so every read or multi-field update is atomic with respect to
//! every other. Entries removed from the map are handed back to the caller,
//! which owns closing their sockets.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use chatlink_core::{Lifecycle, SessionStatus};

use crate::socket::ProtocolSocket;
use crate::timers::TimerSet;

/// Mutable state of one user's session.
pub struct SessionState {
    /// Registry key
    pub user_id: String,
    /// Current lifecycle
    pub lifecycle: Lifecycle,
    /// Live connection, present while the lifecycle is active
    pub socket: Option<Arc<dyn ProtocolSocket>>,
    /// Rendered QR payload, only while awaiting a scan
    pub pairing_image: Option<String>,
    /// QR codes issued since the last successful connection or purge
    pub pairing_attempts: u32,
    /// Internal reconnects since the last successful connection
    pub reconnect_attempts: u32,
    /// Advisory failure description
    pub last_error: Option<String>,
    /// Whether credential material existed when the session started
    pub had_prior_session: bool,
    /// Instance counter guarding stale events and timers
    pub generation: u64,
    /// Armed timers
    pub timers: TimerSet,
    /// Time of the last state change
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Create a `Connecting` entry whose socket is still being opened.
    pub fn pending(user_id: impl Into<String>, generation: u64) -> Self {
        Self {
            user_id: user_id.into(),
            lifecycle: Lifecycle::Connecting,
            socket: None,
            pairing_image: None,
            pairing_attempts: 0,
            reconnect_attempts: 0,
            last_error: None,
            had_prior_session: false,
            generation,
            timers: TimerSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Create a `Connecting` entry around a freshly opened socket.
    pub fn connecting(
        user_id: impl Into<String>,
        generation: u64,
        socket: Arc<dyn ProtocolSocket>,
        had_prior_session: bool,
    ) -> Self {
        Self {
            socket: Some(socket),
            had_prior_session,
            ..Self::pending(user_id, generation)
        }
    }

    /// Move to a new lifecycle. Leaving `AwaitingScan` clears the image.
    pub fn transition(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
        if lifecycle != Lifecycle::AwaitingScan {
            self.pairing_image = None;
        }
        self.updated_at = Utc::now();
    }

    /// Snapshot for callers.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            user_id: self.user_id.clone(),
            lifecycle: self.lifecycle,
            pairing_image: self.pairing_image.clone(),
            pairing_attempts: self.pairing_attempts,
            last_error: self.last_error.clone(),
            generation: self.generation,
            updated_at: self.updated_at,
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("user_id", &self.user_id)
            .field("lifecycle", &self.lifecycle)
            .field("has_socket", &self.socket.is_some())
            .field("pairing_attempts", &self.pairing_attempts)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("last_error", &self.last_error)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// The single owner of all session state.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status snapshot of a user's entry.
    pub fn status(&self, user_id: &str) -> Option<SessionStatus> {
        self.sessions.lock().get(user_id).map(SessionState::status)
    }

    /// Lifecycle and generation of a user's entry.
    pub fn lifecycle(&self, user_id: &str) -> Option<(Lifecycle, u64)> {
        self.sessions
            .lock()
            .get(user_id)
            .map(|s| (s.lifecycle, s.generation))
    }

    /// The socket of a user's entry, together with its lifecycle.
    pub fn socket(&self, user_id: &str) -> Option<(Lifecycle, Option<Arc<dyn ProtocolSocket>>)> {
        self.sessions
            .lock()
            .get(user_id)
            .map(|s| (s.lifecycle, s.socket.clone()))
    }

    /// Store an entry, returning the one it replaced.
    pub fn insert(&self, state: SessionState) -> Option<SessionState> {
        self.sessions.lock().insert(state.user_id.clone(), state)
    }

    /// Hand a user's entry to a new generation, creating it if absent.
    ///
    /// The claimed entry is `Connecting` without a socket and with no timers
    /// armed; events and timers of the previous generation go stale. With
    /// `expected` set, only an entry still at that generation is claimed.
    /// Returns `None` when nothing was claimed, otherwise the socket the
    /// previous generation held.
    pub fn claim(
        &self,
        user_id: &str,
        expected: Option<u64>,
        generation: u64,
    ) -> Option<Option<Arc<dyn ProtocolSocket>>> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(user_id) {
            Some(state) => {
                if expected.is_some_and(|g| g != state.generation) {
                    return None;
                }
                state.timers.cancel_all();
                state.generation = generation;
                state.transition(Lifecycle::Connecting);
                Some(state.socket.take())
            }
            None if expected.is_some() => None,
            None => {
                sessions.insert(user_id.to_string(), SessionState::pending(user_id, generation));
                Some(None)
            }
        }
    }

    /// Remove a user's entry.
    pub fn remove(&self, user_id: &str) -> Option<SessionState> {
        self.sessions.lock().remove(user_id)
    }

    /// Remove a user's entry only if it is still the given generation.
    pub fn remove_generation(&self, user_id: &str, generation: u64) -> Option<SessionState> {
        let mut sessions = self.sessions.lock();
        match sessions.get(user_id) {
            Some(state) if state.generation == generation => sessions.remove(user_id),
            _ => None,
        }
    }

    /// Mutate a user's entry if it is still the given generation.
    ///
    /// Returns `None` when the entry is gone or has been superseded.
    pub fn update<R>(
        &self,
        user_id: &str,
        generation: u64,
        f: impl FnOnce(&mut SessionState) -> R,
    ) -> Option<R> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(user_id) {
            Some(state) if state.generation == generation => Some(f(state)),
            _ => None,
        }
    }

    /// Visit every entry.
    pub fn for_each(&self, mut f: impl FnMut(&SessionState)) {
        for state in self.sessions.lock().values() {
            f(state);
        }
    }

    /// Remove every entry matching the predicate.
    pub fn remove_where(&self, mut pred: impl FnMut(&SessionState) -> bool) -> Vec<SessionState> {
        let mut sessions = self.sessions.lock();
        let doomed: Vec<String> = sessions
            .iter()
            .filter(|(_, state)| pred(state))
            .map(|(user_id, _)| user_id.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|user_id| sessions.remove(&user_id))
            .collect()
    }

    /// Remove every entry.
    pub fn drain(&self) -> Vec<SessionState> {
        self.sessions.lock().drain().map(|(_, state)| state).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
