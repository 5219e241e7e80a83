//! Session lifecycle orchestration.
//!
//! `SessionManager` creates, monitors, reconnects and tears down one session
//! per user. Every socket gets an event pump task that feeds its events, in
//! order, into the state machine below. Each session instance carries a
//! generation number; events and timers tagged with an older generation are
//! dropped, so nothing acts on a superseded or deleted session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatlink_core::{Config, Lifecycle, SessionStatus};

use crate::auth_store::{validate_user_id, AuthStore, CredentialState};
use crate::error::SessionError;
use crate::inflight::{InFlightTracker, InitResult, PendingInit};
use crate::policy::{ReconnectDecision, ReconnectPolicy};
use crate::qr::QrRenderer;
use crate::reaper::IdleReaper;
use crate::registry::{SessionRegistry, SessionState};
use crate::socket::{
    DisconnectReason, OpenedSocket, ProtocolSocket, SocketEvent, SocketFactory, SocketOptions,
};
use crate::timers::{TimerId, TimerKind};

pub type Result<T> = std::result::Result<T, SessionError>;

/// Typed session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for a fresh socket to open or show a QR code
    pub connection_timeout: Duration,
    /// Deadline for a QR code to be scanned
    pub pairing_timeout: Duration,
    /// QR codes issued before pairing is abandoned; also the reconnect budget
    pub max_pairing_attempts: u32,
    /// Base reconnect delay
    pub reconnect_delay: Duration,
    /// Reconnect delay cap
    pub max_reconnect_delay: Duration,
    /// Idle reaper sweep interval
    pub reaper_interval: Duration,
    /// Options handed to the socket factory
    pub socket: SocketOptions,
}

impl SessionConfig {
    /// Derive typed settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let session = &config.session;
        let connection_timeout = Duration::from_millis(session.connection_timeout_ms);
        Self {
            connection_timeout,
            pairing_timeout: Duration::from_millis(session.pairing_timeout_ms),
            max_pairing_attempts: session.max_pairing_attempts,
            reconnect_delay: Duration::from_millis(session.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(session.max_reconnect_delay_ms),
            reaper_interval: Duration::from_secs(config.reaper.interval_secs),
            socket: SocketOptions::from_settings(&config.socket, connection_timeout),
        }
    }

    /// The reconnect policy these settings describe.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_pairing_attempts,
            self.reconnect_delay,
            self.max_reconnect_delay,
        )
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Counters carried from a superseded session into its internal reconnect.
#[derive(Debug, Clone, Copy, Default)]
struct Carry {
    pairing_attempts: u32,
    reconnect_attempts: u32,
    /// Generation an internal reconnect takes over; `None` for caller inits
    supersedes: Option<u64>,
}

/// Result of handling a pairing code under the registry lock.
enum PairingStep {
    Exhausted(ReconnectDecision),
    Issued { attempt: u32, purge_prior: bool },
}

/// What an expired timer asks for, decided under the registry lock.
enum TimerAction {
    Close(DisconnectReason, ReconnectDecision),
    Reconnect(Carry),
}

/// Manages one session per user.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    policy: ReconnectPolicy,
    registry: Arc<SessionRegistry>,
    inflight: InFlightTracker,
    auth: Arc<dyn AuthStore>,
    factory: Arc<dyn SocketFactory>,
    renderer: Arc<dyn QrRenderer>,
    generations: AtomicU64,
    shutdown: CancellationToken,
}

impl SessionManager {
    /// Create a manager over the given collaborators.
    pub fn new(
        config: SessionConfig,
        auth: Arc<dyn AuthStore>,
        factory: Arc<dyn SocketFactory>,
        renderer: Arc<dyn QrRenderer>,
    ) -> Self {
        let policy = config.reconnect_policy();
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                registry: Arc::new(SessionRegistry::new()),
                inflight: InFlightTracker::new(),
                auth,
                factory,
                renderer,
                generations: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The shared registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.inner.registry)
    }

    /// Start a session for a user, or return the existing one.
    ///
    /// Concurrent calls for the same user share a single attempt. Without
    /// `force_new`, a user whose session is already live gets its status
    /// back. With `force_new`, a fresh socket replaces the current one.
    pub async fn initialize(&self, user_id: &str, force_new: bool) -> Result<SessionStatus> {
        validate_user_id(user_id)?;

        if let Some(pending) = self.inner.inflight.get(user_id) {
            debug!(user_id = %user_id, "Waiting on in-flight initialization");
            return pending.await;
        }

        if !force_new {
            if let Some(status) = self.inner.registry.status(user_id) {
                if status.lifecycle.is_active() {
                    debug!(user_id = %user_id, lifecycle = %status.lifecycle, "Session already live");
                    return Ok(status);
                }
            }
        }

        self.inner.start_init(user_id, Carry::default()).await
    }

    /// Current status; unknown users report `Uninitialized`.
    pub fn status(&self, user_id: &str) -> SessionStatus {
        self.inner
            .registry
            .status(user_id)
            .unwrap_or_else(|| SessionStatus::uninitialized(user_id))
    }

    /// Status of every registered session.
    pub fn sessions(&self) -> Vec<SessionStatus> {
        let mut sessions = Vec::new();
        self.inner.registry.for_each(|state| sessions.push(state.status()));
        sessions.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        sessions
    }

    /// Log a user out, close the socket and purge stored credentials.
    ///
    /// An initialization that starts while this runs finds its claimed entry
    /// gone once its socket opens, and closes that socket.
    pub async fn unlink(&self, user_id: &str) -> Result<()> {
        validate_user_id(user_id)?;

        if let Some(pending) = self.inner.inflight.get(user_id) {
            debug!(user_id = %user_id, "Unlink waiting on in-flight initialization");
            let _ = pending.await;
        }

        let has_credentials = self.inner.auth.exists(user_id).await?;
        let removed = self.inner.registry.remove(user_id);
        if removed.is_none() && !has_credentials {
            return Err(SessionError::NotFound(user_id.to_string()));
        }

        if let Some(mut state) = removed {
            state.timers.cancel_all();
            let socket = state.socket.take();
            drop(state);
            if let Some(socket) = socket {
                if let Err(e) = socket.logout().await {
                    warn!(user_id = %user_id, error = %e, "Logout failed");
                }
                close_socket(user_id, socket).await;
            }
        }

        self.inner.auth.purge(user_id).await?;
        info!(user_id = %user_id, "Session unlinked");
        Ok(())
    }

    /// Build a reaper over this manager's registry.
    pub fn reaper(&self) -> IdleReaper {
        IdleReaper::new(self.registry(), self.inner.config.reaper_interval)
    }

    /// Run the reaper in the background until shutdown.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        self.reaper().spawn(self.inner.shutdown.child_token())
    }

    /// Stop background work and close every socket. Credentials are kept.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let sockets: Vec<(String, Arc<dyn ProtocolSocket>)> = self
            .inner
            .registry
            .drain()
            .into_iter()
            .filter_map(|mut state| {
                state.timers.cancel_all();
                let socket = state.socket.take()?;
                Some((state.user_id.clone(), socket))
            })
            .collect();

        info!(sessions = sockets.len(), "Shutting down sessions");
        for (user_id, socket) in sockets {
            close_socket(&user_id, socket).await;
        }
    }
}

impl Inner {
    /// Start (or join) an initialization for a user.
    fn start_init(self: &Arc<Self>, user_id: &str, carry: Carry) -> PendingInit {
        let inner = Arc::clone(self);
        let user = user_id.to_string();
        let (pending, started) = self
            .inflight
            .join_or_start(user_id, move || async move { inner.open_session(user, carry).await });
        if !started {
            debug!(user_id = %user_id, "Joined in-flight initialization");
        }
        pending
    }

    async fn open_session(self: Arc<Self>, user_id: String, carry: Carry) -> InitResult {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;

        // Take the entry over first so the old socket is closed before a
        // new one exists, and so an unlink in the meantime is noticed.
        let Some(previous) = self.registry.claim(&user_id, carry.supersedes, generation) else {
            debug!(user_id = %user_id, generation, "Session gone before reconnect");
            return Err(SessionError::NotFound(user_id));
        };
        self.registry.update(&user_id, generation, |state| {
            state.pairing_attempts = carry.pairing_attempts;
            state.reconnect_attempts = carry.reconnect_attempts;
        });
        if let Some(socket) = previous {
            debug!(user_id = %user_id, generation, "Closing superseded socket");
            close_socket(&user_id, socket).await;
        }

        info!(user_id = %user_id, generation, "Opening session");
        match self.connect(&user_id, generation).await {
            Ok(status) => Ok(status),
            Err(e) => {
                self.on_open_failed(&user_id, generation, carry, &e).await;
                Err(e)
            }
        }
    }

    /// Open a socket and install it into the claimed entry.
    async fn connect(self: &Arc<Self>, user_id: &str, generation: u64) -> InitResult {
        let credentials = self.auth.load(user_id).await?;
        let had_prior_session = !credentials.is_empty();
        let OpenedSocket { socket, events } = self
            .factory
            .open(user_id, credentials, &self.config.socket)
            .await?;

        let installed = self.registry.update(user_id, generation, |state| {
            state.socket = Some(Arc::clone(&socket));
            state.had_prior_session = had_prior_session;
            self.arm_timer(state, TimerKind::Connection, self.config.connection_timeout);
            state.status()
        });
        let Some(status) = installed else {
            warn!(user_id = %user_id, generation, "Session removed while opening, closing socket");
            close_socket(user_id, socket).await;
            return Err(SessionError::NotFound(user_id.to_string()));
        };

        tokio::spawn(pump_events(
            Arc::downgrade(self),
            user_id.to_string(),
            generation,
            events,
            self.shutdown.clone(),
        ));

        debug!(user_id = %user_id, generation, had_prior_session, "Session connecting");
        Ok(status)
    }

    /// Settle the claimed entry after a failed open.
    ///
    /// A caller-driven init leaves nothing behind. An internal reconnect goes
    /// back through the policy and retries until the budget runs out.
    async fn on_open_failed(
        self: &Arc<Self>,
        user_id: &str,
        generation: u64,
        carry: Carry,
        error: &SessionError,
    ) {
        if carry.supersedes.is_none() {
            warn!(user_id = %user_id, generation, error = %error, "Session failed to open");
            self.registry.remove_generation(user_id, generation);
            return;
        }

        let reason = DisconnectReason::ConnectionLost;
        let decision = self.registry.update(user_id, generation, |state| {
            let decision = self.begin_close(state, reason);
            state.last_error = Some(format!("reconnect failed: {}", error));
            decision
        });
        if let Some(decision) = decision {
            warn!(
                user_id = %user_id,
                generation,
                attempt = carry.reconnect_attempts,
                error = %error,
                "Reconnect failed"
            );
            self.finish_close(user_id, generation, reason, decision).await;
        }
    }

    /// Arm a timer that re-enters the state machine for this generation.
    fn arm_timer(self: &Arc<Self>, state: &mut SessionState, kind: TimerKind, delay: Duration) {
        let inner = Arc::downgrade(self);
        let user_id = state.user_id.clone();
        let generation = state.generation;
        state.timers.arm(kind, delay, move |id| async move {
            if let Some(inner) = inner.upgrade() {
                inner.on_timer(user_id, generation, kind, id).await;
            }
        });
    }

    async fn handle_event(self: &Arc<Self>, user_id: &str, generation: u64, event: SocketEvent) {
        match event {
            SocketEvent::PairingCode(code) => self.on_pairing_code(user_id, generation, &code).await,
            SocketEvent::Opened => self.on_opened(user_id, generation),
            SocketEvent::Closed(reason) => self.on_closed(user_id, generation, reason).await,
            SocketEvent::CredentialsChanged(credentials) => {
                self.on_credentials_changed(user_id, generation, credentials)
                    .await
            }
        }
    }

    /// Whether this generation still owns the user's entry.
    fn is_current(&self, user_id: &str, generation: u64) -> bool {
        matches!(self.registry.lifecycle(user_id), Some((_, g)) if g == generation)
    }

    async fn on_pairing_code(self: &Arc<Self>, user_id: &str, generation: u64, code: &str) {
        let rendered = self.renderer.render(code);
        let max_attempts = self.config.max_pairing_attempts;

        let step = self.registry.update(user_id, generation, |state| {
            state.timers.cancel(TimerKind::Connection);
            state.timers.cancel(TimerKind::Pairing);

            if state.pairing_attempts >= max_attempts {
                let decision = self.begin_close(state, DisconnectReason::PairingExhausted);
                return PairingStep::Exhausted(decision);
            }

            let purge_prior = state.had_prior_session && state.pairing_attempts == 0;
            if purge_prior {
                state.had_prior_session = false;
            }

            match rendered {
                Ok(image) => state.pairing_image = Some(image),
                Err(e) => {
                    state.pairing_image = None;
                    state.last_error = Some(format!("failed to render pairing code: {}", e));
                }
            }
            state.pairing_attempts += 1;
            state.transition(Lifecycle::AwaitingScan);
            self.arm_timer(state, TimerKind::Pairing, self.config.pairing_timeout);

            PairingStep::Issued {
                attempt: state.pairing_attempts,
                purge_prior,
            }
        });

        match step {
            None => {}
            Some(PairingStep::Exhausted(decision)) => {
                warn!(user_id = %user_id, generation, "Pairing attempts exhausted");
                self.finish_close(user_id, generation, DisconnectReason::PairingExhausted, decision)
                    .await;
            }
            Some(PairingStep::Issued {
                attempt,
                purge_prior,
            }) => {
                info!(user_id = %user_id, generation, attempt, "Pairing code issued");
                if purge_prior {
                    info!(user_id = %user_id, "Discarding stale credentials before pairing");
                    if let Err(e) = self.auth.purge(user_id).await {
                        warn!(user_id = %user_id, error = %e, "Failed to purge stale credentials");
                        self.registry.update(user_id, generation, |state| {
                            state.last_error = Some(e.to_string());
                        });
                    }
                }
            }
        }
    }

    fn on_opened(&self, user_id: &str, generation: u64) {
        let updated = self.registry.update(user_id, generation, |state| {
            state.timers.cancel_all();
            state.transition(Lifecycle::Connected);
            state.pairing_attempts = 0;
            state.reconnect_attempts = 0;
            state.last_error = None;
            state.had_prior_session = true;
        });
        if updated.is_some() {
            info!(user_id = %user_id, generation, "Session connected");
        }
    }

    async fn on_closed(self: &Arc<Self>, user_id: &str, generation: u64, reason: DisconnectReason) {
        let decision = self
            .registry
            .update(user_id, generation, |state| self.begin_close(state, reason));
        if let Some(decision) = decision {
            self.finish_close(user_id, generation, reason, decision).await;
        }
    }

    /// Apply the reconnect policy to a closing session. Runs under the lock.
    fn begin_close(
        self: &Arc<Self>,
        state: &mut SessionState,
        reason: DisconnectReason,
    ) -> ReconnectDecision {
        state.timers.cancel_all();
        let attempts = state.pairing_attempts.max(state.reconnect_attempts);
        let decision = self.policy.decide(reason, attempts);
        if let ReconnectDecision::RetryAfter(delay) = decision {
            state.last_error = Some(reason.to_string());
            state.transition(Lifecycle::Reconnecting);
            self.arm_timer(state, TimerKind::Reconnect, delay);
        }
        decision
    }

    async fn finish_close(
        &self,
        user_id: &str,
        generation: u64,
        reason: DisconnectReason,
        decision: ReconnectDecision,
    ) {
        match decision {
            ReconnectDecision::RetryAfter(delay) => {
                info!(
                    user_id = %user_id,
                    generation,
                    reason = %reason,
                    delay_ms = delay.as_millis() as u64,
                    "Connection closed, scheduling reconnect"
                );
            }
            ReconnectDecision::Purge => self.teardown(user_id, generation, reason, true).await,
            ReconnectDecision::GiveUpNoPurge => {
                self.teardown(user_id, generation, reason, false).await
            }
        }
    }

    async fn on_credentials_changed(
        &self,
        user_id: &str,
        generation: u64,
        credentials: CredentialState,
    ) {
        if !self.is_current(user_id, generation) {
            return;
        }
        if let Err(e) = self.auth.save(user_id, &credentials).await {
            warn!(user_id = %user_id, error = %e, "Failed to persist credentials");
            self.registry.update(user_id, generation, |state| {
                state.last_error = Some(format!("failed to persist credentials: {}", e));
            });
        }
    }

    async fn on_timer(
        self: Arc<Self>,
        user_id: String,
        generation: u64,
        kind: TimerKind,
        id: TimerId,
    ) {
        let action = self
            .registry
            .update(&user_id, generation, |state| {
                if !state.timers.take_fired(kind, id) {
                    return None;
                }
                match (kind, state.lifecycle) {
                    (TimerKind::Connection, Lifecycle::Connecting) => {
                        let reason = DisconnectReason::ConnectionTimeout;
                        Some(TimerAction::Close(reason, self.begin_close(state, reason)))
                    }
                    (TimerKind::Pairing, Lifecycle::AwaitingScan) => {
                        let reason = DisconnectReason::PairingTimeout;
                        Some(TimerAction::Close(reason, self.begin_close(state, reason)))
                    }
                    (TimerKind::Reconnect, Lifecycle::Reconnecting) => {
                        Some(TimerAction::Reconnect(Carry {
                            pairing_attempts: state.pairing_attempts,
                            reconnect_attempts: state.reconnect_attempts + 1,
                            supersedes: Some(generation),
                        }))
                    }
                    (kind, lifecycle) => {
                        debug!(user_id = %user_id, timer = %kind, lifecycle = %lifecycle, "Ignoring timer");
                        None
                    }
                }
            })
            .flatten();

        match action {
            None => {}
            Some(TimerAction::Close(reason, decision)) => {
                debug!(user_id = %user_id, generation, timer = %kind, "Timer expired");
                self.finish_close(&user_id, generation, reason, decision)
                    .await
            }
            Some(TimerAction::Reconnect(carry)) => {
                info!(
                    user_id = %user_id,
                    generation,
                    attempt = carry.reconnect_attempts,
                    "Reconnecting"
                );
                // Failures are settled inside the init itself.
                if let Err(e) = self.start_init(&user_id, carry).await {
                    debug!(user_id = %user_id, error = %e, "Reconnect attempt did not open");
                }
            }
        }
    }

    /// The event stream ended without a close; leave the entry for the reaper.
    async fn on_stream_end(&self, user_id: &str, generation: u64) {
        let socket = self
            .registry
            .update(user_id, generation, |state| {
                let live = matches!(
                    state.lifecycle,
                    Lifecycle::Connecting | Lifecycle::AwaitingScan | Lifecycle::Connected
                );
                if !live {
                    return None;
                }
                state.timers.cancel_all();
                state.last_error = Some("event stream ended without a close".to_string());
                state.transition(Lifecycle::Failed);
                Some(state.socket.take())
            })
            .flatten();

        if let Some(socket) = socket {
            warn!(user_id = %user_id, generation, "Session orphaned, marked failed");
            if let Some(socket) = socket {
                close_socket(user_id, socket).await;
            }
        }
    }

    /// Close the socket, optionally purge credentials, then drop the entry.
    async fn teardown(&self, user_id: &str, generation: u64, reason: DisconnectReason, purge: bool) {
        let socket = self.registry.update(user_id, generation, |state| {
            state.timers.cancel_all();
            state.last_error = Some(reason.to_string());
            state.transition(Lifecycle::Failed);
            state.socket.take()
        });
        let Some(socket) = socket else {
            return;
        };

        if let Some(socket) = socket {
            close_socket(user_id, socket).await;
        }
        if purge {
            if let Err(e) = self.auth.purge(user_id).await {
                warn!(user_id = %user_id, error = %e, "Failed to purge credentials");
            }
        }
        self.registry.remove_generation(user_id, generation);

        info!(
            user_id = %user_id,
            generation,
            reason = %reason,
            purged = purge,
            "Session torn down"
        );
    }
}

async fn close_socket(user_id: &str, socket: Arc<dyn ProtocolSocket>) {
    if let Err(e) = socket.close().await {
        warn!(user_id = %user_id, error = %e, "Failed to close socket");
    }
}

/// Feed one socket's events into the state machine until it goes stale.
async fn pump_events(
    inner: Weak<Inner>,
    user_id: String,
    generation: u64,
    mut events: mpsc::Receiver<SocketEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };

        match event {
            Some(event) => {
                if !inner.is_current(&user_id, generation) {
                    debug!(user_id = %user_id, generation, "Dropping events of superseded session");
                    return;
                }
                inner.handle_event(&user_id, generation, event).await;
            }
            None => {
                inner.on_stream_end(&user_id, generation).await;
                return;
            }
        }
    }
}
