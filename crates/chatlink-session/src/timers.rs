//! Cancellable per-session timers.
//!
//! A session holds at most one timer of each kind. Arming a kind cancels the
//! previous timer of that kind first. Every armed timer gets a `TimerId`;
//! a callback must claim its id with `take_fired` under the registry lock
//! before acting, since cancellation can race with expiry.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// The timers a session can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// QR code left unscanned
    Pairing,
    /// Socket never opened
    Connection,
    /// Backoff before reconnecting
    Reconnect,
}

impl TimerKind {
    fn slot(self) -> usize {
        match self {
            TimerKind::Pairing => 0,
            TimerKind::Connection => 1,
            TimerKind::Reconnect => 2,
        }
    }
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pairing => write!(f, "pairing"),
            Self::Connection => write!(f, "connection"),
            Self::Reconnect => write!(f, "reconnect"),
        }
    }
}

/// Identity of one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Active timers of one session.
#[derive(Debug, Default)]
pub struct TimerSet {
    slots: [Option<(TimerId, CancellationToken)>; 3],
    next_id: u64,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer that runs `on_fire` after `delay` unless cancelled.
    ///
    /// `on_fire` receives the id of this timer. Must be called from within
    /// a tokio runtime.
    pub fn arm<F, Fut>(&mut self, kind: TimerKind, delay: Duration, on_fire: F) -> TimerId
    where
        F: FnOnce(TimerId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel(kind);

        self.next_id += 1;
        let id = TimerId(self.next_id);
        let token = CancellationToken::new();
        let guard = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = guard.cancelled() => {
                    trace!(timer = %kind, "Timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if !guard.is_cancelled() {
                        on_fire(id).await;
                    }
                }
            }
        });

        self.slots[kind.slot()] = Some((id, token));
        id
    }

    /// Cancel the timer of one kind, if armed.
    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some((_, token)) = self.slots[kind.slot()].take() {
            token.cancel();
        }
    }

    /// Disarm a timer that has expired.
    ///
    /// Returns `true` only if `id` is still the armed timer of its kind and
    /// was not cancelled; a `false` means the callback must do nothing.
    pub fn take_fired(&mut self, kind: TimerKind, id: TimerId) -> bool {
        let slot = kind.slot();
        let current = matches!(
            &self.slots[slot],
            Some((armed, token)) if *armed == id && !token.is_cancelled()
        );
        if current {
            self.slots[slot] = None;
        }
        current
    }

    /// Cancel every armed timer.
    pub fn cancel_all(&mut self) {
        for slot in &mut self.slots {
            if let Some((_, token)) = slot.take() {
                token.cancel();
            }
        }
    }

    /// Whether a timer of this kind is armed.
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.slot()].is_some()
    }

    /// Number of armed timers.
    pub fn armed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = TimerSet::new();

        let counter = Arc::clone(&fired);
        timers.arm(TimerKind::Pairing, Duration::from_secs(1), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.is_armed(TimerKind::Pairing));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_previous() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = TimerSet::new();

        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            timers.arm(TimerKind::Pairing, Duration::from_secs(1), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(timers.armed_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_and_drop() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = TimerSet::new();

        for kind in [TimerKind::Pairing, TimerKind::Connection, TimerKind::Reconnect] {
            let counter = Arc::clone(&fired);
            timers.arm(kind, Duration::from_secs(1), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(timers.armed_count(), 3);

        timers.cancel(TimerKind::Connection);
        assert!(!timers.is_armed(TimerKind::Connection));
        drop(timers);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_fired_only_matches_armed_timer() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut timers = TimerSet::new();

        let first_tx = tx.clone();
        let first = timers.arm(TimerKind::Pairing, Duration::from_secs(1), move |id| async move {
            let _ = first_tx.send(id);
        });
        let second = timers.arm(TimerKind::Pairing, Duration::from_secs(2), move |id| async move {
            let _ = tx.send(id);
        });
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(rx.recv().await, Some(second));
        assert!(rx.try_recv().is_err());

        assert!(!timers.take_fired(TimerKind::Pairing, first));
        assert!(!timers.take_fired(TimerKind::Reconnect, second));
        assert!(timers.take_fired(TimerKind::Pairing, second));
        assert!(!timers.is_armed(TimerKind::Pairing));
        assert!(!timers.take_fired(TimerKind::Pairing, second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_cannot_be_taken() {
        let mut timers = TimerSet::new();
        let id = timers.arm(TimerKind::Connection, Duration::from_secs(1), |_| async {});
        timers.cancel(TimerKind::Connection);
        assert!(!timers.take_fired(TimerKind::Connection, id));
    }
}
