//! Per-user initialization coalescing.
//!
//! The first caller for a user spawns the initialization as a task and
//! publishes a shared handle to its result. Later callers attach to that
//! handle until it settles. The spawned task owns a guard whose drop removes
//! the marker, so the marker is cleared exactly once whether the
//! initialization succeeds, fails or panics.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use chatlink_core::SessionStatus;

use crate::error::SessionError;

/// Outcome shared by every coalesced caller.
pub type InitResult = Result<SessionStatus, SessionError>;

/// Handle to a pending initialization.
pub type PendingInit = Shared<BoxFuture<'static, InitResult>>;

type PendingMap = Arc<Mutex<HashMap<String, (u64, PendingInit)>>>;

/// Tracks at most one pending initialization per user.
#[derive(Default)]
pub struct InFlightTracker {
    pending: PendingMap,
    next_ticket: AtomicU64,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the pending initialization for a user, or start one.
    ///
    /// `start` is only invoked when nothing is pending. Returns the shared
    /// handle and whether this call started it.
    pub fn join_or_start<F, Fut>(&self, user_id: &str, start: F) -> (PendingInit, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = InitResult> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some((_, handle)) = pending.get(user_id) {
            debug!(user_id = %user_id, "Joining in-flight initialization");
            return (handle.clone(), false);
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let guard = MarkerGuard {
            pending: Arc::clone(&self.pending),
            user_id: user_id.to_string(),
            ticket,
        };
        let init = start();
        let task = tokio::spawn(async move {
            let _guard = guard;
            init.await
        });

        let handle = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(SessionError::protocol(format!(
                    "initialization task failed: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared();

        pending.insert(user_id.to_string(), (ticket, handle.clone()));
        (handle, true)
    }

    /// The pending initialization for a user, if any.
    pub fn get(&self, user_id: &str) -> Option<PendingInit> {
        self.pending
            .lock()
            .get(user_id)
            .map(|(_, handle)| handle.clone())
    }

    /// Whether an initialization is pending for a user.
    pub fn is_pending(&self, user_id: &str) -> bool {
        self.pending.lock().contains_key(user_id)
    }

    /// Number of pending initializations.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Clears a marker when the initialization task finishes.
struct MarkerGuard {
    pending: PendingMap,
    user_id: String,
    ticket: u64,
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if matches!(pending.get(&self.user_id), Some((ticket, _)) if *ticket == self.ticket) {
            pending.remove(&self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_start() {
        let tracker = InFlightTracker::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();
        let gate = gate.shared();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let starts = Arc::clone(&starts);
            let gate = gate.clone();
            let (handle, _) = tracker.join_or_start("u1", move || {
                starts.fetch_add(1, Ordering::SeqCst);
                async move {
                    let _ = gate.await;
                    Ok(SessionStatus::uninitialized("u1"))
                }
            });
            handles.push(handle);
        }

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(tracker.is_pending("u1"));

        release.send(()).unwrap();
        for handle in handles {
            assert_eq!(handle.await.unwrap().user_id, "u1");
        }
        tokio::task::yield_now().await;
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_marker_cleared_on_failure() {
        let tracker = InFlightTracker::new();
        let (handle, started) = tracker.join_or_start("u1", || async {
            Err(SessionError::protocol("socket refused"))
        });
        assert!(started);
        assert!(matches!(handle.await, Err(SessionError::Protocol(_))));
        assert!(!tracker.is_pending("u1"));

        let (_, started) = tracker.join_or_start("u1", || async {
            Ok(SessionStatus::uninitialized("u1"))
        });
        assert!(started);
    }

    #[tokio::test]
    async fn test_marker_cleared_on_panic() {
        let tracker = InFlightTracker::new();
        let explode = true;
        let (handle, _) = tracker.join_or_start("u1", move || async move {
            assert!(!explode, "boom");
            Ok(SessionStatus::uninitialized("u1"))
        });
        assert!(matches!(handle.await, Err(SessionError::Protocol(_))));
        assert!(!tracker.is_pending("u1"));
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let tracker = InFlightTracker::new();
        let (release, gate) = oneshot::channel::<()>();
        let (a, _) = tracker.join_or_start("a", move || async move {
            let _ = gate.await;
            Ok(SessionStatus::uninitialized("a"))
        });
        let (b, started) = tracker.join_or_start("b", || async {
            Ok(SessionStatus::uninitialized("b"))
        });

        assert!(started);
        assert_eq!(b.await.unwrap().user_id, "b");
        assert!(tracker.is_pending("a"));

        release.send(()).unwrap();
        assert_eq!(a.await.unwrap().user_id, "a");
    }
}
