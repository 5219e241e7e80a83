//! Background eviction of orphaned sessions.
//!
//! Normal teardown removes entries itself. The reaper only catches entries
//! left in a non-live lifecycle, closes whatever socket they still hold and
//! drops them. Stored credentials are never touched.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::SessionRegistry;

/// Periodic sweep over the session registry.
pub struct IdleReaper {
    registry: Arc<SessionRegistry>,
    interval: Duration,
}

impl IdleReaper {
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Sweep interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Evict every entry whose lifecycle is not live. Returns the count.
    pub async fn sweep(&self) -> usize {
        let evicted = self.registry.remove_where(|state| !state.lifecycle.is_active());
        let count = evicted.len();

        let mut sockets = Vec::new();
        for mut state in evicted {
            state.timers.cancel_all();
            debug!(
                user_id = %state.user_id,
                generation = state.generation,
                lifecycle = %state.lifecycle,
                "Evicting orphaned session"
            );
            if let Some(socket) = state.socket.take() {
                sockets.push((state.user_id.clone(), socket));
            }
        }

        for (user_id, socket) in sockets {
            if let Err(e) = socket.close().await {
                warn!(user_id = %user_id, error = %e, "Failed to close orphaned socket");
            }
        }

        if count > 0 {
            info!(evicted = count, "Reaper sweep finished");
        }
        count
    }

    /// Sweep on every interval tick until cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Reaper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SocketError;
    use crate::registry::SessionState;
    use crate::socket::ProtocolSocket;
    use async_trait::async_trait;
    use chatlink_core::{Address, Lifecycle};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSocket {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl ProtocolSocket for CountingSocket {
        async fn send_text(&self, _to: &Address, _text: &str) -> Result<String, SocketError> {
            Err(SocketError::ConnectionClosed)
        }

        async fn send_media(
            &self,
            _to: &Address,
            _url: &str,
            _caption: Option<&str>,
        ) -> Result<String, SocketError> {
            Err(SocketError::ConnectionClosed)
        }

        async fn logout(&self) -> Result<(), SocketError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), SocketError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry_with(entries: &[(&str, Lifecycle)], socket: &Arc<CountingSocket>) -> Arc<SessionRegistry> {
        let registry = Arc::new(SessionRegistry::new());
        for (i, (user_id, lifecycle)) in entries.iter().enumerate() {
            let mut state = SessionState::connecting(*user_id, i as u64 + 1, socket.clone(), false);
            state.transition(*lifecycle);
            registry.insert(state);
        }
        registry
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_non_live_entries() {
        let socket = Arc::new(CountingSocket::default());
        let registry = registry_with(
            &[
                ("connected", Lifecycle::Connected),
                ("scanning", Lifecycle::AwaitingScan),
                ("failed", Lifecycle::Failed),
            ],
            &socket,
        );
        let reaper = IdleReaper::new(Arc::clone(&registry), Duration::from_secs(60));

        assert_eq!(reaper.sweep().await, 1);
        assert!(registry.status("failed").is_none());
        assert!(registry.status("connected").is_some());
        assert!(registry.status("scanning").is_some());
        assert_eq!(socket.closes.load(Ordering::SeqCst), 1);

        assert_eq!(reaper.sweep().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_reaper_sweeps_after_interval() {
        let socket = Arc::new(CountingSocket::default());
        let registry = registry_with(&[("failed", Lifecycle::Failed)], &socket);
        let cancel = CancellationToken::new();
        let handle = IdleReaper::new(Arc::clone(&registry), Duration::from_secs(60))
            .spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(registry.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
