//! Resettable stop signal.
//!
//! The engine may ask a provider to stop at any time. Stopping cancels every
//! operation started since the last stop, waits for them to wind down, and
//! then arms a fresh signal so later requests run normally.
//!
//! Each arming is a *generation*: a [`CancellationToken`] plus a count of the
//! operations derived from it. [`StopSignal::derive`] registers an operation
//! with the current generation; the returned [`InFlight`] guard deregisters
//! it when dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Generation {
    token: CancellationToken,
    active: AtomicUsize,
    idle: Notify,
}

/// Cancellation shared by every operation of a provider server.
#[derive(Debug, Default)]
pub struct StopSignal {
    current: Mutex<Arc<Generation>>,
}

/// Registration of one in-flight operation. Dropping it cancels the
/// operation's own token and lets a pending stop finish.
#[derive(Debug)]
pub struct InFlight {
    generation: Arc<Generation>,
    token: CancellationToken,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.token.cancel();
        if self.generation.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.generation.idle.notify_waiters();
        }
    }
}

impl InFlight {
    /// The operation's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl StopSignal {
    /// A fresh, unstopped signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation with the current generation. The returned
    /// guard's token is cancelled when either the generation is stopped or
    /// `parent` is cancelled.
    pub async fn derive(&self, parent: &CancellationToken) -> InFlight {
        let generation = Arc::clone(&*self.current.lock().await);
        generation.active.fetch_add(1, Ordering::AcqRel);
        let token = generation.token.child_token();

        if parent.is_cancelled() {
            token.cancel();
        } else {
            let parent = parent.clone();
            let linked = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = parent.cancelled() => linked.cancel(),
                    _ = linked.cancelled() => {},
                }
            });
        }

        InFlight { generation, token }
    }

    /// Cancel every operation of the current generation, wait up to `grace`
    /// for them to finish, then arm a new generation.
    ///
    /// Concurrent calls are serialized; operations derived while a stop is
    /// draining join the next generation.
    pub async fn stop(&self, grace: Duration) {
        let mut current = self.current.lock().await;
        let in_flight = current.active.load(Ordering::Acquire);
        info!(in_flight, "Stopping in-flight operations");
        current.token.cancel();

        if !wait_for_quiescence(&current, grace).await {
            warn!(
                grace = ?grace,
                remaining = current.active.load(Ordering::Acquire),
                "Stop grace period elapsed with operations still running"
            );
        }

        *current = Arc::new(Generation::default());
        debug!("Stop signal reset");
    }

    /// True if the current generation has been cancelled. Only observable
    /// while a stop is in progress.
    pub async fn is_stopping(&self) -> bool {
        self.current.lock().await.token.is_cancelled()
    }
}

async fn wait_for_quiescence(generation: &Generation, grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let notified = generation.idle.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if generation.active.load(Ordering::Acquire) == 0 {
            return true;
        }
        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            return generation.active.load(Ordering::Acquire) == 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_cancels_in_flight() {
        let signal = StopSignal::new();
        let op = signal.derive(&CancellationToken::new()).await;
        assert!(!op.token().is_cancelled());

        let token = op.token().clone();
        let worker = tokio::spawn(async move {
            token.cancelled().await;
            drop(op);
        });

        signal.stop(Duration::from_secs(5)).await;
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_resets_for_later_requests() {
        let signal = StopSignal::new();

        for _ in 0..2 {
            let op = signal.derive(&CancellationToken::new()).await;
            let token = op.token().clone();
            let worker = tokio::spawn(async move {
                token.cancelled().await;
                drop(op);
            });
            signal.stop(Duration::from_secs(5)).await;
            worker.await.unwrap();

            let later = signal.derive(&CancellationToken::new()).await;
            assert!(!later.token().is_cancelled());
        }
        assert!(!signal.is_stopping().await);
    }

    #[tokio::test]
    async fn test_stop_gives_up_after_grace() {
        let signal = StopSignal::new();
        let stuck = signal.derive(&CancellationToken::new()).await;

        let started = std::time::Instant::now();
        signal.stop(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(stuck.token().is_cancelled());

        let fresh = signal.derive(&CancellationToken::new()).await;
        assert!(!fresh.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let signal = StopSignal::new();
        let parent = CancellationToken::new();
        let op = signal.derive(&parent).await;
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(5), op.token().cancelled())
            .await
            .unwrap();

        let already = CancellationToken::new();
        already.cancel();
        let op = signal.derive(&already).await;
        assert!(op.token().is_cancelled());
        assert!(!signal.is_stopping().await);
    }
}
