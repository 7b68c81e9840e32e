//! One-shot completion signal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A single-shot latch: transitions from unresolved to resolved exactly once
/// and wakes every waiter, past and future.
///
/// Used for approval resolution and cooperative cancellation. Clones share
/// the same underlying state.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CompletionSignal {
    /// Create an unresolved signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Resolve the signal. Returns `true` if this call performed the
    /// transition, `false` if it had already fired.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal fires. Returns immediately if already fired.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // borrow_and_update marks the current value seen, so a fire that
        // happened before subscribing is not missed.
        if *rx.borrow_and_update() {
            return;
        }
        // The sender lives in self, so changed() can only fail after fire().
        let _ = rx.changed().await;
    }

    /// Wait with a timeout. Returns `true` if the signal fired in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fires_exactly_once() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn test_wait_returns_after_fire() {
        let signal = CompletionSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });
        signal.fire();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_after_fire_returns_immediately() {
        let signal = CompletionSignal::new();
        signal.fire();
        signal.wait().await;
    }

    #[tokio::test]
    async fn test_wait_timeout_elapses() {
        let signal = CompletionSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_wakes_all_waiters() {
        let signal = CompletionSignal::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let waiter = signal.clone();
            handles.push(tokio::spawn(async move { waiter.wait().await }));
        }
        signal.fire();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
