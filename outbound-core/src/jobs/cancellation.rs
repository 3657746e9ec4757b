//! Cooperative cancellation.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// A cancellation token shared between the runtime and its workers.
///
/// Workers check [`CancellationToken::is_cancelled`] at batch boundaries and
/// finish the current item before exiting; shutdown paths await
/// [`CancellationToken::cancelled`].
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

#[derive(Debug)]
struct TokenState {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Create an un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            state: Arc::new(TokenState { tx, rx }),
        }
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.rx.borrow()
    }

    /// Request cancellation; visible to every clone.
    pub fn cancel(&self) {
        let _ = self.state.tx.send(true);
        debug!("cancellation requested");
    }

    /// Wait for cancellation; returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_visible_to_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wakes_waiters() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert!(handle.await.expect("join"));
    }
}
