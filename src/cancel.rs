//! A small cooperative cancellation primitive threaded through the
//! watcher, dispatcher, and scanner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called (or immediately, if it
    /// already has been).
    ///
    /// The `notified()` future is created before the flag is checked, so a
    /// `cancel()` racing in between the check and the `.await` is still
    /// observed: `Notify` associates the future with its waiter list at
    /// creation, not at first poll.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
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

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancelled_is_pending_until_cancel_then_ready() {
        let token = CancellationToken::new();
        let mut fut = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(fut.poll());
        token.cancel();
        tokio_test::assert_ready!(fut.poll());
    }

    #[tokio::test]
    async fn cancel_racing_with_cancelled_is_not_lost() {
        // Many waiters parked in `cancelled()` before a single `cancel()`
        // fires; all of them must still resolve. The ordering guarantee
        // itself is pinned down by `cancelled_is_pending_until_cancel_then_ready`.
        let token = CancellationToken::new();
        let mut handles = Vec::new();
        for _ in 0..100 {
            let waiter = token.clone();
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                waiter.cancelled().await;
            }));
        }
        tokio::task::yield_now().await;
        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
