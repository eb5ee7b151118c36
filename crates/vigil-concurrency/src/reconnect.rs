//! `ReconnectGuard` (§4.H): at most one pending reconnect timer per
//! channel adapter. §5 cancellation: "the reconnect guard's pending timer
//! is cleared" on shutdown — `clear()` aborts rather than waiting it out.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

pub struct ReconnectGuard {
    pending: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for ReconnectGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectGuard {
    pub fn new() -> Self {
        Self { pending: Arc::new(Mutex::new(None)) }
    }

    /// Schedules `task` to run after `delay_ms`. Returns `true` if this
    /// call newly scheduled it, `false` if a timer was already pending
    /// (the existing one is left untouched).
    pub fn schedule<F, Fut>(&self, delay_ms: u64, task: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.pending.lock().unwrap();
        if guard.is_some() {
            return false;
        }

        let pending = Arc::clone(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            task().await;
            *pending.lock().unwrap() = None;
        });
        *guard = Some(handle);
        true
    }

    /// Cancels any pending timer. A no-op if none is pending.
    pub fn clear(&self) {
        if let Some(handle) = self.pending.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn second_schedule_while_pending_is_rejected() {
        let guard = ReconnectGuard::new();
        assert!(guard.schedule(50, || async {}));
        assert!(!guard.schedule(50, || async {}));
    }

    #[tokio::test]
    async fn clear_cancels_the_pending_timer() {
        let guard = ReconnectGuard::new();
        let fired = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&fired);
        guard.schedule(50, move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        guard.clear();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!guard.is_pending());
    }

    #[tokio::test]
    async fn a_new_timer_can_be_scheduled_after_the_first_fires() {
        let guard = ReconnectGuard::new();
        guard.schedule(10, || async {});
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(guard.schedule(10, || async {}), "after firing, the guard must accept a new schedule");
    }
}
