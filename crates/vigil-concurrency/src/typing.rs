//! `TypingTracker` (§4.H): refcounted per-key typing-indicator heartbeat,
//! generalized from `skynet-telegram/src/typing.rs`'s single-chat
//! `TypingHandle` (a bare `tokio::spawn` loop sending `ChatAction::Typing`
//! every 4s) into a registry so overlapping turns in the same chat share
//! one heartbeat instead of racing to send duplicates.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

/// Where a typing heartbeat is delivered. The concrete sink is an
/// external concern — a channel adapter implements this over its own
/// "send chat action" call.
pub trait TypingSink: Send + Sync {
    fn send_typing(&self);
}

struct Entry {
    refcount: AtomicUsize,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct TypingTracker<K> {
    entries: Arc<DashMap<K, Arc<Entry>>>,
    interval_ms: u64,
}

impl<K> Clone for TypingTracker<K> {
    fn clone(&self) -> Self {
        Self { entries: Arc::clone(&self.entries), interval_ms: self.interval_ms }
    }
}

impl<K> TypingTracker<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(interval_ms: u64) -> Self {
        Self { entries: Arc::new(DashMap::new()), interval_ms }
    }

    /// Registers interest in a typing indicator for `key`. The first
    /// holder fires an immediate heartbeat and spawns the repeating timer;
    /// subsequent holders before the guard is released just bump the
    /// refcount.
    pub fn acquire(&self, key: K, sink: Arc<dyn TypingSink>) -> TypingGuard<K> {
        let entry = {
            let slot = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Entry { refcount: AtomicUsize::new(0), handle: Mutex::new(None) }));
            Arc::clone(slot.value())
        };

        if entry.refcount.fetch_add(1, Ordering::SeqCst) == 0 {
            sink.send_typing();
            let interval_ms = self.interval_ms;
            let heartbeat_sink = Arc::clone(&sink);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    heartbeat_sink.send_typing();
                }
            });
            *entry.handle.lock().unwrap() = Some(handle);
        }

        TypingGuard { key, entry, entries: Arc::clone(&self.entries), released: false }
    }
}

/// Dropping the guard without calling `release` still tears down the
/// timer on last-holder release; `release` additionally reports whether
/// this call was the one that stopped the heartbeat.
pub struct TypingGuard<K> {
    key: K,
    entry: Arc<Entry>,
    entries: Arc<DashMap<K, Arc<Entry>>>,
    released: bool,
}

impl<K> TypingGuard<K>
where
    K: Eq + Hash + Clone,
{
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let was_last = self.entry.refcount.fetch_sub(1, Ordering::SeqCst) == 1;
        if was_last {
            if let Some(handle) = self.entry.handle.lock().unwrap().take() {
                handle.abort();
            }
            let entry = Arc::clone(&self.entry);
            self.entries.remove_if(&self.key, |_, v| Arc::ptr_eq(v, &entry) && v.refcount.load(Ordering::SeqCst) == 0);
        }
        was_last
    }
}

impl<K> Drop for TypingGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingSink(AtomicU32);
    impl TypingSink for CountingSink {
        fn send_typing(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn first_acquire_sends_immediately() {
        let tracker = TypingTracker::new(50);
        let sink = Arc::new(CountingSink(AtomicU32::new(0)));
        let _guard = tracker.acquire("chat-1".to_string(), sink.clone());
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_holder_does_not_spawn_a_second_timer() {
        let tracker = TypingTracker::new(10_000);
        let sink = Arc::new(CountingSink(AtomicU32::new(0)));
        let g1 = tracker.acquire("chat-1".to_string(), sink.clone());
        let g2 = tracker.acquire("chat-1".to_string(), sink.clone());
        assert_eq!(sink.0.load(Ordering::SeqCst), 1, "only the first acquire should fire immediately");
        assert!(!g1.release());
        assert!(g2.release());
    }

    #[tokio::test]
    async fn release_reports_last_holder() {
        let tracker = TypingTracker::new(10_000);
        let sink = Arc::new(CountingSink(AtomicU32::new(0)));
        let guard = tracker.acquire("chat-1".to_string(), sink);
        assert!(guard.release());
    }
}
