//! `PerKeyLock` (§4.H): serializes tasks sharing a key ("for a single
//! `chatId`, inbound messages are processed strictly in arrival order").
//! Grounded on `skynet-agent/src/health.rs`'s `DashMap<K, V>` registry
//! idiom, extended with a refcount so entries with no waiters are
//! garbage-collected rather than growing the map forever.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

struct Slot {
    mutex: AsyncMutex<()>,
    waiters: AtomicUsize,
}

/// Process-wide registry of per-key mutexes. §5: "a short critical
/// section with no I/O inside" governs the registry lookup itself; the
/// task body runs under the per-key mutex, not the registry lock.
pub struct PerKeyLock<K> {
    slots: DashMap<K, Arc<Slot>>,
}

impl<K> Default for PerKeyLock<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> PerKeyLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self { slots: DashMap::new() }
    }

    /// Run `task` exclusively with respect to every other `run_exclusive`
    /// call sharing `key`. The slot is removed from the registry once this
    /// is the only remaining reference and no one else is waiting.
    pub async fn run_exclusive<T, F, Fut>(&self, key: K, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let slot = {
            let entry = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot { mutex: AsyncMutex::new(()), waiters: AtomicUsize::new(0) }));
            entry.waiters.fetch_add(1, Ordering::SeqCst);
            Arc::clone(entry.value())
        };

        let guard = slot.mutex.lock().await;
        let result = task().await;
        drop(guard);

        if slot.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.slots.remove_if(&key, |_, v| Arc::ptr_eq(v, &slot) && v.waiters.load(Ordering::SeqCst) == 0);
        }
        result
    }

    /// Number of distinct keys currently tracked. Exposed for tests and
    /// operator diagnostics only.
    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn same_key_tasks_run_strictly_sequentially() {
        let lock = StdArc::new(PerKeyLock::new());
        let order = StdArc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let lock = StdArc::clone(&lock);
            let order = StdArc::clone(&order);
            handles.push(tokio::spawn(async move {
                lock.run_exclusive("chat-1".to_string(), || async move {
                    order.lock().await.push(i);
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4], "tasks sharing a key must run in invocation order with no interleaving");
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let lock = PerKeyLock::new();
        let counter = StdArc::new(AtomicU32::new(0));
        let c1 = StdArc::clone(&counter);
        let c2 = StdArc::clone(&counter);
        tokio::join!(
            lock.run_exclusive("a".to_string(), || async move {
                c1.fetch_add(1, Ordering::SeqCst);
            }),
            lock.run_exclusive("b".to_string(), || async move {
                c2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slot_is_garbage_collected_after_release() {
        let lock = PerKeyLock::new();
        lock.run_exclusive("chat-1".to_string(), || async {}).await;
        assert_eq!(lock.tracked_keys(), 0, "a key with no waiters must not linger in the registry");
    }
}
