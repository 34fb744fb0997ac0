//! Strict FIFO exclusion by key.
//!
//! Waiters are served in enqueue order because each key maps to a
//! [`tokio::sync::Mutex`], whose internal wait queue is itself FIFO. Holding
//! the guard does not make a second `acquire` on the same key re-entrant —
//! calling it from the same task while still holding a guard deadlocks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A registry of per-key FIFO mutexes.
///
/// Keys are typically composite strings such as
/// `"<workspaceRoot>:<dialogId>:<course>"` so that unrelated dialogs, or
/// parallel test workspaces, never contend on the same lock.
pub struct FifoMutex<K> {
    locks: StdMutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for FifoMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> FifoMutex<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Acquire exclusive access for `key`. Returns a guard whose `Drop`
    /// releases the lock; callers never need to release manually, but may
    /// call [`FifoMutexGuard::release`] to do so earlier and explicitly.
    pub async fn acquire(&self, key: K) -> FifoMutexGuard<K> {
        let entry = {
            let mut locks = self.locks.lock().expect("FifoMutex registry poisoned");
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = entry.lock_owned().await;
        FifoMutexGuard {
            _guard: guard,
            _key: key,
        }
    }

    /// Number of keys that currently have an entry (including idle ones).
    /// Exposed for tests asserting the registry does not leak across
    /// unrelated keys.
    pub fn tracked_key_count(&self) -> usize {
        self.locks.lock().expect("FifoMutex registry poisoned").len()
    }
}

/// Held while the caller has exclusive access to a `FifoMutex` key.
pub struct FifoMutexGuard<K> {
    _guard: OwnedMutexGuard<()>,
    _key: K,
}

impl<K> FifoMutexGuard<K> {
    /// Explicitly release the lock. Equivalent to dropping the guard; exists
    /// for call sites where an early, scoped release reads more clearly than
    /// an inner block.
    pub fn release(self) {}
}
