// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Coalesced, crash-safe write-back for `Latest`, `Q4H`, and
//! `PendingSubdialogs`. At most one *scheduled* entry (with a timer) plus
//! at most one *flushing* entry (the in-flight disk write) is held per key
//! at any time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use dialog_sync::FifoMutex;
use tokio::time::sleep;

pub const WRITEBACK_WINDOW_MS: u64 = 300;

/// What a `mutate` callback decided to do with the staged value.
pub enum StageDecision<V> {
    Noop,
    Replace(V),
}

/// Where a key's staged value ultimately lands: reads and writes of the
/// underlying persisted form.
#[async_trait]
pub trait WriteBackSink<V>: Send + Sync
where
    V: Clone + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<Option<V>>;
    async fn store(&self, key: &str, value: &V) -> anyhow::Result<()>;
}

enum EntryState<V> {
    Scheduled(V),
    Flushing { value: V, dirty: Option<V> },
}

/// Time-windowed coalescing write-back buffer, keyed by an opaque string
/// (typically `"<workspaceRoot>:<dialogId>:<kind>"`).
pub struct WriteBackBuffer<V, S> {
    locks: FifoMutex<String>,
    entries: StdMutex<HashMap<String, EntryState<V>>>,
    sink: Arc<S>,
    window: Duration,
}

impl<V, S> WriteBackBuffer<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: WriteBackSink<V> + 'static,
{
    pub fn new(sink: Arc<S>) -> Arc<Self> {
        Self::with_window(sink, Duration::from_millis(WRITEBACK_WINDOW_MS))
    }

    pub fn with_window(sink: Arc<S>, window: Duration) -> Arc<Self> {
        Arc::new(Self {
            locks: FifoMutex::new(),
            entries: StdMutex::new(HashMap::new()),
            sink,
            window,
        })
    }

    /// Current view of a key: the staged value if one exists, else the
    /// on-disk snapshot.
    pub async fn current(&self, key: &str) -> anyhow::Result<Option<V>> {
        let _guard = self.locks.acquire(key.to_string()).await;
        self.staged_or_load(key).await
    }

    async fn staged_or_load(&self, key: &str) -> anyhow::Result<Option<V>> {
        let staged = {
            let entries = self.entries.lock().expect("writeback entries poisoned");
            match entries.get(key) {
                Some(EntryState::Scheduled(v)) => Some(v.clone()),
                Some(EntryState::Flushing { value, dirty }) => {
                    Some(dirty.clone().unwrap_or_else(|| value.clone()))
                }
                None => None,
            }
        };
        match staged {
            Some(v) => Ok(Some(v)),
            None => self.sink.load(key).await,
        }
    }

    /// Apply a mutation to a key. `f` receives the current staged-or-disk
    /// value and decides whether to replace it. Errors from `f` (e.g. an
    /// invariant violation) abort the mutation without touching the entry.
    pub async fn mutate<F>(self: &Arc<Self>, key: impl Into<String>, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(Option<V>) -> anyhow::Result<StageDecision<V>> + Send,
    {
        let key = key.into();
        let _guard = self.locks.acquire(key.clone()).await;
        let current = self.staged_or_load(&key).await?;
        let decision = f(current)?;
        let new_value = match decision {
            StageDecision::Noop => return Ok(()),
            StageDecision::Replace(v) => v,
        };

        let should_arm = {
            use std::collections::hash_map::Entry;
            let mut entries = self.entries.lock().expect("writeback entries poisoned");
            match entries.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(EntryState::Scheduled(new_value));
                    true
                }
                Entry::Occupied(mut slot) => {
                    match slot.get_mut() {
                        EntryState::Scheduled(v) => *v = new_value,
                        EntryState::Flushing { dirty, .. } => *dirty = Some(new_value),
                    }
                    false
                }
            }
        };

        if should_arm {
            self.clone().arm_timer(key);
        }
        Ok(())
    }

    fn arm_timer(self: Arc<Self>, key: String) {
        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;
            self.flush(key).await;
        });
    }

    async fn flush(self: Arc<Self>, key: String) {
        let _guard = self.locks.acquire(key.clone()).await;

        let value = {
            let mut entries = self.entries.lock().expect("writeback entries poisoned");
            match entries.remove(&key) {
                Some(EntryState::Scheduled(v)) => v,
                // A concurrent flush already claimed this key, or it was
                // never scheduled (shouldn't happen — timers are only
                // armed when an entry is created).
                other => {
                    if let Some(other) = other {
                        entries.insert(key.clone(), other);
                    }
                    return;
                }
            }
        };

        {
            let mut entries = self.entries.lock().expect("writeback entries poisoned");
            entries.insert(
                key.clone(),
                EntryState::Flushing {
                    value: value.clone(),
                    dirty: None,
                },
            );
        }

        let result = self.sink.store(&key, &value).await;

        let mut entries = self.entries.lock().expect("writeback entries poisoned");
        match result {
            Ok(()) => match entries.remove(&key) {
                Some(EntryState::Flushing {
                    dirty: Some(dirty), ..
                }) => {
                    entries.insert(key.clone(), EntryState::Scheduled(dirty));
                    drop(entries);
                    self.clone().arm_timer(key);
                }
                _ => { /* nothing pending, entry fully flushed */ }
            },
            Err(e) => {
                tracing::warn!(key, error = %e, "writeback flush failed, will retry");
                let retry_value = match entries.remove(&key) {
                    Some(EntryState::Flushing { value, dirty }) => Some(dirty.unwrap_or(value)),
                    _ => None,
                };
                if let Some(v) = retry_value {
                    entries.insert(key.clone(), EntryState::Scheduled(v));
                    drop(entries);
                    self.clone().arm_timer(key);
                }
            }
        }
    }

    /// Block until every scheduled/flushing entry has drained. Intended for
    /// tests and for a clean shutdown path; polls rather than subscribing to
    /// completion since flush is driven by independently spawned timers.
    pub async fn drain(&self) {
        loop {
            let pending = {
                let entries = self.entries.lock().expect("writeback entries poisoned");
                !entries.is_empty()
            };
            if !pending {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncStdMutex;

    struct RecordingSink {
        writes: AsyncStdMutex<Vec<(String, u32)>>,
        fail_next: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                writes: AsyncStdMutex::new(Vec::new()),
                fail_next: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WriteBackSink<u32> for RecordingSink {
        async fn load(&self, _key: &str) -> anyhow::Result<Option<u32>> {
            Ok(None)
        }

        async fn store(&self, key: &str, value: &u32) -> anyhow::Result<()> {
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("injected failure");
            }
            self.writes.lock().await.push((key.to_string(), *value));
            Ok(())
        }
    }

    fn test_window() -> Duration {
        Duration::from_millis(20)
    }

    #[tokio::test]
    async fn single_mutation_flushes_after_window() {
        let sink = Arc::new(RecordingSink::new());
        let buf = WriteBackBuffer::with_window(sink.clone(), test_window());
        buf.mutate("k", |_| Ok(StageDecision::Replace(1))).await.unwrap();
        buf.drain().await;
        assert_eq!(*sink.writes.lock().await, vec![("k".to_string(), 1)]);
    }

    #[tokio::test]
    async fn coalesces_rapid_mutations_into_one_write() {
        let sink = Arc::new(RecordingSink::new());
        let buf = WriteBackBuffer::with_window(sink.clone(), test_window());
        for i in 1..=5u32 {
            buf.mutate("k", move |_| Ok(StageDecision::Replace(i)))
                .await
                .unwrap();
        }
        buf.drain().await;
        let writes = sink.writes.lock().await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], ("k".to_string(), 5));
    }

    #[tokio::test]
    async fn noop_decision_does_not_schedule_a_write() {
        let sink = Arc::new(RecordingSink::new());
        let buf = WriteBackBuffer::with_window(sink.clone(), test_window());
        buf.mutate("k", |_| Ok(StageDecision::<u32>::Noop))
            .await
            .unwrap();
        tokio::time::sleep(test_window() * 2).await;
        assert!(sink.writes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn mutation_during_flush_is_applied_after_retry_window() {
        let sink = Arc::new(RecordingSink::new());
        let buf = WriteBackBuffer::with_window(sink.clone(), test_window());
        buf.mutate("k", |_| Ok(StageDecision::Replace(1))).await.unwrap();
        // Give the timer a moment to fire and enter Flushing before we mutate again.
        tokio::time::sleep(test_window() + Duration::from_millis(5)).await;
        buf.mutate("k", |_| Ok(StageDecision::Replace(2))).await.unwrap();
        buf.drain().await;
        let writes = sink.writes.lock().await;
        assert_eq!(writes.last().unwrap().1, 2);
    }

    #[tokio::test]
    async fn failed_write_is_retried() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_next.store(1, Ordering::SeqCst);
        let buf = WriteBackBuffer::with_window(sink.clone(), test_window());
        buf.mutate("k", |_| Ok(StageDecision::Replace(7))).await.unwrap();
        buf.drain().await;
        assert_eq!(*sink.writes.lock().await, vec![("k".to_string(), 7)]);
    }

    #[tokio::test]
    async fn error_from_callback_aborts_mutation() {
        let sink = Arc::new(RecordingSink::new());
        let buf = WriteBackBuffer::with_window(sink.clone(), test_window());
        let result = buf
            .mutate("k", |_| anyhow::bail!("duplicate id"))
            .await;
        assert!(result.is_err());
        tokio::time::sleep(test_window() * 2).await;
        assert!(sink.writes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn current_reflects_staged_value_before_flush() {
        let sink = Arc::new(RecordingSink::new());
        let buf = WriteBackBuffer::with_window(sink.clone(), test_window());
        buf.mutate("k", |_| Ok(StageDecision::Replace(42))).await.unwrap();
        assert_eq!(buf.current("k").await.unwrap(), Some(42));
    }
}
