//! Broadcast fan-out of typed events with independent per-subscriber
//! buffering and a terminal sentinel.
//!
//! Each subscriber gets its own unbounded queue, so a slow subscriber never
//! blocks — or drops events for — a fast one. A channel with no subscribers
//! simply drops publishes; this is intentional: downstream restoration
//! reads the durable log directly rather than replaying from an in-memory
//! channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use tokio::sync::mpsc;

/// One item delivered to a subscriber: either a published value, or the
/// terminal sentinel.
#[derive(Debug, Clone)]
pub enum Delivered<T> {
    Value(T),
    EndOfStream,
}

struct Inner<T> {
    subscribers: StdMutex<Vec<mpsc::UnboundedSender<Delivered<T>>>>,
    last: StdMutex<Option<Delivered<T>>>,
    ended: AtomicBool,
}

/// Publisher / fan-out handle. Cheap to clone (wraps an `Arc`).
pub struct EventChannel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for EventChannel<T>
where
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventChannel<T>
where
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: StdMutex::new(Vec::new()),
                last: StdMutex::new(None),
                ended: AtomicBool::new(false),
            }),
        }
    }

    /// Publish a value to every subscriber attached at this point in time.
    /// A no-op (per spec) once [`end`](Self::end) has been called.
    pub fn publish(&self, value: T) {
        if self.inner.ended.load(Ordering::Acquire) {
            return;
        }
        let msg = Delivered::Value(value);
        *self.inner.last.lock().expect("EventChannel last-value poisoned") = Some(msg.clone());
        let mut subs = self
            .inner
            .subscribers
            .lock()
            .expect("EventChannel subscriber list poisoned");
        subs.retain(|tx| tx.send(msg.clone()).is_ok());
    }

    /// Publish the terminal sentinel. Idempotent: the first call wins, later
    /// calls (and later `publish`s) are ignored.
    pub fn end(&self) {
        if self.inner.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.inner.last.lock().expect("EventChannel last-value poisoned") =
            Some(Delivered::EndOfStream);
        let mut subs = self
            .inner
            .subscribers
            .lock()
            .expect("EventChannel subscriber list poisoned");
        for tx in subs.drain(..) {
            let _ = tx.send(Delivered::EndOfStream);
        }
    }

    pub fn has_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    /// Attach a subscriber that receives only publishes made from this point
    /// forward (pure fan-out — no replay).
    pub fn subscribe(&self) -> EventSubscriber<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .expect("EventChannel subscriber list poisoned")
            .push(tx);
        EventSubscriber { rx }
    }

    /// Attach a subscriber that immediately receives the most-recently
    /// published value (if any) as its first item, then streams onward.
    /// Used by a reconnecting consumer that wants at least a snapshot
    /// without re-reading the durable log.
    pub fn subscribe_with_latest(&self) -> EventSubscriber<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let last = self
            .inner
            .last
            .lock()
            .expect("EventChannel last-value poisoned")
            .clone();
        if let Some(msg) = last {
            let _ = tx.send(msg);
        }
        // Only register for future publishes if the stream has not already
        // ended — an ended channel's only event was the sentinel just sent.
        if !self.inner.ended.load(Ordering::Acquire) {
            self.inner
                .subscribers
                .lock()
                .expect("EventChannel subscriber list poisoned")
                .push(tx);
        }
        EventSubscriber { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .expect("EventChannel subscriber list poisoned")
            .len()
    }
}

/// A single subscriber's independent receive cursor.
pub struct EventSubscriber<T> {
    rx: mpsc::UnboundedReceiver<Delivered<T>>,
}

impl<T> EventSubscriber<T> {
    pub async fn recv(&mut self) -> Option<Delivered<T>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Delivered<T>, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}
