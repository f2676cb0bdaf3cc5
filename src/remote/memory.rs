//! In-process document store.
//!
//! Behaves like a hosted document store: every write is broadcast to every
//! subscriber, the writer's own subscription included. It can be switched
//! offline to exercise the degraded paths.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use tokio::sync::mpsc;

use super::{RemoteDocument, RemoteMirror, Subscription};
use crate::error::{Error, Result};
use crate::models::Snapshot;

type Subscribers = Mutex<Vec<(u64, mpsc::UnboundedSender<RemoteDocument>)>>;

#[derive(Default)]
pub struct MemoryMirror {
    document: Mutex<Option<RemoteDocument>>,
    subscribers: Arc<Subscribers>,
    next_subscriber: AtomicU64,
    offline: AtomicBool,
    writes: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes its subscriber when dropped.
struct Unsubscribe {
    subscribers: Weak<Subscribers>,
    id: u64,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock(&subscribers).retain(|(id, _)| *id != self.id);
        }
    }
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the store with `document` already present.
    pub fn with_document(document: RemoteDocument) -> Self {
        let mirror = Self::default();
        *lock(&mirror.document) = Some(document);
        mirror
    }

    /// Makes every call fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current document, as another client would read it.
    pub fn document(&self) -> Option<RemoteDocument> {
        lock(&self.document).clone()
    }

    /// Replaces the document as another client would, notifying subscribers.
    pub fn publish(&self, document: RemoteDocument) {
        *lock(&self.document) = Some(document.clone());
        lock(&self.subscribers).retain(|(_, tx)| tx.send(document.clone()).is_ok());
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Remote("memory mirror is offline".to_string()));
        }
        Ok(())
    }
}

impl RemoteMirror for MemoryMirror {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn read_snapshot(&self) -> Result<Option<RemoteDocument>> {
        self.check_online()?;
        Ok(self.document())
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.check_online()?;
        self.publish(RemoteDocument::from_snapshot(snapshot, Utc::now()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, changes: mpsc::UnboundedSender<RemoteDocument>) -> Result<Subscription> {
        self.check_online()?;
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        lock(&self.subscribers).push((id, changes));
        Ok(Subscription::new(Unsubscribe {
            subscribers: Arc::downgrade(&self.subscribers),
            id,
        }))
    }
}
