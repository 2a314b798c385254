//! Per-key mutual exclusion
//!
//! Concurrent staple requests for the same storage key are serialized so only
//! the first one talks to the responder; the rest find its result in storage.
//! Locks for different keys never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A set of async mutexes, one per key, created on demand
///
/// An entry lives only while some task holds or waits for its lock.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    ///
    /// Dropping the returned future before it resolves still releases the
    /// entry if nobody else uses it.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        // Created before the wait: if this future is dropped mid-wait, the
        // pending acquisition goes first and this guard's drop cleans up
        let mut key_guard = KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: None,
        };

        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        key_guard.guard = Some(mutex.lock_owned().await);
        key_guard
    }

    /// Number of keys currently locked or awaited
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key, released on drop
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release before checking, so our own reference is gone
        self.guard.take();

        // Only the map's reference left: nobody holds or waits
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
