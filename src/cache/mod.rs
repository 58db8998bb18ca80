//! In-memory cache of identity documents keyed by registration entry.
//!
//! Each key maps to a queue of documents in intended expiration order. The
//! head of the queue is the document in force; rotation pushes the successor
//! to the back and later pops the head.

mod entry;

pub use entry::{CacheEntry, EntryKey, RegistrationEntry};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::prelude::{debug, warn};

type Queues = HashMap<EntryKey, VecDeque<Arc<CacheEntry>>>;

/// Thread-safe identity cache.
///
/// Every operation holds one lock over the whole map for its duration. No
/// operation performs I/O or awaits while holding it.
#[derive(Debug, Default)]
pub struct IdentityCache {
    queues: Mutex<Queues>,
}

impl IdentityCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    // The map is left consistent by every critical section, so a poisoned
    // lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the in-force document for `entry`, or `None` on a miss.
    pub fn entry(&self, entry: &RegistrationEntry) -> Option<Arc<CacheEntry>> {
        let key = entry.derive_key();
        self.lock().get(&key).and_then(|q| q.front().cloned())
    }

    /// Appends `entry` behind any documents already queued for its descriptor.
    ///
    /// Callers are trusted to append in expiration order. A document expiring
    /// before the current tail is still appended, with a warning.
    pub fn set_entry(&self, entry: CacheEntry) {
        let key = entry.registration_entry().derive_key();
        let spiffe_id = entry.registration_entry().spiffe_id.clone();
        let mut queues = self.lock();
        let queue = queues.entry(key).or_default();

        if let Some(tail) = queue.back() {
            if entry.not_after() < tail.not_after() {
                warn!(
                    "Cache entry expires before its predecessor; keeping insertion order: spiffe_id={spiffe_id}"
                );
            }
        }

        queue.push_back(Arc::new(entry));
        debug!(
            "Cache entry queued: spiffe_id={spiffe_id}, depth={}",
            queue.len()
        );
    }

    /// Drops every document for `entry`; returns how many were removed.
    pub fn delete_entries(&self, entry: &RegistrationEntry) -> usize {
        let key = entry.derive_key();
        let removed = self.lock().remove(&key).map_or(0, |q| q.len());
        if removed > 0 {
            debug!(
                "Cache entries removed: spiffe_id={}, count={removed}",
                entry.spiffe_id
            );
        }
        removed
    }

    /// Pops the in-force document for `entry`, promoting its successor.
    ///
    /// Returns `false` if nothing was cached for the descriptor.
    pub fn delete_entry(&self, entry: &RegistrationEntry) -> bool {
        let key = entry.derive_key();
        let mut queues = self.lock();
        let Some(queue) = queues.get_mut(&key) else {
            return false;
        };
        let popped = queue.pop_front().is_some();
        if queue.is_empty() {
            queues.remove(&key);
        }
        popped
    }

    /// Returns a snapshot of every descriptor's in-force document.
    ///
    /// The snapshot is taken under the lock and is unaffected by later writes.
    pub fn entries(&self) -> Entries {
        let snapshot: Vec<_> = self
            .lock()
            .values()
            .filter_map(|q| q.front().cloned())
            .collect();
        Entries(snapshot.into_iter())
    }

    /// Returns `true` if no document is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// One-shot iterator over an [`IdentityCache::entries`] snapshot.
#[derive(Debug)]
pub struct Entries(std::vec::IntoIter<Arc<CacheEntry>>);

impl Iterator for Entries {
    type Item = Arc<CacheEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl ExactSizeIterator for Entries {}
