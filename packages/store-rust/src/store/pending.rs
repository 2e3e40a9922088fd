//! Pages accepted on the asynchronous path but not yet persisted.
//!
//! [`PendingTable`] serves reads of unflushed writes and lets repeated writes
//! to one key collapse into the newest page. Each `put` stamps the entry with
//! a fresh generation; a worker that finished flushing a page only discards
//! the entry if its generation is unchanged, so a newer page written while
//! the flush was running survives.
//!
//! The table is not synchronised on its own: the store façade keeps it under
//! the same mutex as the task queue so admission and flush bookkeeping are
//! single critical sections.

use std::collections::HashMap;
use std::sync::Arc;

use pagestore_core::PageKey;

/// Generation stamp of a pending entry. Strictly increasing per table.
pub type Generation = u64;

/// A pending page together with the stamp it was written under.
#[derive(Debug)]
pub struct PendingSnapshot<P> {
    pub page: Arc<P>,
    pub generation: Generation,
}

struct PendingEntry<P> {
    page: Arc<P>,
    generation: Generation,
    /// Consecutive failed flushes of this generation.
    failures: u32,
}

/// Map of key to the newest not-yet-persisted page.
pub struct PendingTable<P> {
    entries: HashMap<PageKey, PendingEntry<P>>,
    next_generation: Generation,
}

impl<P> PendingTable<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Inserts or replaces the page for `key`. The newest write always wins.
    pub fn put(&mut self, key: PageKey, page: Arc<P>) -> Generation {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.entries.insert(
            key,
            PendingEntry {
                page,
                generation,
                failures: 0,
            },
        );
        generation
    }

    /// Returns the pending page for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &PageKey) -> Option<Arc<P>> {
        self.entries.get(key).map(|entry| Arc::clone(&entry.page))
    }

    /// Returns the pending page for `key` with its generation.
    #[must_use]
    pub fn snapshot(&self, key: &PageKey) -> Option<PendingSnapshot<P>> {
        self.entries.get(key).map(|entry| PendingSnapshot {
            page: Arc::clone(&entry.page),
            generation: entry.generation,
        })
    }

    /// Removes the entry only if it still carries `generation`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_if_unchanged(&mut self, key: &PageKey, generation: Generation) -> bool {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            self.entries.remove(key);
            true
        } else {
            false
        }
    }

    /// Counts a failed flush against the entry if it still carries
    /// `generation`, returning the new consecutive failure count.
    pub fn record_failure(&mut self, key: &PageKey, generation: Generation) -> Option<u32> {
        let entry = self.entries.get_mut(key)?;
        if entry.generation != generation {
            return None;
        }
        entry.failures = entry.failures.saturating_add(1);
        Some(entry.failures)
    }

    /// Unconditionally removes the entry for `key`.
    pub fn remove(&mut self, key: &PageKey) -> Option<Arc<P>> {
        self.entries.remove(key).map(|entry| entry.page)
    }

    /// Removes every entry owned by `session_id`, returning their keys.
    pub fn remove_session(&mut self, session_id: &str) -> Vec<PageKey> {
        let keys: Vec<PageKey> = self
            .entries
            .keys()
            .filter(|key| key.is_owned_by(session_id))
            .cloned()
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys
    }

    #[must_use]
    pub fn contains(&self, key: &PageKey) -> bool {
        self.entries.contains_key(key)
    }

    /// All keys with a pending page, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<PageKey> {
        self.entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P> Default for PendingTable<P> {
    fn default() -> Self {
        Self::new()
    }
}
