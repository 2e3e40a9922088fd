//! Bounded FIFO of keys awaiting a flush, with per-key slot tracking.
//!
//! Capacity bounds the number of *distinct* keys holding a slot, not the
//! number of writes: a key that is queued or being flushed already owns a
//! slot, and further writes to it coalesce onto that slot. A key keeps its
//! slot until its pending page is persisted, including across failed
//! flushes, so every pending page is accounted for. A key only takes the
//! synchronous path when it holds no slot and none is free, so a synchronous
//! write never overlaps an asynchronous flush of the same key. At most one
//! synchronous write per key is in flight.
//!
//! Like [`PendingTable`](super::pending::PendingTable), the queue is plain
//! data guarded by the façade's state mutex.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use pagestore_core::PageKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Holds a slot and sits in the FIFO.
    Queued,
    /// Holds a slot; a worker is persisting it. `removals` counts removals
    /// the worker still has to repeat once its persist has landed. While it
    /// is non-zero the key reads as absent.
    Flushing { removals: u32 },
    /// A caller is persisting the key synchronously. Holds a slot only if
    /// `deferred`, i.e. a later write is waiting to be queued once the
    /// synchronous write is done.
    Blocking { deferred: bool },
}

/// Outcome of [`TaskQueue::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was reserved and the key appended; wake a worker.
    Enqueued,
    /// A slot was reserved behind a running synchronous write of the same key.
    Deferred,
    /// The key already holds a slot; the newer page rides on it.
    Coalesced,
    /// No slot available. The caller is registered as the key's synchronous
    /// writer and must call [`TaskQueue::end_blocking`] when done.
    Full,
    /// No slot available and another synchronous write of the key is in
    /// flight. Retry once it has ended.
    Busy,
}

/// Bounded queue of keys awaiting a flush.
#[derive(Debug)]
pub struct TaskQueue {
    capacity: usize,
    order: VecDeque<PageKey>,
    slots: HashMap<PageKey, Slot>,
    occupied: usize,
    closed: bool,
}

impl TaskQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            slots: HashMap::with_capacity(capacity),
            occupied: 0,
            closed: false,
        }
    }

    fn has_room(&self) -> bool {
        !self.closed && self.occupied < self.capacity
    }

    /// Decides how a write to `key` proceeds. Check and reservation happen
    /// together, so the queue can never exceed its capacity.
    pub fn admit(&mut self, key: &PageKey) -> Admission {
        let has_room = self.has_room();
        match self.slots.get_mut(key) {
            Some(Slot::Queued | Slot::Flushing { .. } | Slot::Blocking { deferred: true }) => {
                Admission::Coalesced
            }
            Some(Slot::Blocking { deferred }) => {
                if has_room {
                    *deferred = true;
                    self.occupied += 1;
                    Admission::Deferred
                } else {
                    Admission::Busy
                }
            }
            None => {
                if has_room {
                    self.occupied += 1;
                    self.order.push_back(key.clone());
                    self.slots.insert(key.clone(), Slot::Queued);
                    Admission::Enqueued
                } else {
                    self.slots
                        .insert(key.clone(), Slot::Blocking { deferred: false });
                    Admission::Full
                }
            }
        }
    }

    /// Registers a synchronous writer for a key that holds no slot.
    ///
    /// Used by shutdown's drain, which persists pages outside the FIFO.
    /// Returns `false` if the key already has a slot or a writer.
    pub fn begin_blocking(&mut self, key: &PageKey) -> bool {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Blocking { deferred: false });
                true
            }
        }
    }

    /// Unregisters the synchronous writer of `key`.
    ///
    /// If a deferred write is waiting, the key moves to the FIFO and `true`
    /// is returned. Once the queue is closed the deferred slot is released
    /// instead and the page is left to the drain.
    pub fn end_blocking(&mut self, key: &PageKey) -> bool {
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        let Slot::Blocking { deferred } = *slot else {
            return false;
        };
        if !deferred {
            self.slots.remove(key);
            return false;
        }
        if self.closed {
            self.slots.remove(key);
            self.occupied -= 1;
            return false;
        }
        *slot = Slot::Queued;
        self.order.push_back(key.clone());
        true
    }

    /// Returns `true` while a synchronous write of `key` is in flight.
    #[must_use]
    pub fn is_blocking(&self, key: &PageKey) -> bool {
        matches!(self.slots.get(key), Some(Slot::Blocking { .. }))
    }

    /// Takes the oldest queued key and marks it as being flushed.
    pub fn pop(&mut self) -> Option<PageKey> {
        while let Some(key) = self.order.pop_front() {
            if let Some(slot) = self.slots.get_mut(&key) {
                if *slot == Slot::Queued {
                    *slot = Slot::Flushing { removals: 0 };
                    return Some(key);
                }
            }
        }
        None
    }

    /// Records that `key` was removed while a worker may be persisting it.
    pub fn mark_removed(&mut self, key: &PageKey) {
        if let Some(Slot::Flushing { removals }) = self.slots.get_mut(key) {
            *removals += 1;
        }
    }

    /// [`mark_removed`](Self::mark_removed) for every flushing key of a session.
    pub fn mark_session_removed(&mut self, session_id: &str) -> usize {
        let mut marked = 0;
        for (key, slot) in &mut self.slots {
            if let Slot::Flushing { removals } = slot {
                if key.is_owned_by(session_id) {
                    *removals += 1;
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Removals the flushing worker of `key` still has to repeat.
    #[must_use]
    pub fn removals(&self, key: &PageKey) -> u32 {
        match self.slots.get(key) {
            Some(Slot::Flushing { removals }) => *removals,
            _ => 0,
        }
    }

    /// Returns `true` if `key` was removed and the removal has not yet been
    /// repeated after an in-flight persist.
    #[must_use]
    pub fn is_removed(&self, key: &PageKey) -> bool {
        self.removals(key) > 0
    }

    /// Marks `count` repeated removals of `key` as done.
    pub fn settle_removals(&mut self, key: &PageKey, count: u32) {
        if let Some(Slot::Flushing { removals }) = self.slots.get_mut(key) {
            *removals = removals.saturating_sub(count);
        }
    }

    /// Ends the flush of `key`. With `requeue` the key keeps its slot and goes
    /// to the back of the FIFO; otherwise the slot is released.
    ///
    /// Returns `true` if the key was requeued.
    pub fn finish(&mut self, key: &PageKey, requeue: bool) -> bool {
        debug_assert!(
            matches!(self.slots.get(key), Some(Slot::Flushing { removals: 0 })),
            "finish called for {key} which is not flushing or has removals left"
        );
        if requeue {
            self.slots.insert(key.clone(), Slot::Queued);
            self.order.push_back(key.clone());
            true
        } else {
            if self.slots.remove(key).is_some() {
                self.occupied -= 1;
            }
            false
        }
    }

    /// Stops handing out new slots. Coalescing onto existing slots continues.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Releases every slot not held by a synchronous writer. Workers must be
    /// stopped. Returns how many slots were released.
    pub fn release_idle(&mut self) -> usize {
        self.order.clear();
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| matches!(slot, Slot::Blocking { .. }));
        let released = before - self.slots.len();
        self.occupied -= released;
        released
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Distinct keys currently holding a slot.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Keys waiting in the FIFO.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.order.len()
    }

    /// Keys with a synchronous write in flight.
    #[must_use]
    pub fn blocking(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Blocking { .. }))
            .count()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    fn key(page: u32) -> PageKey {
        PageKey::new("s", page)
    }

    #[test]
    fn admits_until_capacity_then_reports_full() {
        let mut queue = TaskQueue::new(2);
        assert_eq!(queue.admit(&key(1)), Admission::Enqueued);
        assert_eq!(queue.admit(&key(2)), Admission::Enqueued);
        assert_eq!(queue.admit(&key(3)), Admission::Full);
        assert_eq!(queue.occupied(), 2);
        assert_eq!(queue.queued(), 2);
        assert_eq!(queue.blocking(), 1);
    }

    #[test]
    fn repeated_key_coalesces_even_when_full() {
        let mut queue = TaskQueue::new(1);
        assert_eq!(queue.admit(&key(1)), Admission::Enqueued);
        assert_eq!(queue.admit(&key(1)), Admission::Coalesced);
        assert_eq!(queue.queued(), 1);

        assert_eq!(queue.pop(), Some(key(1)));
        // Flushing keys keep their slot, so a new write still coalesces.
        assert_eq!(queue.admit(&key(1)), Admission::Coalesced);
        assert_eq!(queue.queued(), 0);
        assert_eq!(queue.occupied(), 1);
    }

    #[test]
    fn pop_is_fifo() {
        let mut queue = TaskQueue::new(3);
        queue.admit(&key(3));
        queue.admit(&key(1));
        queue.admit(&key(2));
        assert_eq!(queue.pop(), Some(key(3)));
        assert_eq!(queue.pop(), Some(key(1)));
        assert_eq!(queue.pop(), Some(key(2)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn finish_releases_or_requeues() {
        let mut queue = TaskQueue::new(1);
        queue.admit(&key(1));
        let popped = queue.pop().unwrap();

        assert!(queue.finish(&popped, true));
        assert_eq!(queue.occupied(), 1);
        assert_eq!(queue.pop(), Some(key(1)));

        assert!(!queue.finish(&key(1), false));
        assert_eq!(queue.occupied(), 0);
        assert_eq!(queue.admit(&key(2)), Admission::Enqueued);
    }

    #[test]
    fn write_behind_a_synchronous_writer_is_deferred() {
        let mut queue = TaskQueue::new(1);
        queue.admit(&key(9));
        assert_eq!(queue.admit(&key(1)), Admission::Full);

        // Free the only slot, then write key 1 again while its sync write runs.
        let popped = queue.pop().unwrap();
        queue.finish(&popped, false);
        assert_eq!(queue.admit(&key(1)), Admission::Deferred);
        assert_eq!(queue.admit(&key(1)), Admission::Coalesced);
        assert_eq!(queue.pop(), None, "deferred key must wait for the sync writer");

        assert!(queue.end_blocking(&key(1)));
        assert_eq!(queue.pop(), Some(key(1)));
    }

    #[test]
    fn second_synchronous_writer_of_a_key_is_busy() {
        let mut queue = TaskQueue::new(1);
        queue.admit(&key(9));
        assert_eq!(queue.admit(&key(1)), Admission::Full);
        assert_eq!(queue.admit(&key(1)), Admission::Busy);
        assert!(queue.is_blocking(&key(1)));

        assert!(!queue.end_blocking(&key(1)));
        assert!(!queue.is_blocking(&key(1)));
        assert_eq!(queue.admit(&key(1)), Admission::Full);
        assert_eq!(queue.occupied(), 1);
    }

    #[test]
    fn removals_are_counted_and_settled() {
        let mut queue = TaskQueue::new(1);
        queue.admit(&key(1));
        queue.mark_removed(&key(1));
        assert!(!queue.is_removed(&key(1)), "queued keys are not flushing");

        queue.pop();
        queue.mark_removed(&key(1));
        queue.mark_removed(&key(1));
        assert_eq!(queue.removals(&key(1)), 2);

        queue.settle_removals(&key(1), 1);
        assert!(queue.is_removed(&key(1)));
        queue.settle_removals(&key(1), 1);
        assert!(!queue.is_removed(&key(1)));
    }

    #[test]
    fn session_removal_marks_only_flushing_keys_of_that_session() {
        let mut queue = TaskQueue::new(3);
        queue.admit(&PageKey::new("a", 1));
        queue.admit(&PageKey::new("b", 1));
        queue.admit(&PageKey::new("a", 2));
        queue.pop();
        queue.pop();

        assert_eq!(queue.mark_session_removed("a"), 1);
        assert!(queue.is_removed(&PageKey::new("a", 1)));
        assert!(!queue.is_removed(&PageKey::new("b", 1)));
        assert!(!queue.is_removed(&PageKey::new("a", 2)));
    }

    #[test]
    fn close_stops_new_slots_and_release_keeps_sync_writers() {
        let mut queue = TaskQueue::new(4);
        queue.admit(&key(1));
        queue.admit(&key(2));
        queue.pop();
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.admit(&key(3)), Admission::Full);
        assert_eq!(queue.admit(&key(2)), Admission::Coalesced);

        assert_eq!(queue.release_idle(), 2);
        assert_eq!(queue.occupied(), 0);
        assert_eq!(queue.queued(), 0);
        assert!(queue.is_blocking(&key(3)));
        assert!(!queue.begin_blocking(&key(3)));
        assert!(queue.begin_blocking(&key(1)));
    }

    #[test]
    fn deferred_slot_is_released_when_closed() {
        let mut queue = TaskQueue::new(1);
        assert!(queue.begin_blocking(&key(1)));
        assert_eq!(queue.admit(&key(1)), Admission::Deferred);
        queue.close();

        assert!(!queue.end_blocking(&key(1)));
        assert_eq!(queue.occupied(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Admit(u32),
        Pop,
        Finish(bool),
        EndBlocking,
        MarkRemoved(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..6).prop_map(Op::Admit),
            Just(Op::Pop),
            any::<bool>().prop_map(Op::Finish),
            Just(Op::EndBlocking),
            (0u32..6).prop_map(Op::MarkRemoved),
        ]
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity_and_never_duplicates(
            capacity in 1usize..5,
            ops in proptest::collection::vec(op_strategy(), 0..200),
        ) {
            let mut queue = TaskQueue::new(capacity);
            let mut flushing: Vec<PageKey> = Vec::new();
            let mut blocking: Vec<PageKey> = Vec::new();

            for op in ops {
                match op {
                    Op::Admit(page) => {
                        if queue.admit(&key(page)) == Admission::Full {
                            blocking.push(key(page));
                        }
                    }
                    Op::Pop => {
                        if let Some(popped) = queue.pop() {
                            flushing.push(popped);
                        }
                    }
                    Op::Finish(requeue) => {
                        if let Some(done) = flushing.pop() {
                            let removals = queue.removals(&done);
                            queue.settle_removals(&done, removals);
                            queue.finish(&done, requeue);
                        }
                    }
                    Op::EndBlocking => {
                        if let Some(done) = blocking.pop() {
                            queue.end_blocking(&done);
                        }
                    }
                    Op::MarkRemoved(page) => queue.mark_removed(&key(page)),
                }

                prop_assert!(queue.occupied() <= queue.capacity());
                prop_assert!(queue.queued() <= queue.occupied());
                prop_assert_eq!(queue.blocking(), blocking.len());
                let distinct: HashSet<&PageKey> = queue.order.iter().collect();
                prop_assert_eq!(distinct.len(), queue.order.len());
            }
        }
    }
}
