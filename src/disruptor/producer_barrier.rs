//! Producer side of the ring buffer: claim with backpressure, then commit.

use std::fmt;
use std::ops::{ Deref, DerefMut };
use std::sync::atomic::{ fence, AtomicBool, Ordering };
use std::sync::Arc;

use crossbeam::utils::Backoff;

use crate::disruptor::sequence::minimum_sequence;
use crate::disruptor::{ Entry, RingBuffer, Sequence };
use crate::error::{ Result, RingError };

/// Claims entries for producers while tracking the consumers they must not overtake.
///
/// Any number of threads may share one barrier (or use several barriers on the
/// same ring): sequence assignment goes through the ring's shared claim
/// counter, and commits are applied to the cursor strictly in sequence order.
///
/// On top of the consumers it was created with, the barrier gates on every
/// `BatchConsumer` registered with the ring.
pub struct ProducerBarrier<T: Entry> {
    ring: Arc<RingBuffer<T>>,
    gating: Vec<Arc<Sequence>>,
    alerted: AtomicBool,
}

impl<T: Entry> ProducerBarrier<T> {
    pub(crate) fn new(ring: Arc<RingBuffer<T>>, gating: Vec<Arc<Sequence>>) -> Self {
        Self {
            ring,
            gating,
            alerted: AtomicBool::new(false),
        }
    }

    /// Claim the next entry in sequence, waiting for gating consumers if the
    /// ring is full.
    ///
    /// # Errors
    ///
    /// `RingError::Alerted` if the barrier is alerted before a slot frees up.
    /// Nothing is claimed in that case.
    pub fn next_entry(&self) -> Result<ClaimedEntry<'_, T>> {
        let backoff = Backoff::new();
        let mut reported = false;
        loop {
            self.check_alert()?;

            if let Some(sequence) = self.try_claim() {
                return Ok(self.claimed(sequence));
            }

            if !reported && backoff.is_completed() {
                reported = true;
                tracing::trace!(
                    claimed = self.ring.claim_sequence().get(),
                    gating = self.gating_minimum(i64::MAX),
                    "producer waiting on gating consumers"
                );
            }
            backoff.snooze();
        }
    }

    /// Claim the next entry only if it is free right now.
    ///
    /// # Errors
    ///
    /// `RingError::InsufficientCapacity` if a gating consumer still holds the
    /// slot, `RingError::Alerted` if the barrier is alerted.
    pub fn try_next_entry(&self) -> Result<ClaimedEntry<'_, T>> {
        self.check_alert()?;
        match self.try_claim() {
            Some(sequence) => Ok(self.claimed(sequence)),
            None => Err(RingError::InsufficientCapacity),
        }
    }

    /// Commit an entry back to the ring buffer to make it visible to consumers.
    ///
    /// Entries must be committed in the order they were claimed; a commit
    /// waits until every earlier sequence has been published.
    ///
    /// If the barrier is alerted while that wait is still pending, the commit
    /// gives up and the sequence stays unpublished. Later sequences then never
    /// become visible, so alerting is only a way to unwind producer threads at
    /// shutdown.
    pub fn commit(&self, entry: ClaimedEntry<'_, T>) {
        debug_assert!(Arc::ptr_eq(&entry.barrier.ring, &self.ring), "entry claimed on another ring");
        entry.commit();
    }

    /// Value of the cursor for entries that have been published
    #[inline]
    pub fn cursor(&self) -> i64 {
        self.ring.cursor()
    }

    /// Slots that can be claimed before the slowest gating consumer blocks us
    pub fn remaining_capacity(&self) -> i64 {
        let claimed = self.ring.claim_sequence().get();
        let consumed = self.gating_minimum(claimed);
        (self.ring.capacity() as i64) - (claimed - consumed)
    }

    pub fn ring_buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }

    /// Abort any `next_entry` currently waiting and fail future claims
    pub fn signal_shutdown(&self) {
        tracing::debug!("producer barrier alerted");
        self.alerted.store(true, Ordering::Release);
    }

    /// Same as `signal_shutdown`
    #[inline]
    pub fn alert(&self) {
        self.signal_shutdown();
    }

    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn check_alert(&self) -> Result<()> {
        if self.is_alerted() { Err(RingError::Alerted) } else { Ok(()) }
    }

    /// Slowest of our own gating consumers and the ring's registered readers
    #[inline]
    fn gating_minimum(&self, default: i64) -> i64 {
        minimum_sequence(&self.gating, default).min(self.ring.readers().minimum())
    }

    /// CAS the shared claim counter forward if the next slot is free.
    #[inline]
    fn try_claim(&self) -> Option<i64> {
        let claim = self.ring.claim_sequence();
        let readers = self.ring.readers();
        let capacity = self.ring.capacity() as i64;

        loop {
            let generation = readers.generation();
            let current = claim.get();
            let next = current + 1;

            let consumed = self.gating_minimum(current);
            if next - consumed > capacity {
                return None;
            }

            if claim.compare_and_set(current, next) {
                // Pairs with the fence in `ReaderSlot::register`.
                fence(Ordering::SeqCst);
                if readers.generation() != generation {
                    self.wait_for_new_readers(next);
                }
                return Some(next);
            }
            std::hint::spin_loop();
        }
    }

    /// A batch consumer registered after the capacity check. `next` is already
    /// ours, so wait for the newcomer to clear the slot instead of failing.
    #[cold]
    fn wait_for_new_readers(&self, next: i64) {
        let readers = self.ring.readers();
        let capacity = self.ring.capacity() as i64;
        let backoff = Backoff::new();
        while next - readers.minimum() > capacity {
            backoff.snooze();
        }
    }

    fn claimed(&self, sequence: i64) -> ClaimedEntry<'_, T> {
        // SAFETY: the CAS in `try_claim` handed `sequence` to this caller
        // alone, and the gating check guarantees every consumer has moved past
        // the previous occupant of the slot.
        let entry = unsafe { self.ring.get_entry_mut(sequence) };
        ClaimedEntry {
            barrier: self,
            sequence,
            entry,
            committed: false,
        }
    }

    /// Publish `sequence` once every earlier sequence is visible.
    fn publish(&self, sequence: i64) {
        let predecessor = sequence - 1;
        let backoff = Backoff::new();
        while self.ring.cursor() != predecessor {
            if self.is_alerted() {
                tracing::warn!(
                    sequence,
                    cursor = self.ring.cursor(),
                    "producer barrier alerted before predecessor was published, sequence not published"
                );
                return;
            }
            backoff.snooze();
        }
        self.ring.publish(sequence);
    }
}

impl<T: Entry> fmt::Debug for ProducerBarrier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerBarrier")
            .field("cursor", &self.cursor())
            .field("gating", &self.gating)
            .field("alerted", &self.is_alerted())
            .finish()
    }
}

/// Exclusive access to one claimed slot until it is committed.
///
/// Dereferences to the slot so it can be mutated in place. Dropping the guard
/// without committing still publishes the slot: a claimed sequence that is
/// never published would stall every later commit.
pub struct ClaimedEntry<'a, T: Entry> {
    barrier: &'a ProducerBarrier<T>,
    sequence: i64,
    entry: &'a mut T,
    committed: bool,
}

impl<'a, T: Entry> ClaimedEntry<'a, T> {
    /// Sequence this entry was claimed for
    #[inline]
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Publish this entry to consumers
    pub fn commit(mut self) {
        self.committed = true;
        self.barrier.publish(self.sequence);
    }
}

impl<'a, T: Entry> Deref for ClaimedEntry<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.entry
    }
}

impl<'a, T: Entry> DerefMut for ClaimedEntry<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.entry
    }
}

impl<'a, T: Entry> Drop for ClaimedEntry<'a, T> {
    fn drop(&mut self) {
        if !self.committed {
            tracing::warn!(sequence = self.sequence, "claimed entry dropped without commit, publishing it");
            self.barrier.publish(self.sequence);
        }
    }
}
