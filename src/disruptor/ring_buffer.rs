//! RingBuffer - pre-allocated slot arena shared by producers and consumers
//!
//! The buffer owns the slots, the published `cursor`, the `claim` counter
//! every producer barrier serializes through and the registry of batch
//! consumer positions every producer barrier gates on. It never copies
//! or reallocates a slot; producers mutate slots in place through a
//! `ClaimedEntry` and consumers read them by reference.
//!
//! ## Memory ordering
//!
//! - Producer: CAS `claim` (AcqRel) → write slot → wait for `cursor == seq - 1`
//!   → store `cursor = seq` (Release) → signal the wait strategy.
//! - Consumer: load `cursor` (Acquire) → read slots up to it → store own
//!   progress sequence (Release).
//! - Producer gating: load consumer progress (Acquire) before reusing a slot.
//!   Gating covers the producer's own consumers plus every registered
//!   `BatchConsumer` (see `readers`).

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;

use crate::constants::DEFAULT_MAX_CONSUMERS;
use crate::disruptor::readers::ReaderRegistry;
use crate::disruptor::{
    Consumer,
    ConsumerBarrier,
    Entry,
    EntryFactory,
    ProducerBarrier,
    RingBufferConfig,
    Sequence,
    WaitStrategy,
};
use crate::error::{ Result, RingError };

/// Fixed-capacity ring of reusable entries
pub struct RingBuffer<T: Entry> {
    slots: Box<[UnsafeCell<T>]>,
    /// Mask for fast index calculation
    mask: usize,
    /// Last published sequence
    cursor: Arc<Sequence>,
    /// Last claimed sequence, shared by all producer barriers
    claim: Sequence,
    /// Progress of every batch consumer reading from this ring
    readers: ReaderRegistry,
    wait_strategy: Arc<dyn WaitStrategy>,
}

// Safety: slot access is coordinated by the claim/commit protocol. A slot is
// mutated only through the single `ClaimedEntry` that owns its sequence, and
// only read after the cursor published it.
unsafe impl<T: Entry> Send for RingBuffer<T> {}
unsafe impl<T: Entry> Sync for RingBuffer<T> {}

impl<T: Entry> RingBuffer<T> {
    /// Create a ring buffer with `capacity` slots using the default configuration.
    ///
    /// # Errors
    ///
    /// `RingError::InvalidConfig` if `capacity` is zero, not a power of two,
    /// or above `MAX_RING_BUFFER_SIZE`.
    pub fn new<F: EntryFactory<T>>(factory: F, capacity: usize) -> Result<Arc<Self>> {
        Self::with_config(factory, RingBufferConfig::new(capacity)?)
    }

    /// Create a ring buffer from a full configuration
    pub fn with_config<F: EntryFactory<T>>(factory: F, config: RingBufferConfig) -> Result<Arc<Self>> {
        let wait_strategy = config.build_wait_strategy();
        Self::build(factory, config.size, config.max_consumers, wait_strategy)
    }

    /// Create a ring buffer using a caller-provided wait strategy
    pub fn with_wait_strategy<F: EntryFactory<T>>(
        factory: F,
        capacity: usize,
        wait_strategy: Arc<dyn WaitStrategy>
    ) -> Result<Arc<Self>> {
        Self::build(factory, capacity, DEFAULT_MAX_CONSUMERS, wait_strategy)
    }

    fn build<F: EntryFactory<T>>(
        factory: F,
        capacity: usize,
        max_consumers: usize,
        wait_strategy: Arc<dyn WaitStrategy>
    ) -> Result<Arc<Self>> {
        // `RingBufferConfig` fields are public, so re-validate here.
        let size = RingBufferConfig::new(capacity)?.size;
        if max_consumers == 0 {
            return Err(RingError::config("Ring buffer must allow at least one consumer"));
        }

        let slots = (0..size)
            .map(|_| UnsafeCell::new(factory.create()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        tracing::debug!(capacity = size, max_consumers, strategy = ?wait_strategy, "ring buffer created");

        Ok(
            Arc::new(Self {
                slots,
                mask: size - 1,
                cursor: Arc::new(Sequence::default()),
                claim: Sequence::default(),
                readers: ReaderRegistry::new(max_consumers),
                wait_strategy,
            })
        )
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Last published sequence, or `INITIAL_CURSOR_VALUE` if nothing was committed
    #[inline(always)]
    pub fn cursor(&self) -> i64 {
        self.cursor.get()
    }

    /// The published cursor as a shareable sequence
    pub fn cursor_sequence(&self) -> Arc<Sequence> {
        self.cursor.clone()
    }

    #[inline(always)]
    pub(crate) fn cursor_ref(&self) -> &Sequence {
        &self.cursor
    }

    pub fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
        &self.wait_strategy
    }

    #[inline(always)]
    fn index(&self, sequence: i64) -> usize {
        (sequence as usize) & self.mask
    }

    /// Entry at `sequence & (capacity - 1)`.
    ///
    /// # Safety
    ///
    /// - `sequence` must have been published (`sequence <= cursor()`), and
    /// - no producer may reclaim its slot while the reference lives, i.e. the
    ///   reader's progress sequence gates every producer barrier on this ring
    ///   and has not moved past `sequence`. `BatchConsumer` gets this through
    ///   the ring's reader registry; manual readers must arrange it through
    ///   the gating lists of every producer barrier.
    #[inline(always)]
    pub unsafe fn get_entry(&self, sequence: i64) -> &T {
        &*self.slots[self.index(sequence)].get()
    }

    /// Mutable entry at `sequence & (capacity - 1)`.
    ///
    /// # Safety
    ///
    /// Caller must own the claim on `sequence` and hold no other reference to
    /// its slot.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_entry_mut(&self, sequence: i64) -> &mut T {
        &mut *self.slots[self.index(sequence)].get()
    }

    #[inline(always)]
    pub(crate) fn claim_sequence(&self) -> &Sequence {
        &self.claim
    }

    #[inline(always)]
    pub(crate) fn readers(&self) -> &ReaderRegistry {
        &self.readers
    }

    /// Batch consumers currently registered as readers of this ring
    pub fn registered_consumers(&self) -> usize {
        self.readers.registered()
    }

    /// Advance the cursor to `sequence` and wake blocked consumers.
    #[inline(always)]
    pub(crate) fn publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Create a producer barrier that never overtakes any of `consumers`.
    ///
    /// The barrier also gates on every `BatchConsumer` registered with this
    /// ring, including ones created later.
    ///
    /// # Errors
    ///
    /// `RingError::InvalidConfig` if `consumers` is empty: without something
    /// to gate on the producer would silently overwrite unread entries.
    pub fn create_producer_barrier(self: &Arc<Self>, consumers: &[&dyn Consumer]) -> Result<ProducerBarrier<T>> {
        if consumers.is_empty() {
            return Err(RingError::config("There must be at least one consumer to track for preventing ring wrap"));
        }
        let gating = consumers
            .iter()
            .map(|c| c.sequence())
            .collect();
        Ok(ProducerBarrier::new(self.clone(), gating))
    }

    /// Create a consumer barrier, optionally chained behind `dependencies`.
    pub fn create_consumer_barrier(self: &Arc<Self>, dependencies: &[&dyn Consumer]) -> Arc<ConsumerBarrier<T>> {
        let dependents = dependencies
            .iter()
            .map(|c| c.sequence())
            .collect();
        Arc::new(ConsumerBarrier::new(self.clone(), dependents))
    }
}

impl<T: Entry> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor())
            .field("claimed", &self.claim.get())
            .field("readers", &self.readers)
            .field("wait_strategy", &self.wait_strategy)
            .finish()
    }
}
