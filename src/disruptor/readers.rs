//! Registry of the progress sequences batch consumers read behind
//!
//! Every `BatchConsumer` takes a slot here for as long as it may read from the
//! ring, and every producer barrier gates on the registry on top of the
//! consumers it was created with. A slot is therefore never reclaimed while a
//! batch consumer can still read it, whatever gating lists the caller chose.
//!
//! The registry is a fixed array scanned without locks. `high_water` bounds the
//! scan to slots that were ever handed out.

use std::fmt;
use std::sync::atomic::{ fence, AtomicU64, AtomicUsize, Ordering };
use std::sync::Arc;

use crate::constants::INITIAL_CURSOR_VALUE;
use crate::disruptor::{ Entry, RingBuffer, Sequence };
use crate::error::Result;

/// Value of a slot nobody holds
const FREE: i64 = i64::MAX;

pub(crate) struct ReaderRegistry {
    slots: Box<[Sequence]>,
    high_water: AtomicUsize,
    /// Bumped on every registration
    generation: AtomicU64,
}

impl ReaderRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Sequence::new(FREE)).collect(),
            high_water: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Smallest registered sequence, `i64::MAX` when nobody is registered
    #[inline]
    pub(crate) fn minimum(&self) -> i64 {
        let used = self.high_water.load(Ordering::Acquire);
        self.slots[..used]
            .iter()
            .map(Sequence::get)
            .min()
            .unwrap_or(FREE)
    }

    #[inline(always)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn registered(&self) -> usize {
        let used = self.high_water.load(Ordering::Acquire);
        self.slots[..used]
            .iter()
            .filter(|s| s.get() != FREE)
            .count()
    }

    /// Take a free slot. It holds `INITIAL_CURSOR_VALUE` until `set`, which
    /// holds back any producer that is a full ring ahead.
    fn reserve(&self) -> Option<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            while slot.get() == FREE {
                if slot.compare_and_set(FREE, INITIAL_CURSOR_VALUE) {
                    self.high_water.fetch_max(index + 1, Ordering::SeqCst);
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    return Some(index);
                }
            }
        }
        None
    }

    #[inline(always)]
    fn set(&self, index: usize, sequence: i64) {
        self.slots[index].set(sequence);
    }

    fn release(&self, index: usize) {
        self.slots[index].set(FREE);
    }
}

impl fmt::Debug for ReaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderRegistry")
            .field("capacity", &self.capacity())
            .field("registered", &self.registered())
            .finish()
    }
}

/// A batch consumer's slot in its ring's registry, released on drop
pub(crate) struct ReaderSlot<T: Entry> {
    ring: Arc<RingBuffer<T>>,
    index: usize,
    released: bool,
}

impl<T: Entry> ReaderSlot<T> {
    /// Register a new reader and return the last sequence it may skip.
    ///
    /// The reader starts after everything claimed so far: producers that
    /// claimed before the registration became visible never had to respect it.
    pub(crate) fn register(ring: &Arc<RingBuffer<T>>) -> Result<(Self, i64)> {
        let readers = ring.readers();
        let index = readers
            .reserve()
            .ok_or_else(|| crate::config_error!("Ring buffer already tracks {} consumers", readers.capacity()))?;

        // Pairs with the fence after the claim CAS in the producer barrier:
        // either that producer sees the new generation, or this load sees its claim.
        fence(Ordering::SeqCst);
        let start = ring.claim_sequence().get();
        readers.set(index, start);

        Ok((
            Self {
                ring: ring.clone(),
                index,
                released: false,
            },
            start,
        ))
    }

    #[inline(always)]
    pub(crate) fn update(&self, sequence: i64) {
        self.ring.readers().set(self.index, sequence);
    }

    pub(crate) fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.ring.readers().release(self.index);
        }
    }
}

impl<T: Entry> Drop for ReaderSlot<T> {
    fn drop(&mut self) {
        self.release();
    }
}
