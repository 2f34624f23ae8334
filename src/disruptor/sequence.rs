use std::fmt;
use std::sync::atomic::{ AtomicI64, Ordering };
use std::sync::Arc;

use crossbeam::utils::CachePadded;

use crate::constants::INITIAL_CURSOR_VALUE;

/// Cache-line padded sequence counter.
///
/// Cursors, claim counters and consumer progress are all `Sequence`s. Each is
/// padded to its own cache line so that a producer bumping the cursor does not
/// invalidate the line a consumer keeps writing its progress to.
///
/// Writers publish with `Release` and readers observe with `Acquire`, so any
/// slot mutation made before `set` is visible to a thread that reads the new
/// value with `get`.
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Sequence {
    pub fn new(initial: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(initial)),
        }
    }

    #[inline(always)]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Atomically move from `current` to `new`; false if another thread got there first.
    #[inline(always)]
    pub fn compare_and_set(&self, current: i64, new: i64) -> bool {
        self.value.compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed).is_ok()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

static_assertions::assert_impl_all!(Sequence: Send, Sync);

/// Smallest value among `sequences`, or `default` when the list is empty.
#[inline]
pub fn minimum_sequence(sequences: &[Arc<Sequence>], default: i64) -> i64 {
    sequences
        .iter()
        .map(|s| s.get())
        .min()
        .unwrap_or(default)
}
