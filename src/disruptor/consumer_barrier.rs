//! Consumer side of the ring buffer: wait for published sequences.

use std::fmt;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::time::Duration;

use crate::disruptor::{ Entry, Gate, RingBuffer, Sequence };
use crate::error::{ Result, RingError };

/// Read-side gate onto a ring buffer.
///
/// `wait_for` blocks, through the ring's wait strategy, until the cursor has
/// reached the requested sequence and every upstream consumer this barrier
/// depends on has processed it. The barrier owns an alert flag used to cancel
/// waits cooperatively.
pub struct ConsumerBarrier<T: Entry> {
    ring: Arc<RingBuffer<T>>,
    dependents: Vec<Arc<Sequence>>,
    alerted: AtomicBool,
}

impl<T: Entry> ConsumerBarrier<T> {
    pub(crate) fn new(ring: Arc<RingBuffer<T>>, dependents: Vec<Arc<Sequence>>) -> Self {
        Self {
            ring,
            dependents,
            alerted: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    fn gate(&self) -> Gate<'_> {
        Gate::new(self.ring.cursor_ref(), &self.dependents, &self.alerted)
    }

    /// Wait for `sequence` to become available.
    ///
    /// Returns the highest available sequence, which may be beyond the
    /// request so the caller can drain a whole batch at once.
    ///
    /// # Errors
    ///
    /// `RingError::Alerted` if the barrier is alerted before or while waiting.
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_alert()?;
        let available = self.ring.wait_strategy().wait_for(sequence, &self.gate())?;
        self.check_alert()?;
        Ok(available)
    }

    /// Wait for `sequence` for at most `timeout`.
    ///
    /// A timeout is not an error: the currently available sequence is
    /// returned, which may be lower than `sequence` (or -1 if nothing was
    /// published yet).
    ///
    /// # Errors
    ///
    /// `RingError::Alerted` if the barrier is alerted before or while waiting.
    pub fn wait_for_timeout(&self, sequence: i64, timeout: Duration) -> Result<i64> {
        self.check_alert()?;
        let available = self.ring.wait_strategy().wait_for_timeout(sequence, &self.gate(), timeout)?;
        self.check_alert()?;
        Ok(available)
    }

    /// Value of the cursor for entries that have been published
    #[inline]
    pub fn cursor(&self) -> i64 {
        self.ring.cursor()
    }

    pub fn ring_buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }

    /// Alert the barrier and wake every thread blocked in `wait_for`
    pub fn signal_shutdown(&self) {
        tracing::debug!(cursor = self.cursor(), "consumer barrier alerted");
        self.alerted.store(true, Ordering::Release);
        self.ring.wait_strategy().signal_all_when_blocking();
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
}

impl<T: Entry> fmt::Debug for ConsumerBarrier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerBarrier")
            .field("cursor", &self.cursor())
            .field("dependents", &self.dependents)
            .field("alerted", &self.is_alerted())
            .finish()
    }
}
