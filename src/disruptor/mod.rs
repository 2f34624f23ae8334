//! Sequence-coordinated ring buffer based on the LMAX Disruptor pattern.
//!
//! ## Components
//!
//! | Type | Role |
//! |------|------|
//! | `RingBuffer<T>` | Pre-allocated slots, published cursor, shared claim counter |
//! | `ProducerBarrier<T>` | Claims slots with backpressure, commits them in order |
//! | `ConsumerBarrier<T>` | Waits for the cursor (and upstream consumers) to advance |
//! | `BatchConsumer<T, H>` | Drains every available entry into a `BatchHandler` |
//! | `WaitStrategy` | How a consumer idles: spin, yield, sleep or block |
//!
//! ## Sequences
//!
//! Every position in the stream is an `i64` sequence starting at 0;
//! `INITIAL_CURSOR_VALUE` (-1) means nothing has been published or processed.
//! A sequence maps to slot `sequence & (capacity - 1)`.
//!
//! ## Safety
//!
//! Slots are handed out without copying. Exclusive producer access is tied to
//! the `ClaimedEntry` guard; shared consumer access is only sound while the
//! reader's progress sequence gates the producers (see `RingBuffer::get_entry`).

pub mod sequence;
pub mod wait_strategy;
pub(crate) mod readers;
pub mod ring_buffer;
pub mod producer_barrier;
pub mod consumer_barrier;
pub mod batch_consumer;

#[cfg(test)]
pub(crate) mod tests_support;

pub use sequence::{ minimum_sequence, Sequence };
pub use wait_strategy::{
    BlockingWaitStrategy,
    BusySpinWaitStrategy,
    Gate,
    SleepingWaitStrategy,
    WaitStrategy,
    YieldingWaitStrategy,
};
pub use ring_buffer::RingBuffer;
pub use producer_barrier::{ ClaimedEntry, ProducerBarrier };
pub use consumer_barrier::ConsumerBarrier;
pub use batch_consumer::{
    BatchConsumer,
    BatchHandler,
    ConsumerHandle,
    ConsumerState,
    FaultHandler,
    LoggingFaultHandler,
};

use std::sync::Arc;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BLOCKING_TIMEOUT,
    DEFAULT_MAX_CONSUMERS,
    DEFAULT_RING_BUFFER_SIZE,
    DEFAULT_SLEEP_DURATION,
    DEFAULT_YIELD_SPINS,
    MAX_RING_BUFFER_SIZE,
};
use crate::error::{ Result, RingError };

/// Trait for reusable records stored in the ring buffer.
///
/// Slots are created once by an `EntryFactory` and then overwritten in place
/// for the lifetime of the buffer.
pub trait Entry: Send + Sync + 'static {
    /// Replace this entry's contents with those of `other`
    fn copy_from(&mut self, other: &Self);
}

/// Produces the initial instance for every slot of a ring buffer.
///
/// Implemented for any `Fn() -> T`, so `T::default` or a closure both work.
pub trait EntryFactory<T> {
    fn create(&self) -> T;
}

impl<T, F> EntryFactory<T> for F where F: Fn() -> T {
    fn create(&self) -> T {
        self()
    }
}

/// Anything that consumes from a ring buffer and exposes its progress.
///
/// Producer barriers gate on these sequences so they never overwrite an
/// unprocessed slot; consumer barriers use them to chain consumers.
pub trait Consumer {
    /// Last sequence this consumer finished processing
    fn sequence(&self) -> Arc<Sequence>;

    /// Ask the consumer to stop
    fn halt(&self);
}

impl<C: Consumer + ?Sized> Consumer for Arc<C> {
    fn sequence(&self) -> Arc<Sequence> {
        (**self).sequence()
    }

    fn halt(&self) {
        (**self).halt()
    }
}

/// Configuration for ring buffer behavior
#[derive(Debug, Clone)]
pub struct RingBufferConfig {
    /// Size of the ring buffer (must be power of 2)
    pub size: usize,
    /// Wait strategy for consumers
    pub wait_strategy: WaitStrategyType,
    /// Upper bound on a single condvar wait (`Blocking` only)
    pub blocking_timeout: Duration,
    /// Sleep between polls (`Sleeping` only)
    pub sleep_duration: Duration,
    /// Spins before yielding (`Yielding` only)
    pub yield_spins: u32,
    /// Batch consumers that may read from the ring at the same time
    pub max_consumers: usize,
}

/// Available wait strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategyType {
    /// Busy spin for lowest latency
    BusySpin,
    /// Spin, then yield the thread
    Yielding,
    /// Sleep for lowest CPU usage
    Sleeping,
    /// Block on a condition variable until signalled
    Blocking,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_RING_BUFFER_SIZE,
            wait_strategy: WaitStrategyType::Blocking,
            blocking_timeout: DEFAULT_BLOCKING_TIMEOUT,
            sleep_duration: DEFAULT_SLEEP_DURATION,
            yield_spins: DEFAULT_YIELD_SPINS,
            max_consumers: DEFAULT_MAX_CONSUMERS,
        }
    }
}

impl RingBufferConfig {
    /// Create a new configuration with the specified size
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(RingError::config("Ring buffer size must be greater than 0"));
        }
        if !size.is_power_of_two() {
            return Err(crate::config_error!("Ring buffer size must be power of 2, got {}", size));
        }
        if size > MAX_RING_BUFFER_SIZE {
            return Err(
                crate::config_error!("Ring buffer size {} exceeds maximum {}", size, MAX_RING_BUFFER_SIZE)
            );
        }

        Ok(Self {
            size,
            ..Default::default()
        })
    }

    /// Create a configuration whose size is `size` rounded up to the next power of 2
    pub fn rounded(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(RingError::config("Ring buffer size must be greater than 0"));
        }
        match size.checked_next_power_of_two() {
            Some(size) => Self::new(size),
            None => Err(crate::config_error!("Ring buffer size {} is too large", size)),
        }
    }

    /// Set the wait strategy
    pub fn with_wait_strategy(mut self, strategy: WaitStrategyType) -> Self {
        self.wait_strategy = strategy;
        self
    }

    /// Set the condvar wait bound used by the blocking strategy
    pub fn with_blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    /// Set the sleep between polls used by the sleeping strategy
    pub fn with_sleep_duration(mut self, duration: Duration) -> Self {
        self.sleep_duration = duration;
        self
    }

    /// Set the spin phase length used by the yielding strategy
    pub fn with_yield_spins(mut self, spins: u32) -> Self {
        self.yield_spins = spins;
        self
    }

    /// Set how many batch consumers the ring can track at once
    pub fn with_max_consumers(mut self, max_consumers: usize) -> Self {
        self.max_consumers = max_consumers;
        self
    }

    /// Instantiate the configured wait strategy
    pub fn build_wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        match self.wait_strategy {
            WaitStrategyType::BusySpin => Arc::new(BusySpinWaitStrategy::new()),
            WaitStrategyType::Yielding => Arc::new(YieldingWaitStrategy::with_spin_tries(self.yield_spins)),
            WaitStrategyType::Sleeping => Arc::new(SleepingWaitStrategy::new(self.sleep_duration)),
            WaitStrategyType::Blocking => Arc::new(BlockingWaitStrategy::with_timeout(self.blocking_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_config_creation() {
        let config = RingBufferConfig::new(1024).unwrap();
        assert_eq!(config.size, 1024);
        assert_eq!(config.wait_strategy, WaitStrategyType::Blocking);
    }

    #[test]
    fn test_ring_buffer_config_invalid_size() {
        assert!(RingBufferConfig::new(0).is_err());
        assert!(RingBufferConfig::new(1023).is_err()); // Not power of 2
        assert!(RingBufferConfig::new(MAX_RING_BUFFER_SIZE * 2).is_err());
    }

    #[test]
    fn test_ring_buffer_config_rounded() {
        assert_eq!(RingBufferConfig::rounded(20).unwrap().size, 32);
        assert_eq!(RingBufferConfig::rounded(64).unwrap().size, 64);
        assert_eq!(RingBufferConfig::rounded(1).unwrap().size, 1);
        assert!(RingBufferConfig::rounded(0).is_err());
    }

    #[test]
    fn test_ring_buffer_config_builder() {
        let config = RingBufferConfig::new(1024)
            .unwrap()
            .with_wait_strategy(WaitStrategyType::Yielding)
            .with_yield_spins(7)
            .with_blocking_timeout(Duration::from_millis(3))
            .with_max_consumers(2);

        assert_eq!(config.size, 1024);
        assert_eq!(config.wait_strategy, WaitStrategyType::Yielding);
        assert_eq!(config.yield_spins, 7);
        assert_eq!(config.blocking_timeout, Duration::from_millis(3));
        assert_eq!(config.max_consumers, 2);
    }

    #[test]
    fn test_build_wait_strategy_matches_type() {
        let config = RingBufferConfig::new(8).unwrap().with_wait_strategy(WaitStrategyType::Sleeping);
        let strategy = config.build_wait_strategy();
        assert!(format!("{:?}", strategy).contains("Sleeping"));
    }

    #[test]
    fn test_closure_is_entry_factory() {
        let factory = || 5u32;
        assert_eq!(factory.create(), 5);
    }
}
