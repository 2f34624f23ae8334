//! Wait strategies for consumer barriers
//!
//! A consumer barrier only defines *what* it waits for (the cursor, bounded by
//! any upstream consumers, reaching a target sequence) and *when* to give up
//! (its alert flag). How the thread idles in the meantime is delegated to a
//! `WaitStrategy`. Each strategy offers a different trade-off between latency
//! and CPU usage, but all of them honour the same contract:
//!
//! - return as soon as the requested sequence is available, reporting the
//!   highest available sequence (which may be beyond the request),
//! - re-check the alert flag on every wake and fail with `RingError::Alerted`,
//! - treat spurious wakes as a reason to re-check, never as cancellation,
//! - in the timeout variant, return the current available sequence when the
//!   deadline passes instead of failing.

use std::fmt::Debug;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread;
use std::time::{ Duration, Instant };

use parking_lot::{ Condvar, Mutex };

use crate::constants::{ DEFAULT_BLOCKING_TIMEOUT, DEFAULT_SLEEP_DURATION, DEFAULT_YIELD_SPINS };
use crate::disruptor::sequence::{ minimum_sequence, Sequence };
use crate::error::{ Result, RingError };

/// Everything a wait strategy needs to know about the barrier it waits for.
pub struct Gate<'a> {
    cursor: &'a Sequence,
    dependents: &'a [Arc<Sequence>],
    alerted: &'a AtomicBool,
}

impl<'a> Gate<'a> {
    pub fn new(cursor: &'a Sequence, dependents: &'a [Arc<Sequence>], alerted: &'a AtomicBool) -> Self {
        Self {
            cursor,
            dependents,
            alerted,
        }
    }

    /// Published cursor of the ring buffer
    #[inline(always)]
    pub fn cursor(&self) -> i64 {
        self.cursor.get()
    }

    /// Highest sequence that is safe to read: the cursor, capped by the
    /// slowest upstream consumer when there are any.
    #[inline(always)]
    pub fn available(&self) -> i64 {
        let cursor = self.cursor.get();
        minimum_sequence(self.dependents, cursor).min(cursor)
    }

    #[inline(always)]
    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn check_alert(&self) -> Result<()> {
        if self.is_alerted() { Err(RingError::Alerted) } else { Ok(()) }
    }
}

/// Trait for wait strategies that determine how consumers wait for data
pub trait WaitStrategy: Send + Sync + Debug {
    /// Wait until `sequence` is available through `gate`.
    ///
    /// Returns the highest available sequence, or `RingError::Alerted` if the
    /// barrier was alerted first.
    fn wait_for(&self, sequence: i64, gate: &Gate<'_>) -> Result<i64>;

    /// Like `wait_for`, but gives up after `timeout` and returns whatever is
    /// available at that point (possibly less than `sequence`).
    fn wait_for_timeout(&self, sequence: i64, gate: &Gate<'_>, timeout: Duration) -> Result<i64>;

    /// Signal that the cursor moved or an alert was raised
    fn signal_all_when_blocking(&self);
}

/// Shared polling loop for the non-blocking strategies. `idle` is called with
/// the number of unsuccessful polls so far.
#[inline(always)]
fn poll_until<F>(sequence: i64, gate: &Gate<'_>, deadline: Option<Instant>, mut idle: F) -> Result<i64>
    where F: FnMut(u32)
{
    let mut counter = 0u32;
    loop {
        gate.check_alert()?;

        let available = gate.available();
        if available >= sequence {
            return Ok(available);
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Ok(available);
            }
        }

        idle(counter);
        counter = counter.saturating_add(1);
    }
}

/// Busy spin wait strategy - lowest latency, highest CPU usage.
/// This strategy continuously checks for new data in a tight loop, making it
/// ideal for scenarios where latency is critical and CPU resources are abundant.
/// However, it will consume 100% of a CPU core while waiting.
#[derive(Debug, Default)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    /// Create a new busy spin wait strategy
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(&self, sequence: i64, gate: &Gate<'_>) -> Result<i64> {
        poll_until(sequence, gate, None, |_| std::hint::spin_loop())
    }

    fn wait_for_timeout(&self, sequence: i64, gate: &Gate<'_>, timeout: Duration) -> Result<i64> {
        poll_until(sequence, gate, Some(Instant::now() + timeout), |_| std::hint::spin_loop())
    }

    fn signal_all_when_blocking(&self) {
        // No-op for busy spin - no blocking threads to signal
    }
}

/// Yielding wait strategy - moderate CPU usage and latency.
/// Spins for a while, then yields the CPU to other threads between polls.
#[derive(Debug)]
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    /// Create a new yielding wait strategy
    pub fn new() -> Self {
        Self::with_spin_tries(DEFAULT_YIELD_SPINS)
    }

    /// Create a new yielding wait strategy with a custom spin phase
    pub fn with_spin_tries(spin_tries: u32) -> Self {
        Self { spin_tries }
    }

    #[inline(always)]
    fn idle(&self, counter: u32) {
        if counter < self.spin_tries {
            std::hint::spin_loop();
        } else {
            thread::yield_now();
        }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(&self, sequence: i64, gate: &Gate<'_>) -> Result<i64> {
        poll_until(sequence, gate, None, |counter| self.idle(counter))
    }

    fn wait_for_timeout(&self, sequence: i64, gate: &Gate<'_>, timeout: Duration) -> Result<i64> {
        poll_until(sequence, gate, Some(Instant::now() + timeout), |counter| self.idle(counter))
    }

    fn signal_all_when_blocking(&self) {
        // No-op for yielding - threads will wake up naturally
    }
}

/// Sleeping wait strategy - lowest CPU usage, higher latency.
/// Spins briefly, yields a few times, then sleeps for `sleep_duration`
/// between polls. Ideal where CPU usage matters more than latency.
#[derive(Debug)]
pub struct SleepingWaitStrategy {
    sleep_duration: Duration,
}

impl SleepingWaitStrategy {
    const SPIN_TRIES: u32 = 10;
    const YIELD_TRIES: u32 = 10;

    /// Create a new sleeping wait strategy with custom sleep duration
    pub fn new(sleep_duration: Duration) -> Self {
        Self { sleep_duration }
    }

    #[inline(always)]
    fn idle(&self, counter: u32, deadline: Option<Instant>) {
        if counter < Self::SPIN_TRIES {
            std::hint::spin_loop();
        } else if counter < Self::SPIN_TRIES + Self::YIELD_TRIES {
            thread::yield_now();
        } else {
            // never oversleep a caller's deadline
            let nap = match deadline {
                Some(deadline) => self.sleep_duration.min(deadline.saturating_duration_since(Instant::now())),
                None => self.sleep_duration,
            };
            thread::sleep(nap);
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_SLEEP_DURATION)
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(&self, sequence: i64, gate: &Gate<'_>) -> Result<i64> {
        poll_until(sequence, gate, None, |counter| self.idle(counter, None))
    }

    fn wait_for_timeout(&self, sequence: i64, gate: &Gate<'_>, timeout: Duration) -> Result<i64> {
        let deadline = Instant::now() + timeout;
        poll_until(sequence, gate, Some(deadline), |counter| self.idle(counter, Some(deadline)))
    }

    fn signal_all_when_blocking(&self) {
        // No-op for sleeping - threads will wake up naturally
    }
}

/// Blocking wait strategy - balanced latency and CPU usage.
/// This strategy uses a condition variable to block the consumer thread when
/// no data is available, significantly reducing CPU usage compared to busy spinning.
/// It's a good general-purpose strategy for most applications.
///
/// Waiting for upstream consumers parks on the same condvar as waiting for the
/// cursor: `BatchConsumer` signals after every batch it completes. Each
/// condvar wait is bounded by `timeout` as a backstop for progress made by
/// consumers that do not signal.
#[derive(Debug)]
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condition: Condvar,
    timeout: Duration,
}

impl BlockingWaitStrategy {
    /// Create a new blocking wait strategy
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_BLOCKING_TIMEOUT)
    }

    /// Create a blocking wait strategy whose individual condvar waits last at most `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condition: Condvar::new(),
            timeout,
        }
    }

    fn wait_until(&self, sequence: i64, gate: &Gate<'_>, deadline: Option<Instant>) -> Result<i64> {
        loop {
            gate.check_alert()?;

            let available = gate.available();
            if available >= sequence {
                return Ok(available);
            }

            let mut wait = self.timeout;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(available);
                }
                wait = wait.min(deadline - now);
            }

            let mut guard = self.mutex.lock();
            // Re-check under the lock: a signal sent before we locked is not lost.
            if gate.available() >= sequence || gate.is_alerted() {
                continue;
            }
            // Timeouts and spurious wakes both land on the re-check above.
            let _ = self.condition.wait_for(&mut guard, wait);
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(&self, sequence: i64, gate: &Gate<'_>) -> Result<i64> {
        self.wait_until(sequence, gate, None)
    }

    fn wait_for_timeout(&self, sequence: i64, gate: &Gate<'_>, timeout: Duration) -> Result<i64> {
        self.wait_until(sequence, gate, Some(Instant::now() + timeout))
    }

    fn signal_all_when_blocking(&self) {
        // Taking the lock orders this notify after any waiter's cursor check.
        let _guard = self.mutex.lock();
        self.condition.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn strategies() -> Vec<Arc<dyn WaitStrategy>> {
        vec![
            Arc::new(BusySpinWaitStrategy::new()),
            Arc::new(YieldingWaitStrategy::new()),
            Arc::new(SleepingWaitStrategy::new(Duration::from_micros(50))),
            Arc::new(BlockingWaitStrategy::new())
        ]
    }

    #[test]
    fn test_returns_immediately_when_available() {
        for strategy in strategies() {
            let cursor = Sequence::new(7);
            let alerted = AtomicBool::new(false);
            let gate = Gate::new(&cursor, &[], &alerted);

            assert_eq!(strategy.wait_for(5, &gate).unwrap(), 7, "{:?}", strategy);
        }
    }

    #[test]
    fn test_alert_fails_the_wait() {
        for strategy in strategies() {
            let cursor = Sequence::default();
            let alerted = AtomicBool::new(true);
            let gate = Gate::new(&cursor, &[], &alerted);

            assert_eq!(strategy.wait_for(0, &gate), Err(RingError::Alerted), "{:?}", strategy);
        }
    }

    #[test]
    fn test_timeout_returns_current_cursor() {
        for strategy in strategies() {
            let cursor = Sequence::default();
            let alerted = AtomicBool::new(false);
            let gate = Gate::new(&cursor, &[], &alerted);

            let seq = strategy.wait_for_timeout(0, &gate, Duration::from_millis(5)).unwrap();
            assert_eq!(seq, -1, "{:?}", strategy);
        }
    }

    #[test]
    fn test_dependents_cap_available_sequence() {
        for strategy in strategies() {
            let cursor = Sequence::new(10);
            let dependents = vec![Arc::new(Sequence::new(4)), Arc::new(Sequence::new(6))];
            let alerted = AtomicBool::new(false);
            let gate = Gate::new(&cursor, &dependents, &alerted);

            assert_eq!(strategy.wait_for(3, &gate).unwrap(), 4, "{:?}", strategy);
            let seq = strategy.wait_for_timeout(5, &gate, Duration::from_millis(2)).unwrap();
            assert_eq!(seq, 4, "{:?}", strategy);
        }
    }

    #[test]
    fn test_wakes_after_cursor_advances() {
        for strategy in strategies() {
            let cursor = Arc::new(Sequence::default());
            let alerted = Arc::new(AtomicBool::new(false));

            let s = strategy.clone();
            let c = cursor.clone();
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                c.set(3);
                s.signal_all_when_blocking();
            });

            let gate = Gate::new(&cursor, &[], &alerted);
            assert_eq!(strategy.wait_for(2, &gate).unwrap(), 3, "{:?}", strategy);

            handle.join().unwrap();
        }
    }

    #[test]
    fn test_alert_wakes_blocked_waiter() {
        for strategy in strategies() {
            let cursor = Arc::new(Sequence::default());
            let alerted = Arc::new(AtomicBool::new(false));

            let s = strategy.clone();
            let a = alerted.clone();
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                a.store(true, Ordering::Release);
                s.signal_all_when_blocking();
            });

            let gate = Gate::new(&cursor, &[], &alerted);
            assert_eq!(strategy.wait_for(0, &gate), Err(RingError::Alerted), "{:?}", strategy);

            handle.join().unwrap();
        }
    }

    #[test]
    fn test_blocking_parks_while_upstream_lags() {
        let strategy = Arc::new(BlockingWaitStrategy::with_timeout(Duration::from_secs(5)));
        let cursor = Arc::new(Sequence::new(8));
        let upstream = Arc::new(Sequence::new(1));
        let alerted = Arc::new(AtomicBool::new(false));

        let waiter = {
            let (strategy, cursor, upstream, alerted) = (
                strategy.clone(),
                cursor.clone(),
                upstream.clone(),
                alerted.clone(),
            );
            thread::spawn(move || {
                let dependents = [upstream];
                let gate = Gate::new(&cursor, &dependents, &alerted);
                strategy.wait_for(5, &gate)
            })
        };

        // progress without a signal goes unnoticed until the backstop timeout,
        // so the waiter must be parked rather than polling
        thread::sleep(Duration::from_millis(20));
        upstream.set(6);
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        strategy.signal_all_when_blocking();
        assert_eq!(waiter.join().unwrap(), Ok(6));
    }
}
