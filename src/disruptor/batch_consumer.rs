//! BatchConsumer - drains every available entry into a `BatchHandler`
//!
//! The consumer owns one progress `Sequence`. Downstream consumer barriers may
//! depend on it to form a pipeline, and producer barriers may list it (or its
//! `ConsumerHandle`) as a gating consumer. Either way the consumer also holds a
//! slot in the ring's reader registry from `new` until `run` returns, so every
//! producer barrier on the ring waits for it.
//!
//! A handler that panics is treated like one that returned an error: the panic
//! is caught and reported to the `FaultHandler`, and the batch carries on.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{ self, AssertUnwindSafe };
use std::sync::atomic::{ AtomicU8, Ordering };
use std::sync::Arc;
use std::thread;

use crate::disruptor::readers::ReaderSlot;
use crate::disruptor::{ Consumer, ConsumerBarrier, Entry, Sequence, WaitStrategy };
use crate::error::{ Result, RingError };

/// Callback interface for entries made available by a `BatchConsumer`
pub trait BatchHandler<T: Entry> {
    /// Called for every entry, in sequence order
    fn on_available(&mut self, entry: &T) -> anyhow::Result<()>;

    /// Called once after the last entry of each drained batch
    fn on_end_of_batch(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called exactly once when the consumer stops
    fn on_completion(&mut self) {}
}

/// Receives the errors a `BatchHandler` returns or panics with.
///
/// The consumer keeps going after reporting a fault: the faulting entry is
/// still counted as processed.
pub trait FaultHandler<T: Entry>: Send {
    fn on_fault(&mut self, error: anyhow::Error, sequence: i64, entry: &T);

    fn on_end_of_batch_fault(&mut self, error: anyhow::Error, sequence: i64) {
        tracing::warn!(sequence, error = %format!("{error:#}"), "end of batch handler failed");
    }
}

/// Default fault handler: log and continue
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFaultHandler;

impl<T: Entry> FaultHandler<T> for LoggingFaultHandler {
    fn on_fault(&mut self, error: anyhow::Error, sequence: i64, _entry: &T) {
        tracing::warn!(sequence, error = %format!("{error:#}"), "batch handler failed on entry");
    }
}

/// Lifecycle of a `BatchConsumer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Consumption loop over a `ConsumerBarrier`
pub struct BatchConsumer<T: Entry, H: BatchHandler<T>> {
    barrier: Arc<ConsumerBarrier<T>>,
    handler: H,
    sequence: Arc<Sequence>,
    reader: ReaderSlot<T>,
    state: Arc<AtomicU8>,
    fault_handler: Box<dyn FaultHandler<T>>,
}

impl<T: Entry, H: BatchHandler<T>> BatchConsumer<T, H> {
    /// Register a consumer with the barrier's ring.
    ///
    /// The consumer starts after the last sequence claimed so far, so on a
    /// ring that is already in use it skips what was produced before it
    /// existed. Until it runs, it holds back every producer on the ring once
    /// they are a full ring ahead.
    ///
    /// # Errors
    ///
    /// `RingError::InvalidConfig` if the ring already tracks
    /// `RingBufferConfig::max_consumers` batch consumers.
    pub fn new(barrier: Arc<ConsumerBarrier<T>>, handler: H) -> Result<Self> {
        let (reader, start) = ReaderSlot::register(barrier.ring_buffer())?;
        Ok(Self {
            barrier,
            handler,
            sequence: Arc::new(Sequence::new(start)),
            reader,
            state: Arc::new(AtomicU8::new(ConsumerState::Idle as u8)),
            fault_handler: Box::new(LoggingFaultHandler),
        })
    }

    /// Replace the default `LoggingFaultHandler`
    pub fn with_fault_handler(mut self, fault_handler: Box<dyn FaultHandler<T>>) -> Self {
        self.fault_handler = fault_handler;
        self
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn barrier(&self) -> &Arc<ConsumerBarrier<T>> {
        &self.barrier
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Run the consumption loop on the calling thread until halted.
    ///
    /// Returns immediately if the consumer is not `Idle`. A `halt` issued
    /// before `run` is honoured: the loop stops at its first wait. On return
    /// the consumer no longer holds back producers.
    pub fn run(&mut self) {
        let started = self.state.compare_exchange(
            ConsumerState::Idle as u8,
            ConsumerState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire
        );
        if let Err(state) = started {
            tracing::warn!(state = ?ConsumerState::from_u8(state), "batch consumer can only run once");
            return;
        }

        let _stopped = StopOnExit(self.state.clone());
        let ring = self.barrier.ring_buffer().clone();
        let mut next = self.sequence.get() + 1;
        tracing::debug!(next, "batch consumer started");

        loop {
            let available = match self.barrier.wait_for(next) {
                Ok(available) => available,
                Err(RingError::Alerted) => {
                    break;
                }
                Err(e) => {
                    tracing::error!(next, error = %e, "batch consumer wait failed");
                    break;
                }
            };
            if available < next {
                continue;
            }

            for sequence in next..=available {
                // SAFETY: `sequence <= available <= cursor`, so the slot is
                // published. Our registry slot still holds `next - 1` and every
                // producer barrier on the ring gates on it, so nobody reclaims
                // the slot before we store `available` below.
                let entry = unsafe { ring.get_entry(sequence) };
                let handler = &mut self.handler;
                let result = catch_panic(|| handler.on_available(entry));
                if let Err(error) = result {
                    self.fault_handler.on_fault(error, sequence, entry);
                }
            }
            let handler = &mut self.handler;
            if let Err(error) = catch_panic(|| handler.on_end_of_batch()) {
                self.fault_handler.on_end_of_batch_fault(error, available);
            }

            tracing::trace!(from = next, to = available, "batch drained");
            self.sequence.set(available);
            self.reader.update(available);
            // Blocking waiters downstream park until someone signals.
            ring.wait_strategy().signal_all_when_blocking();
            next = available + 1;
        }

        self.reader.release();
        let handler = &mut self.handler;
        if panic::catch_unwind(AssertUnwindSafe(|| handler.on_completion())).is_err() {
            tracing::error!("batch handler panicked on completion");
        }
        tracing::debug!(sequence = self.sequence.get(), "batch consumer stopped");
    }
}

/// Marks the consumer stopped however `run` exits
struct StopOnExit(Arc<AtomicU8>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.store(ConsumerState::Stopped as u8, Ordering::Release);
    }
}

/// Run a handler callback, turning a panic into an error for the fault handler
fn catch_panic(callback: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
    panic::catch_unwind(AssertUnwindSafe(callback)).unwrap_or_else(|payload| {
        Err(anyhow::anyhow!("batch handler panicked: {}", panic_message(&*payload)))
    })
}

fn panic_message<'a>(payload: &'a (dyn Any + Send + 'static)) -> &'a str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string payload"
    }
}

impl<T, H> BatchConsumer<T, H> where T: Entry, H: BatchHandler<T> + Send + 'static {
    /// Run the consumption loop on a dedicated thread
    pub fn spawn(self) -> io::Result<ConsumerHandle<H>> {
        self.spawn_named("ringseq-consumer")
    }

    /// Run the consumption loop on a dedicated thread called `name`
    pub fn spawn_named(mut self, name: impl Into<String>) -> io::Result<ConsumerHandle<H>> {
        let sequence = self.sequence.clone();
        let state = self.state.clone();
        let barrier = self.barrier.clone();
        let halt: Box<dyn Fn() + Send + Sync> = Box::new(move || barrier.alert());

        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                self.run();
                self.into_handler()
            })?;

        Ok(ConsumerHandle {
            sequence,
            state,
            halt,
            thread,
        })
    }
}

impl<T: Entry, H: BatchHandler<T>> Consumer for BatchConsumer<T, H> {
    fn sequence(&self) -> Arc<Sequence> {
        self.sequence.clone()
    }

    /// Alert the barrier; the loop exits at its next wait
    fn halt(&self) {
        self.barrier.alert();
    }
}

impl<T: Entry, H: BatchHandler<T>> fmt::Debug for BatchConsumer<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConsumer")
            .field("sequence", &self.sequence)
            .field("state", &self.state())
            .field("barrier", &self.barrier)
            .finish()
    }
}

/// Handle to a `BatchConsumer` running on its own thread
pub struct ConsumerHandle<H> {
    sequence: Arc<Sequence>,
    state: Arc<AtomicU8>,
    halt: Box<dyn Fn() + Send + Sync>,
    thread: thread::JoinHandle<H>,
}

impl<H> ConsumerHandle<H> {
    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the consumer thread and get the handler back.
    ///
    /// Handler panics are reported to the fault handler, so this only resumes
    /// a panic raised by the fault handler itself.
    pub fn join(self) -> H {
        match self.thread.join() {
            Ok(handler) => handler,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl<H> Consumer for ConsumerHandle<H> {
    fn sequence(&self) -> Arc<Sequence> {
        self.sequence.clone()
    }

    fn halt(&self) {
        (self.halt)();
    }
}

impl<H> fmt::Debug for ConsumerHandle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("sequence", &self.sequence)
            .field("state", &self.state())
            .field("thread", &self.thread.thread().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::tests_support::ValueEntry;
    use crate::disruptor::{ RingBuffer, RingBufferConfig, WaitStrategyType };
    use parking_lot::Mutex;
    use std::time::{ Duration, Instant };

    #[derive(Default)]
    struct Recorder {
        seen: Vec<i64>,
        batches: usize,
        completions: usize,
        fail_on: Option<i64>,
        panic_on: Option<i64>,
    }

    impl BatchHandler<ValueEntry> for Recorder {
        fn on_available(&mut self, entry: &ValueEntry) -> anyhow::Result<()> {
            self.seen.push(entry.value);
            if self.fail_on == Some(entry.value) {
                anyhow::bail!("rejected {}", entry.value);
            }
            if self.panic_on == Some(entry.value) {
                panic!("cannot handle {}", entry.value);
            }
            Ok(())
        }

        fn on_end_of_batch(&mut self) -> anyhow::Result<()> {
            self.batches += 1;
            Ok(())
        }

        fn on_completion(&mut self) {
            self.completions += 1;
        }
    }

    struct CollectFaults(Arc<Mutex<Vec<i64>>>);

    impl FaultHandler<ValueEntry> for CollectFaults {
        fn on_fault(&mut self, _error: anyhow::Error, sequence: i64, _entry: &ValueEntry) {
            self.0.lock().push(sequence);
        }
    }

    fn ring() -> Arc<RingBuffer<ValueEntry>> {
        let config = RingBufferConfig::new(16).unwrap().with_wait_strategy(WaitStrategyType::Yielding);
        RingBuffer::<ValueEntry>::with_config(ValueEntry::default, config).unwrap()
    }

    fn wait_until(sequence: &Sequence, target: i64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sequence.get() < target {
            assert!(Instant::now() < deadline, "consumer stuck at {}", sequence.get());
            thread::yield_now();
        }
    }

    #[test]
    fn test_drains_published_batch_in_one_pass() {
        let ring = ring();
        let mut consumer = BatchConsumer::new(ring.create_consumer_barrier(&[]), Recorder::default()).unwrap();
        let producer = ring.create_producer_barrier(&[&consumer]).unwrap();

        for value in 0..5 {
            let mut entry = producer.next_entry().unwrap();
            entry.value = value;
            entry.commit();
        }
        // everything is published before the loop starts, so it arrives as one batch
        let barrier = consumer.barrier().clone();
        let sequence = consumer.sequence();
        let runner = thread::spawn(move || {
            consumer.run();
            consumer
        });
        wait_until(&sequence, 4);
        barrier.alert();

        let consumer = runner.join().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        let recorder = consumer.into_handler();
        assert_eq!(recorder.seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(recorder.batches, 1);
        assert_eq!(recorder.completions, 1);
    }

    #[test]
    fn test_halt_before_run_completes_once() {
        let ring = ring();
        let mut consumer = BatchConsumer::new(ring.create_consumer_barrier(&[]), Recorder::default()).unwrap();
        assert_eq!(consumer.state(), ConsumerState::Idle);

        consumer.halt();
        consumer.run();

        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(consumer.handler().completions, 1);
        assert!(consumer.handler().seen.is_empty());

        // a stopped consumer does not restart
        consumer.run();
        assert_eq!(consumer.handler().completions, 1);
    }

    #[test]
    fn test_handler_fault_does_not_stop_batch() {
        let ring = ring();
        let faults = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            fail_on: Some(2),
            ..Default::default()
        };
        let consumer = BatchConsumer::new(ring.create_consumer_barrier(&[]), recorder).unwrap().with_fault_handler(
            Box::new(CollectFaults(faults.clone()))
        );
        let producer = ring.create_producer_barrier(&[&consumer]).unwrap();
        let handle = consumer.spawn().unwrap();

        for value in 0..4 {
            let mut entry = producer.next_entry().unwrap();
            entry.value = value;
            producer.commit(entry);
        }

        wait_until(&handle.sequence(), 3);
        handle.halt();
        let recorder = handle.join();

        assert_eq!(recorder.seen, vec![0, 1, 2, 3]);
        assert_eq!(*faults.lock(), vec![2]);
        assert_eq!(recorder.completions, 1);
    }

    #[test]
    fn test_spawned_consumer_reports_state() {
        let ring = ring();
        let consumer = BatchConsumer::new(ring.create_consumer_barrier(&[]), Recorder::default()).unwrap();
        let handle = consumer.spawn_named("consumer-under-test").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.state() != ConsumerState::Running {
            assert!(Instant::now() < deadline);
            thread::yield_now();
        }
        assert!(format!("{:?}", handle).contains("consumer-under-test"));

        handle.halt();
        let recorder = handle.join();
        assert_eq!(recorder.completions, 1);
    }

    #[test]
    fn test_handler_panic_is_reported_and_consumer_continues() {
        let config = RingBufferConfig::new(2).unwrap().with_wait_strategy(WaitStrategyType::Yielding);
        let ring = RingBuffer::<ValueEntry>::with_config(ValueEntry::default, config).unwrap();
        let faults = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            panic_on: Some(1),
            ..Default::default()
        };
        let consumer = BatchConsumer::new(ring.create_consumer_barrier(&[]), recorder).unwrap().with_fault_handler(
            Box::new(CollectFaults(faults.clone()))
        );
        let producer = ring.create_producer_barrier(&[&consumer]).unwrap();
        let handle = consumer.spawn().unwrap();

        // twice the capacity: only completes if the consumer survives the panic
        for value in 0..4 {
            let mut entry = producer.next_entry().unwrap();
            entry.value = value;
            entry.commit();
        }

        wait_until(&handle.sequence(), 3);
        handle.halt();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() {
            assert!(Instant::now() < deadline);
            thread::yield_now();
        }
        assert_eq!(handle.state(), ConsumerState::Stopped);
        assert_eq!(ring.registered_consumers(), 0);

        let recorder = handle.join();
        assert_eq!(recorder.seen, vec![0, 1, 2, 3]);
        assert_eq!(*faults.lock(), vec![1]);
        assert_eq!(recorder.completions, 1);
    }

    #[test]
    fn test_consumer_holds_registration_until_run_returns() {
        let ring = ring();
        let mut consumer = BatchConsumer::new(ring.create_consumer_barrier(&[]), Recorder::default()).unwrap();
        assert_eq!(ring.registered_consumers(), 1);

        consumer.halt();
        consumer.run();
        assert_eq!(ring.registered_consumers(), 0);

        // dropping a consumer that never ran frees its slot as well
        let idle = BatchConsumer::new(ring.create_consumer_barrier(&[]), Recorder::default()).unwrap();
        assert_eq!(ring.registered_consumers(), 1);
        drop(idle);
        assert_eq!(ring.registered_consumers(), 0);
    }

    #[test]
    fn test_late_consumer_skips_earlier_entries() {
        let ring = ring();
        let gate = crate::disruptor::tests_support::ManualConsumer::default();
        let producer = ring.create_producer_barrier(&[&gate]).unwrap();
        for value in 0..3 {
            let mut entry = producer.next_entry().unwrap();
            entry.value = value;
            entry.commit();
        }

        let consumer = BatchConsumer::new(ring.create_consumer_barrier(&[]), Recorder::default()).unwrap();
        assert_eq!(consumer.sequence().get(), 2);
        let handle = consumer.spawn().unwrap();

        let mut entry = producer.next_entry().unwrap();
        entry.value = 3;
        entry.commit();

        wait_until(&handle.sequence(), 3);
        handle.halt();
        assert_eq!(handle.join().seen, vec![3]);
    }
}
