//! ringseq - sequence-coordinated ring buffer in the style of the LMAX Disruptor.
//!
//! Producers claim pre-allocated entries through a `ProducerBarrier`, fill
//! them in place and commit them in sequence order. Consumers wait on a
//! `ConsumerBarrier` and are usually driven by a `BatchConsumer`, which hands
//! every available entry to a `BatchHandler`.
//!
//! ```rust,no_run
//! use ringseq::disruptor::{ BatchConsumer, BatchHandler, Consumer, Entry, RingBuffer };
//!
//! #[derive(Default)]
//! struct Value(u64);
//!
//! impl Entry for Value {
//!     fn copy_from(&mut self, other: &Self) {
//!         self.0 = other.0;
//!     }
//! }
//!
//! struct Sum(u64);
//!
//! impl BatchHandler<Value> for Sum {
//!     fn on_available(&mut self, entry: &Value) -> anyhow::Result<()> {
//!         self.0 += entry.0;
//!         Ok(())
//!     }
//! }
//!
//! let ring = RingBuffer::<Value>::new(Value::default, 1024).unwrap();
//! let consumer = BatchConsumer::new(ring.create_consumer_barrier(&[]), Sum(0)).unwrap();
//! let producer = ring.create_producer_barrier(&[&consumer]).unwrap();
//! let handle = consumer.spawn().unwrap();
//!
//! for i in 0..100 {
//!     let mut entry = producer.next_entry().unwrap();
//!     entry.0 = i;
//!     entry.commit();
//! }
//!
//! handle.halt();
//! println!("sum = {}", handle.join().0);
//! ```

pub mod constants;
pub mod disruptor;
pub mod error;

pub use disruptor::{
    BatchConsumer,
    BatchHandler,
    ClaimedEntry,
    Consumer,
    ConsumerBarrier,
    Entry,
    EntryFactory,
    ProducerBarrier,
    RingBuffer,
    RingBufferConfig,
    Sequence,
    WaitStrategy,
    WaitStrategyType,
};
pub use error::{ Result, RingError };
