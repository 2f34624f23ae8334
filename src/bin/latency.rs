//! End-to-end latency probe for the ring buffer
//!
//! Run: cargo run --release --bin ringseq-latency -- [events] [busy-spin|yielding|sleeping|blocking]
//!
//! A producer stamps each entry with the time since start; a `BatchConsumer`
//! records commit-to-handle latency in an HDR histogram.

use std::env;
use std::time::Instant;

use anyhow::{ bail, Context };
use hdrhistogram::Histogram;

use ringseq::disruptor::{ BatchConsumer, BatchHandler, Consumer, Entry, RingBuffer, RingBufferConfig, WaitStrategyType };

const RING_SIZE: usize = 64 * 1024;
const DEFAULT_EVENTS: u64 = 1_000_000;

#[derive(Debug, Default)]
struct StampedEntry {
    sequence: u64,
    stamp_nanos: u64,
}

impl Entry for StampedEntry {
    fn copy_from(&mut self, other: &Self) {
        self.sequence = other.sequence;
        self.stamp_nanos = other.stamp_nanos;
    }
}

struct LatencyRecorder {
    start: Instant,
    histogram: Histogram<u64>,
    expected: u64,
    out_of_order: u64,
}

impl BatchHandler<StampedEntry> for LatencyRecorder {
    fn on_available(&mut self, entry: &StampedEntry) -> anyhow::Result<()> {
        if entry.sequence != self.expected {
            self.out_of_order += 1;
        }
        self.expected = entry.sequence + 1;

        let now = self.start.elapsed().as_nanos() as u64;
        self.histogram.record(now.saturating_sub(entry.stamp_nanos).max(1))?;
        Ok(())
    }

    fn on_completion(&mut self) {
        tracing::info!(events = self.histogram.len(), "latency recorder finished");
    }
}

fn parse_strategy(name: &str) -> anyhow::Result<WaitStrategyType> {
    Ok(match name {
        "busy-spin" => WaitStrategyType::BusySpin,
        "yielding" => WaitStrategyType::Yielding,
        "sleeping" => WaitStrategyType::Sleeping,
        "blocking" => WaitStrategyType::Blocking,
        other => bail!("unknown wait strategy '{other}'"),
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let events = match args.next() {
        Some(n) => n.parse::<u64>().with_context(|| format!("invalid event count '{n}'"))?,
        None => DEFAULT_EVENTS,
    };
    let strategy = match args.next() {
        Some(name) => parse_strategy(&name)?,
        None => WaitStrategyType::Yielding,
    };

    let config = RingBufferConfig::new(RING_SIZE)?.with_wait_strategy(strategy);
    let ring = RingBuffer::<StampedEntry>::with_config(StampedEntry::default, config)?;

    let start = Instant::now();
    let recorder = LatencyRecorder {
        start,
        histogram: Histogram::new_with_bounds(1, 60_000_000_000, 3)?,
        expected: 0,
        out_of_order: 0,
    };
    let consumer = BatchConsumer::new(ring.create_consumer_barrier(&[]), recorder)?;
    let producer = ring.create_producer_barrier(&[&consumer])?;
    let handle = consumer.spawn()?;

    tracing::info!(events, ?strategy, ring_size = RING_SIZE, "producing");
    for sequence in 0..events {
        let mut entry = producer.next_entry()?;
        entry.sequence = sequence;
        entry.stamp_nanos = start.elapsed().as_nanos() as u64;
        entry.commit();
    }

    let last = (events as i64) - 1;
    let progress = handle.sequence();
    while progress.get() < last {
        std::thread::yield_now();
    }
    let elapsed = start.elapsed();
    handle.halt();
    let recorder = handle.join();

    let h = &recorder.histogram;
    println!("events:       {}", h.len());
    println!("throughput:   {:.2} M/s", (events as f64) / elapsed.as_secs_f64() / 1e6);
    println!("out of order: {}", recorder.out_of_order);
    println!("latency (ns): min {} | p50 {} | p99 {} | p99.9 {} | max {} | mean {:.0}",
        h.min(),
        h.value_at_quantile(0.5),
        h.value_at_quantile(0.99),
        h.value_at_quantile(0.999),
        h.max(),
        h.mean()
    );

    if recorder.out_of_order > 0 {
        bail!("{} entries were delivered out of order", recorder.out_of_order);
    }
    Ok(())
}
