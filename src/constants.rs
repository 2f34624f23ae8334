//! ringseq constants
//!
//! Core constants used by the ring buffer and its barriers.

use std::time::Duration;

/// Sequence value meaning "nothing published or processed yet"
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Default ring buffer size (must be power of 2)
pub const DEFAULT_RING_BUFFER_SIZE: usize = 1024; // 1K slots

/// Maximum ring buffer size
pub const MAX_RING_BUFFER_SIZE: usize = 64 * 1024 * 1024; // 64M slots

/// Batch consumers a ring tracks by default
pub const DEFAULT_MAX_CONSUMERS: usize = 64;

/// Spins before the yielding strategy starts yielding the thread
pub const DEFAULT_YIELD_SPINS: u32 = 100;

/// Sleep between polls once the sleeping strategy has given up spinning
pub const DEFAULT_SLEEP_DURATION: Duration = Duration::from_micros(100);

/// Upper bound on a single condvar wait in the blocking strategy.
/// Bounds how long dependency progress can go unnoticed.
pub const DEFAULT_BLOCKING_TIMEOUT: Duration = Duration::from_millis(1);
