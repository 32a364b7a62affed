//! Compile-time limits
//!
//! Everything here is fixed at build time. Nothing in the crate allocates.
//!
//! Author: Moroya Sakamoto

/// Default number of slots in a `TaskQueue`.
///
/// Applications pick their own size for the worst-case burst of interrupt
/// hand-offs between two `step()`s. An overflowing enqueue drops the task.
pub const ISR_QUEUE_CAPACITY: usize = 16;

/// Default number of (channel, task) records in a `Broadcaster`.
pub const BROADCAST_POOL_SIZE: usize = 16;

/// Upper bound on the declared channel range of a `Broadcaster`.
/// The two values above it are reserved for the wildcard and the
/// unassigned sentinel.
pub const MAX_CHANNELS: u16 = u16::MAX - 1;
