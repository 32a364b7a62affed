//! Result codes shared by the queue, scheduler and broadcast manager
//!
//! Every operation reports its own outcome synchronously. Nothing in this
//! crate panics, halts or resets on these paths.
//!
//! Author: Moroya Sakamoto

/// Crate-wide error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// ISR queue or broadcast pool is exhausted
    #[error("capacity exhausted")]
    Full,
    /// Nothing to dequeue
    #[error("queue is empty")]
    Empty,
    /// Channel is outside the declared range or is the unassigned sentinel
    #[error("illegal broadcast channel")]
    IllegalChannel,
    /// Unsubscribe of a (channel, task) pair that was never subscribed
    #[error("subscription not found")]
    NotFound,
}

pub type Result<T> = core::result::Result<T, Error>;
