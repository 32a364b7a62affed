//! mulib — cooperative scheduling core for bare-metal targets
//!
//! Run-to-completion task scheduling without an RTOS:
//! - Caller-owned tasks linked intrusively (no heap, no allocation)
//! - Time-ordered pending list with immediate tasks first, FIFO on ties
//! - Lock-free SPSC queue for handing tasks over from interrupt handlers
//! - Publish/subscribe broadcast fan-out, independent of time ordering
//!
//! ```text
//!   interrupt context          background context
//!   ─────────────────          ─────────────────────────────────────
//!   TaskRef ──► TaskQueue (static) ──► Scheduler::step ──► Task::call
//!                                          │
//!                                          └─ nothing runnable ──► idle task
//!
//!   Broadcaster::notify ─────────────────────────────────────► Task::call
//! ```
//!
//! Author: Moroya Sakamoto

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod config;
pub mod error;
pub mod clock;
pub mod task;
pub mod isr_queue;
pub mod scheduler;
pub mod broadcast;
pub mod idle;

pub use broadcast::{Broadcaster, Channel};
pub use clock::{Clock, Span, Tick, TickClock};
pub use error::{Error, Result};
pub use idle::{BusyPoll, Sleep, SleepUntilDue};
pub use isr_queue::{Handoff, IsrQueue};
pub use scheduler::{Scheduler, SchedulerStats, StepOutcome, TaskQueue};
pub use task::{Callback, Event, Task, TaskRef};

#[cfg(feature = "std")]
pub use clock::MonotonicClock;

#[cfg(feature = "profiling")]
pub use task::Profile;
