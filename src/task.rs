//! Task definition — caller-owned, no-alloc units of deferred work
//!
//! A task pairs a callback (whose implementing value carries the caller's
//! context) with scheduling metadata: a due time or the immediate flag, and
//! the intrusive link the scheduler threads through its pending list.
//!
//! The application owns every task. The scheduler and broadcaster only hold
//! `&'a Task` borrows; they never copy, allocate or free one.
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;
use core::fmt;

use crate::broadcast::Channel;
use crate::clock::Clock;
#[cfg(feature = "profiling")]
use crate::clock::Span;
use crate::scheduler::Scheduler;

/// Why a task is being called
pub enum Event<'s, 'a, C: Clock> {
    /// Popped from the pending list by [`Scheduler::step`]
    Scheduled(&'s Scheduler<'a, C>),
    /// Called as the idle task because nothing was runnable
    Idle(&'s Scheduler<'a, C>),
    /// Fanned out by a broadcaster
    Broadcast {
        /// Channel the notification was published on
        channel: Channel,
        /// Publisher-supplied value
        payload: u32,
    },
}

impl<'s, 'a, C: Clock> Event<'s, 'a, C> {
    /// The scheduler behind a scheduled or idle call
    pub fn scheduler(&self) -> Option<&'s Scheduler<'a, C>> {
        match *self {
            Event::Scheduled(s) | Event::Idle(s) => Some(s),
            Event::Broadcast { .. } => None,
        }
    }
}

impl<C: Clock> Clone for Event<'_, '_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Clock> Copy for Event<'_, '_, C> {}

impl<C: Clock> fmt::Debug for Event<'_, '_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Scheduled(_) => f.write_str("Scheduled"),
            Event::Idle(_) => f.write_str("Idle"),
            Event::Broadcast { channel, payload } => f
                .debug_struct("Broadcast")
                .field("channel", channel)
                .field("payload", payload)
                .finish(),
        }
    }
}

/// Work performed when a task runs
///
/// The implementing value is the task's context. It is borrowed, never
/// inspected or owned by the scheduler.
pub trait Callback<C: Clock> {
    /// Run the task. `task` is the task being called, so the callback can
    /// reschedule or remove itself through the scheduler in `event`.
    fn call<'a>(&self, task: &'a Task<'a, C>, event: Event<'_, 'a, C>);
}

/// Profiling snapshot of a task
#[cfg(feature = "profiling")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile<D> {
    /// Number of calls
    pub calls: u32,
    /// Total time spent in the callback
    pub runtime: D,
    /// Worst observed lateness (call time minus due time)
    pub max_latency: D,
}

/// Deferred unit of work
pub struct Task<'a, C: Clock> {
    /// Diagnostic name
    name: &'static str,
    /// Callback and its context. `None` makes `call` a no-op.
    callback: Option<&'a dyn Callback<C>>,
    /// Due time, `None` for immediate
    due: Cell<Option<C::Instant>>,
    /// Intrusive link for the scheduler's pending list
    pub(crate) next: Cell<Option<&'a Task<'a, C>>>,
    /// Linked into a pending list
    pub(crate) pending: Cell<bool>,
    #[cfg(feature = "profiling")]
    calls: Cell<u32>,
    #[cfg(feature = "profiling")]
    runtime: Cell<C::Duration>,
    #[cfg(feature = "profiling")]
    max_latency: Cell<C::Duration>,
}

impl<'a, C: Clock> Task<'a, C> {
    fn build(name: &'static str, callback: Option<&'a dyn Callback<C>>, due: Option<C::Instant>) -> Self {
        Self {
            name,
            callback,
            due: Cell::new(due),
            next: Cell::new(None),
            pending: Cell::new(false),
            #[cfg(feature = "profiling")]
            calls: Cell::new(0),
            #[cfg(feature = "profiling")]
            runtime: Cell::new(C::Duration::default()),
            #[cfg(feature = "profiling")]
            max_latency: Cell::new(C::Duration::default()),
        }
    }

    /// Task with no callback, armed immediate
    pub fn empty(name: &'static str) -> Self {
        Self::build(name, None, None)
    }

    /// Task armed to run at the next opportunity
    pub fn immediate(name: &'static str, callback: &'a dyn Callback<C>) -> Self {
        Self::build(name, Some(callback), None)
    }

    /// Task armed to run at `due`
    pub fn at(name: &'static str, due: C::Instant, callback: &'a dyn Callback<C>) -> Self {
        Self::build(name, Some(callback), Some(due))
    }

    /// Diagnostic name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bind a callback. Only while not pending.
    pub fn set_callback(&mut self, callback: &'a dyn Callback<C>) {
        debug_assert!(!self.is_pending(), "callback changed on pending task {}", self.name);
        self.callback = Some(callback);
    }

    /// Unbind the callback, turning `call` into a no-op. Only while not pending.
    pub fn clear_callback(&mut self) {
        debug_assert!(!self.is_pending(), "callback cleared on pending task {}", self.name);
        self.callback = None;
    }

    /// Is a callback bound?
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Armed immediate (ranked before every timed task)?
    pub fn is_immediate(&self) -> bool {
        self.due.get().is_none()
    }

    /// Due time, `None` when immediate
    pub fn due_time(&self) -> Option<C::Instant> {
        self.due.get()
    }

    /// Arm for `t`. Only while not pending: the pending list is sorted on
    /// this key, so reschedule through the scheduler instead.
    pub fn set_due_time(&self, t: C::Instant) {
        debug_assert!(!self.is_pending(), "due time changed on pending task {}", self.name);
        self.due.set(Some(t));
    }

    /// Arm immediate. Only while not pending.
    pub fn set_immediate(&self) {
        debug_assert!(!self.is_pending(), "due time changed on pending task {}", self.name);
        self.due.set(None);
    }

    /// Push the due time back by `dt`. An immediate task stays immediate.
    /// Only while not pending.
    pub fn advance_due_time(&self, dt: C::Duration) {
        debug_assert!(!self.is_pending(), "due time changed on pending task {}", self.name);
        if let Some(t) = self.due.get() {
            self.due.set(Some(C::offset(t, dt)));
        }
    }

    /// Immediate, or due at or before `at`
    pub fn is_runnable(&self, at: C::Instant) -> bool {
        match self.due.get() {
            None => true,
            Some(due) => !C::follows(due, at),
        }
    }

    /// Linked into a scheduler's pending list?
    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Strict ordering used by the pending list: immediates first, then by
    /// due time. Equal ranks compare false so insertion stays FIFO.
    pub(crate) fn sorts_before(&self, other: &Task<'a, C>) -> bool {
        match (self.due.get(), other.due.get()) {
            (None, None) => false,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => C::precedes(a, b),
        }
    }

    /// Invoke the callback. A task without one does nothing.
    ///
    /// `clock` is read only for profiling.
    pub fn call(&'a self, clock: &C, event: Event<'_, 'a, C>) {
        let Some(callback) = self.callback else {
            return;
        };

        #[cfg(feature = "profiling")]
        {
            let start = clock.now();
            if let Some(due) = self.due.get() {
                let latency = C::difference(start, due);
                if latency > self.max_latency.get() {
                    self.max_latency.set(latency);
                }
            }
            callback.call(self, event);
            let elapsed = C::difference(clock.now(), start);
            self.runtime.set(self.runtime.get().saturating_add(elapsed));
            self.calls.set(self.calls.get().wrapping_add(1));
        }

        #[cfg(not(feature = "profiling"))]
        {
            let _ = clock;
            callback.call(self, event);
        }
    }

    /// Profiling counters so far
    #[cfg(feature = "profiling")]
    pub fn profile(&self) -> Profile<C::Duration> {
        Profile {
            calls: self.calls.get(),
            runtime: self.runtime.get(),
            max_latency: self.max_latency.get(),
        }
    }

    /// Zero the profiling counters
    #[cfg(feature = "profiling")]
    pub fn reset_profile(&self) {
        self.calls.set(0);
        self.runtime.set(C::Duration::default());
        self.max_latency.set(C::Duration::default());
    }
}

/// Handle that carries a task through an ISR queue
///
/// A `Task` keeps its metadata in `Cell`s owned by the background context,
/// so interrupt code must never touch one. A `TaskRef` is built in the
/// background context and only carries the task's address: it can be copied
/// into an interrupt handler and enqueued, and nothing else. Only the
/// scheduler draining the queue dereferences it again.
pub struct TaskRef<'a, C: Clock>(&'a Task<'a, C>);

impl<'a, C: Clock> TaskRef<'a, C> {
    /// Wrap `task` for hand-over from interrupt context
    pub fn new(task: &'a Task<'a, C>) -> Self {
        Self(task)
    }

    /// Does this handle refer to `task`?
    pub fn refers_to(&self, task: &Task<'a, C>) -> bool {
        core::ptr::eq(self.0, task)
    }

    pub(crate) fn task(self) -> &'a Task<'a, C> {
        self.0
    }
}

impl<'a, C: Clock> From<&'a Task<'a, C>> for TaskRef<'a, C> {
    fn from(task: &'a Task<'a, C>) -> Self {
        Self::new(task)
    }
}

impl<C: Clock> Clone for TaskRef<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Clock> Copy for TaskRef<'_, C> {}

// SAFETY: a TaskRef exposes no access to the task it points at. The only
// dereference is `task()`, called by the scheduler that drains the queue,
// in the background context that owns the task.
unsafe impl<C: Clock> Send for TaskRef<'_, C> {}
unsafe impl<C: Clock> Sync for TaskRef<'_, C> {}

impl<C: Clock> fmt::Debug for Task<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("due", &self.due.get())
            .field("pending", &self.pending.get())
            .finish()
    }
}
