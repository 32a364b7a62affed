//! Cooperative scheduler
//!
//! Run-to-completion, single-threaded scheduling over caller-owned tasks.
//! Pending tasks sit in an intrusive singly-linked list ordered so that
//! immediate tasks come first, timed tasks follow by ascending due time, and
//! equal ranks keep submission order.
//!
//! Each [`step`](Scheduler::step):
//! 1. drains the ISR ingestion queue into the pending list
//! 2. reads the clock
//! 3. runs the head task if it is runnable, otherwise calls the idle task
//!
//! The head task is unlinked *before* its callback runs, so a callback may
//! remove or reschedule itself (or any other task) without corrupting the
//! list.
//!
//! The ISR queue is owned by the application, typically as a `static`
//! [`TaskQueue`], and borrowed by the scheduler. Interrupt handlers enqueue
//! [`TaskRef`]s into it directly; they never see the scheduler.
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;
use core::ptr;

use log::{trace, warn};

use crate::clock::Clock;
use crate::config::ISR_QUEUE_CAPACITY;
use crate::error::Result;
use crate::isr_queue::{Drain, Handoff, IsrQueue};
use crate::task::{Event, Task, TaskRef};

/// ISR ingestion queue of `N` task handles
///
/// `Sync`, and `const`-constructible, so it can be a `static` shared by
/// interrupt handlers and the scheduler that drains it.
pub type TaskQueue<'a, C, const N: usize = ISR_QUEUE_CAPACITY> = IsrQueue<TaskRef<'a, C>, N>;

/// What a single [`Scheduler::step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A pending task was popped and called
    Ran,
    /// Nothing was runnable; the idle task (if any) was called
    Idled,
}

/// Scheduler execution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Calls to `step()`
    pub steps: u64,
    /// Steps that ran a task
    pub runs: u64,
    /// Steps that went idle
    pub idles: u64,
    /// Tasks ingested from the ISR queue
    pub drained: u64,
}

/// Cooperative scheduler
///
/// All operations take `&self`: task callbacks receive the scheduler by
/// shared reference and may call back into it. Not `Sync`; interrupt
/// handlers only touch the borrowed [`TaskQueue`].
///
/// A task may be pending on one scheduler at a time. Scheduling a task that
/// is pending on another scheduler is refused and logged.
pub struct Scheduler<'a, C: Clock> {
    /// Time source
    clock: C,
    /// Head of the pending list
    head: Cell<Option<&'a Task<'a, C>>>,
    /// Called when nothing is runnable
    idle: Cell<Option<&'a Task<'a, C>>>,
    /// Task whose callback is executing
    current: Cell<Option<&'a Task<'a, C>>>,
    /// Interrupt-to-background hand-off, any capacity
    isr_queue: &'a dyn Handoff<TaskRef<'a, C>>,
    /// Execution counters
    stats: Cell<SchedulerStats>,
}

impl<'a, C: Clock> Scheduler<'a, C> {
    /// Create an empty scheduler driven by `clock`, draining `isr_queue`
    ///
    /// Size the queue for the worst-case burst of interrupt hand-offs
    /// between two `step()`s.
    pub const fn new(clock: C, isr_queue: &'a dyn Handoff<TaskRef<'a, C>>) -> Self {
        Self {
            clock,
            head: Cell::new(None),
            idle: Cell::new(None),
            current: Cell::new(None),
            isr_queue,
            stats: Cell::new(SchedulerStats {
                steps: 0,
                runs: 0,
                idles: 0,
                drained: 0,
            }),
        }
    }

    /// The scheduler's clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Current time according to the scheduler's clock
    pub fn now(&self) -> C::Instant {
        self.clock.now()
    }

    /// Install or clear the idle task
    pub fn set_idle_task(&self, task: Option<&'a Task<'a, C>>) {
        self.idle.set(task);
    }

    /// The idle task, if any
    pub fn idle_task(&self) -> Option<&'a Task<'a, C>> {
        self.idle.get()
    }

    /// Arm `task` to run at the next opportunity, ahead of every timed task
    /// and behind every task already armed immediate.
    ///
    /// A task that is already pending is moved, never duplicated. A task
    /// pending on another scheduler is left untouched.
    pub fn schedule_now(&self, task: &'a Task<'a, C>) {
        if !self.claim(task) {
            return;
        }
        task.set_immediate();
        self.link(task);
    }

    /// Arm `task` to run at `at`, behind every task with an equal or earlier
    /// due time.
    ///
    /// A task that is already pending is moved, never duplicated. A task
    /// pending on another scheduler is left untouched.
    pub fn schedule_at(&self, task: &'a Task<'a, C>, at: C::Instant) {
        if !self.claim(task) {
            return;
        }
        task.set_due_time(at);
        self.link(task);
    }

    /// Arm `task` to run `delay` from now
    pub fn schedule_in(&self, task: &'a Task<'a, C>, delay: C::Duration) {
        self.schedule_at(task, C::offset(self.clock.now(), delay));
    }

    /// Arm `task` one `period` after its previous due time
    ///
    /// The usual idiom for periodic work: called from the task's own
    /// callback, it keeps the period free of drift from scheduling latency.
    /// A task without a due time is armed `period` from now.
    pub fn reschedule_in(&self, task: &'a Task<'a, C>, period: C::Duration) {
        let base = task.due_time().unwrap_or_else(|| self.clock.now());
        self.schedule_at(task, C::offset(base, period));
    }

    /// Withdraw a pending task
    ///
    /// Returns `false` if the task was not pending, which includes the task
    /// currently running.
    pub fn remove(&self, task: &'a Task<'a, C>) -> bool {
        self.unlink(task)
    }

    /// Hand a task over through the ISR queue
    ///
    /// The task keeps whatever due time or immediate flag it was armed with
    /// and is linked in during the next [`step`](Self::step). Fails with
    /// [`Error::Full`](crate::Error::Full) when the ISR queue is full; the
    /// task is then dropped. Interrupt handlers, which cannot reach the
    /// scheduler, enqueue a [`TaskRef`] into the queue itself.
    #[inline]
    pub fn schedule_from_isr(&self, task: &'a Task<'a, C>) -> Result<()> {
        self.isr_queue.enqueue(TaskRef::new(task))
    }

    /// The ISR ingestion queue feeding this scheduler
    pub fn isr_queue(&self) -> &'a dyn Handoff<TaskRef<'a, C>> {
        self.isr_queue
    }

    /// Task whose callback is executing, if any
    pub fn current_task(&self) -> Option<&'a Task<'a, C>> {
        self.current.get()
    }

    /// Is `task` linked into this scheduler's pending list?
    pub fn is_pending(&self, task: &Task<'a, C>) -> bool {
        self.pending().any(|t| ptr::eq(t, task))
    }

    /// Number of pending tasks
    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Pending tasks in run order
    pub fn pending(&self) -> Pending<'a, C> {
        Pending {
            cursor: self.head.get(),
        }
    }

    /// Next task in line
    pub fn peek(&self) -> Option<&'a Task<'a, C>> {
        self.head.get()
    }

    /// Due time of the next task in line, `None` if nothing is pending or the
    /// head is immediate
    pub fn next_due(&self) -> Option<C::Instant> {
        self.head.get().and_then(|t| t.due_time())
    }

    /// Would `step()` run a task right now?
    ///
    /// Also true while the ISR queue holds tasks that are not linked yet.
    pub fn has_runnable(&self) -> bool {
        if !self.isr_queue.is_empty() {
            return true;
        }
        match self.head.get() {
            Some(task) => task.is_runnable(self.clock.now()),
            None => false,
        }
    }

    /// Execution counters so far
    pub fn stats(&self) -> SchedulerStats {
        self.stats.get()
    }

    /// Run one scheduling step
    pub fn step(&self) -> StepOutcome {
        let mut stats = self.stats.get();
        stats.steps += 1;

        let mut drained = 0u64;
        for handle in Drain::new(self.isr_queue) {
            let task = handle.task();
            if self.claim(task) {
                self.link(task);
                drained += 1;
            }
        }
        if drained > 0 {
            trace!("ingested {} task(s) from ISR queue", drained);
            stats.drained += drained;
        }

        let now = self.clock.now();
        let popped = match self.head.get() {
            Some(task) if task.is_runnable(now) => {
                self.unlink(task);
                stats.runs += 1;
                Some(task)
            }
            _ => {
                stats.idles += 1;
                None
            }
        };
        // Commit before calling out: callbacks may read the counters.
        self.stats.set(stats);

        match popped {
            Some(task) => {
                trace!("run {}", task.name());
                self.current.set(Some(task));
                task.call(&self.clock, Event::Scheduled(self));
                self.current.set(None);
                StepOutcome::Ran
            }
            None => {
                if let Some(idle) = self.idle.get() {
                    idle.call(&self.clock, Event::Idle(self));
                }
                StepOutcome::Idled
            }
        }
    }

    /// Step forever
    ///
    /// Real applications usually call [`step`](Self::step) from their own
    /// main loop instead, interleaved with other per-iteration work.
    pub fn run_forever(&self) -> ! {
        loop {
            self.step();
        }
    }

    /// Step until `done` holds, checking it before every step
    pub fn run_until<F>(&self, mut done: F) -> SchedulerStats
    where
        F: FnMut(&Self) -> bool,
    {
        while !done(self) {
            self.step();
        }
        self.stats()
    }

    /// Insert `task` behind every task that does not rank after it
    fn link(&self, task: &'a Task<'a, C>) {
        let mut prev: Option<&'a Task<'a, C>> = None;
        let mut cursor = self.head.get();
        while let Some(node) = cursor {
            if task.sorts_before(node) {
                break;
            }
            prev = Some(node);
            cursor = node.next.get();
        }

        task.next.set(cursor);
        match prev {
            Some(p) => p.next.set(Some(task)),
            None => self.head.set(Some(task)),
        }
        task.pending.set(true);
    }

    /// Take `task` out of this list, if it is here, ready to be re-linked
    ///
    /// Fails for a task pending on some other scheduler.
    fn claim(&self, task: &'a Task<'a, C>) -> bool {
        if self.unlink(task) || !task.is_pending() {
            return true;
        }
        warn!("{} is pending on another scheduler", task.name());
        false
    }

    /// Detach `task` if it is in this list
    fn unlink(&self, task: &'a Task<'a, C>) -> bool {
        if !task.is_pending() {
            return false;
        }

        let mut prev: Option<&'a Task<'a, C>> = None;
        let mut cursor = self.head.get();
        while let Some(node) = cursor {
            if ptr::eq(node, task) {
                let next = node.next.get();
                match prev {
                    Some(p) => p.next.set(next),
                    None => self.head.set(next),
                }
                task.next.set(None);
                task.pending.set(false);
                return true;
            }
            prev = Some(node);
            cursor = node.next.get();
        }
        false
    }
}

/// Iterator over a scheduler's pending tasks, in run order
pub struct Pending<'a, C: Clock> {
    cursor: Option<&'a Task<'a, C>>,
}

impl<'a, C: Clock> Iterator for Pending<'a, C> {
    type Item = &'a Task<'a, C>;

    fn next(&mut self) -> Option<Self::Item> {
        let task = self.cursor?;
        self.cursor = task.next.get();
        Some(task)
    }
}
