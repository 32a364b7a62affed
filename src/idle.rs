//! Idle task strategies
//!
//! The scheduler calls its idle task whenever nothing is runnable. Three
//! configurations are common:
//! - do nothing: no idle task, or a task without a callback
//! - [`BusyPoll`]: spin until a pending task becomes runnable
//! - [`SleepUntilDue`]: park the core until the next due time
//!
//! Sleeping has an inherent race: an interrupt may arm a task between the
//! readiness check and entering sleep. `SleepUntilDue` re-checks right before
//! sleeping, and the [`Sleep`] implementation must wake on any interrupt
//! (as `wfi` does) so the next `step()` sees the new work.
//!
//! Author: Moroya Sakamoto

use core::hint;

use crate::clock::Clock;
use crate::task::{Callback, Event, Task};

/// Spin until some pending task is runnable
///
/// Returns at once when nothing is pending and the ISR queue is empty,
/// since only an interrupt could then produce work.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusyPoll;

impl<C: Clock> Callback<C> for BusyPoll {
    fn call<'a>(&self, _task: &'a Task<'a, C>, event: Event<'_, 'a, C>) {
        let Some(sched) = event.scheduler() else {
            return;
        };
        while sched.peek().is_some() && !sched.has_runnable() {
            hint::spin_loop();
        }
    }
}

/// Platform hook that parks the core
pub trait Sleep<C: Clock> {
    /// Sleep until `wake_at` or until any interrupt, whichever comes first.
    /// `None` means no timed work is pending: sleep until an interrupt.
    fn sleep_until(&self, wake_at: Option<C::Instant>);
}

/// Sleep until the next known due time
pub struct SleepUntilDue<S> {
    sleeper: S,
}

impl<S> SleepUntilDue<S> {
    /// Wrap a platform sleep hook
    pub const fn new(sleeper: S) -> Self {
        Self { sleeper }
    }

    /// The wrapped hook
    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }
}

impl<C: Clock, S: Sleep<C>> Callback<C> for SleepUntilDue<S> {
    fn call<'a>(&self, _task: &'a Task<'a, C>, event: Event<'_, 'a, C>) {
        let Some(sched) = event.scheduler() else {
            return;
        };
        // Work may have arrived since step() decided to idle.
        if sched.has_runnable() {
            return;
        }
        self.sleeper.sleep_until(sched.next_due());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Tick, TickClock};
    use crate::isr_queue::IsrQueue;
    use crate::scheduler::{Scheduler, StepOutcome, TaskQueue};
    use core::cell::{Cell, RefCell};
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::vec::Vec;

    /// Clock that moves forward one tick every time it is read
    #[derive(Default)]
    struct DriftingClock {
        ticks: AtomicU32,
    }

    impl Clock for DriftingClock {
        type Instant = Tick;
        type Duration = i32;

        fn now(&self) -> Tick {
            let t = self.ticks.load(Ordering::Relaxed);
            self.ticks.store(t + 1, Ordering::Relaxed);
            Tick(t)
        }

        fn offset(t: Tick, d: i32) -> Tick {
            TickClock::offset(t, d)
        }

        fn difference(t1: Tick, t2: Tick) -> i32 {
            TickClock::difference(t1, t2)
        }

        fn precedes(t1: Tick, t2: Tick) -> bool {
            TickClock::precedes(t1, t2)
        }
    }

    struct Nop;

    impl<C: Clock> Callback<C> for Nop {
        fn call<'a>(&self, _task: &'a Task<'a, C>, _event: Event<'_, 'a, C>) {}
    }

    /// Records requested wake times and jumps the clock there
    struct FakeSleep<'c> {
        clock: &'c TickClock,
        requests: RefCell<Vec<Option<Tick>>>,
    }

    impl Sleep<&TickClock> for FakeSleep<'_> {
        fn sleep_until(&self, wake_at: Option<Tick>) {
            self.requests.borrow_mut().push(wake_at);
            if let Some(t) = wake_at {
                self.clock.set(t);
            }
        }
    }

    #[test]
    fn test_busy_poll_waits_for_due_task() {
        let poll = BusyPoll;
        let nop = Nop;
        let task: Task<'_, DriftingClock> = Task::at("later", Tick(0), &nop);
        let idle: Task<'_, DriftingClock> = Task::immediate("idle", &poll);

        let queue: TaskQueue<'_, DriftingClock> = IsrQueue::new();
        let sched = Scheduler::new(DriftingClock::default(), &queue);
        sched.set_idle_task(Some(&idle));
        sched.schedule_in(&task, 20);

        assert_eq!(sched.step(), StepOutcome::Idled);
        assert!(sched.has_runnable());
        assert_eq!(sched.step(), StepOutcome::Ran);
    }

    #[test]
    fn test_busy_poll_returns_when_nothing_pending() {
        let poll = BusyPoll;
        let idle: Task<'_, TickClock> = Task::immediate("idle", &poll);
        let queue: TaskQueue<'_, TickClock> = IsrQueue::new();
        let sched = Scheduler::new(TickClock::new(), &queue);
        sched.set_idle_task(Some(&idle));
        assert_eq!(sched.step(), StepOutcome::Idled);
    }

    #[test]
    fn test_sleep_until_next_due() {
        let clock = TickClock::new();
        let sleep = SleepUntilDue::new(FakeSleep {
            clock: &clock,
            requests: RefCell::new(Vec::new()),
        });
        let runs = Cell::new(0u32);

        struct Count<'r>(&'r Cell<u32>);
        impl<'c> Callback<&'c TickClock> for Count<'_> {
            fn call<'a>(&self, _task: &'a Task<'a, &'c TickClock>, _event: Event<'_, 'a, &'c TickClock>) {
                self.0.set(self.0.get() + 1);
            }
        }

        let count = Count(&runs);
        let task: Task<'_, &TickClock> = Task::at("timer", Tick(0), &count);
        let idle: Task<'_, &TickClock> = Task::immediate("idle", &sleep);

        let queue: TaskQueue<'_, &TickClock> = IsrQueue::new();
        let sched = Scheduler::new(&clock, &queue);
        sched.set_idle_task(Some(&idle));
        sched.schedule_at(&task, Tick(40));

        assert_eq!(sched.step(), StepOutcome::Idled);
        assert_eq!(clock.now(), Tick(40));
        assert_eq!(sched.step(), StepOutcome::Ran);
        assert_eq!(runs.get(), 1);

        // Nothing pending: sleep until an interrupt
        assert_eq!(sched.step(), StepOutcome::Idled);
        assert_eq!(*sleep.sleeper().requests.borrow(), [Some(Tick(40)), None]);
    }

    #[test]
    fn test_sleep_skipped_when_isr_work_waiting() {
        let clock = TickClock::new();
        let sleep = SleepUntilDue::new(FakeSleep {
            clock: &clock,
            requests: RefCell::new(Vec::new()),
        });
        let nop = Nop;
        let task: Task<'_, &TickClock> = Task::immediate("from-isr", &nop);
        let idle: Task<'_, &TickClock> = Task::immediate("idle", &sleep);

        let queue: TaskQueue<'_, &TickClock> = IsrQueue::new();
        let sched = Scheduler::new(&clock, &queue);
        // Calls the idle task directly, as if an interrupt fired after
        // step() chose to idle.
        sched.schedule_from_isr(&task).unwrap();
        idle.call(sched.clock(), Event::Idle(&sched));
        assert!(sleep.sleeper().requests.borrow().is_empty());
    }
}
