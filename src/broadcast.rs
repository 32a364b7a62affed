//! Broadcast manager — publish/subscribe fan-out over tasks
//!
//! Event-driven, not time-driven. `notify` calls every matching subscriber
//! synchronously in the caller's context; nothing goes through the
//! scheduler's time ordering.
//!
//! Subscriptions live in a fixed pool of (channel, task) records. A pair is
//! stored at most once, so subscribe and unsubscribe behave as set
//! operations.
//!
//! Author: Moroya Sakamoto

use core::fmt;
use core::ptr;

use heapless::Vec;
use log::{debug, warn};

use crate::clock::Clock;
use crate::config::{BROADCAST_POOL_SIZE, MAX_CHANNELS};
use crate::error::{Error, Result};
use crate::task::{Event, Task};

/// Broadcast topic identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(pub u16);

impl Channel {
    /// Notify every subscriber of every channel
    pub const WILDCARD: Channel = Channel(u16::MAX - 1);
    /// Reserved "no channel" value, never legal
    pub const UNASSIGNED: Channel = Channel(u16::MAX);

    /// Is this the wildcard?
    pub const fn is_wildcard(self) -> bool {
        self.0 == Self::WILDCARD.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Channel::WILDCARD => f.write_str("*"),
            Channel::UNASSIGNED => f.write_str("unassigned"),
            Channel(n) => write!(f, "{}", n),
        }
    }
}

struct Subscription<'a, C: Clock> {
    channel: Channel,
    task: &'a Task<'a, C>,
}

impl<'a, C: Clock> Subscription<'a, C> {
    fn is(&self, channel: Channel, task: &Task<'a, C>) -> bool {
        self.channel == channel && ptr::eq(self.task, task)
    }
}

/// Many-to-many broadcaster over `N` subscription records
///
/// Legal channels are `0..channel_count`.
///
/// `clock` is read around every call to profile it. Pass a shared reference
/// to the clock the timer interrupt advances, such as `&'static TickClock`:
/// a broadcaster owning a private `TickClock` sees a counter that never
/// moves, so profiled runtimes stay at zero.
pub struct Broadcaster<'a, C: Clock, const N: usize = BROADCAST_POOL_SIZE> {
    /// Read for task profiling, usually `&TickClock`
    clock: C,
    /// Exclusive upper bound of legal channels
    channel_count: u16,
    /// Subscription pool, in subscription order
    subscriptions: Vec<Subscription<'a, C>, N>,
}

impl<'a, C: Clock, const N: usize> Broadcaster<'a, C, N> {
    /// Broadcaster with channels `0..channel_count`
    ///
    /// `channel_count` is clamped to [`MAX_CHANNELS`] so the wildcard and the
    /// unassigned sentinel stay out of range.
    pub const fn new(clock: C, channel_count: u16) -> Self {
        let channel_count = if channel_count > MAX_CHANNELS {
            MAX_CHANNELS
        } else {
            channel_count
        };
        Self {
            clock,
            channel_count,
            subscriptions: Vec::new(),
        }
    }

    /// Number of legal channels
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Is `channel` a legal subscription target?
    pub fn is_legal(&self, channel: Channel) -> bool {
        channel.0 < self.channel_count
    }

    /// Subscribe `task` to `channel`
    ///
    /// Subscribing an existing pair changes nothing and succeeds, even when
    /// the pool is full.
    pub fn subscribe(&mut self, channel: Channel, task: &'a Task<'a, C>) -> Result<()> {
        if !self.is_legal(channel) {
            warn!("subscribe {} to illegal channel {}", task.name(), channel);
            return Err(Error::IllegalChannel);
        }
        if self.is_subscribed(channel, task) {
            return Ok(());
        }
        if self.subscriptions.push(Subscription { channel, task }).is_err() {
            warn!("broadcast pool full ({} records), dropping {} on {}", N, task.name(), channel);
            return Err(Error::Full);
        }
        debug!("{} subscribed to {}", task.name(), channel);
        Ok(())
    }

    /// Remove the (`channel`, `task`) pair
    pub fn unsubscribe(&mut self, channel: Channel, task: &'a Task<'a, C>) -> Result<()> {
        let idx = self
            .subscriptions
            .iter()
            .position(|s| s.is(channel, task))
            .ok_or(Error::NotFound)?;
        self.subscriptions.remove(idx);
        debug!("{} unsubscribed from {}", task.name(), channel);
        Ok(())
    }

    /// Remove every subscription of `task`, returning how many were dropped
    pub fn unsubscribe_all(&mut self, task: &'a Task<'a, C>) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| !ptr::eq(s.task, task));
        let removed = before - self.subscriptions.len();
        if removed > 0 {
            debug!("{} unsubscribed from {} channel(s)", task.name(), removed);
        }
        removed
    }

    /// Is `task` subscribed to `channel`?
    pub fn is_subscribed(&self, channel: Channel, task: &Task<'a, C>) -> bool {
        self.subscriptions.iter().any(|s| s.is(channel, task))
    }

    /// Number of distinct tasks `notify(channel, ..)` would call
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.matching(channel).count()
    }

    /// Call every subscriber of `channel` (every subscriber for the wildcard)
    /// with `payload`, each exactly once.
    ///
    /// Returns the number of tasks called. Runs synchronously in the
    /// caller's context.
    pub fn notify(&self, channel: Channel, payload: u32) -> Result<usize> {
        if channel == Channel::UNASSIGNED {
            warn!("notify on unassigned channel");
            return Err(Error::IllegalChannel);
        }
        let mut called = 0;
        for task in self.matching(channel) {
            task.call(&self.clock, Event::Broadcast { channel, payload });
            called += 1;
        }
        Ok(called)
    }

    /// Subscription records in use
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// No subscriptions?
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Size of the subscription pool
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Distinct tasks matching `channel`, in subscription order
    fn matching(&self, channel: Channel) -> impl Iterator<Item = &'a Task<'a, C>> + '_ {
        let wildcard = channel.is_wildcard();
        self.subscriptions
            .iter()
            .enumerate()
            .filter(move |(i, s)| {
                if wildcard {
                    // First record of each task only
                    !self.subscriptions[..*i].iter().any(|e| ptr::eq(e.task, s.task))
                } else {
                    s.channel == channel
                }
            })
            .map(|(_, s)| s.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TickClock;
    use crate::task::Callback;
    use core::cell::{Cell, RefCell};
    use std::vec::Vec as StdVec;

    type TestTask<'a> = Task<'a, TickClock>;

    const A: Channel = Channel(0);
    const B: Channel = Channel(1);

    /// Counts calls and records the channels they arrived on
    #[derive(Default)]
    struct Listener {
        hits: Cell<u32>,
        channels: RefCell<StdVec<Channel>>,
    }

    impl Callback<TickClock> for Listener {
        fn call<'a>(&self, _task: &'a Task<'a, TickClock>, event: Event<'_, 'a, TickClock>) {
            self.hits.set(self.hits.get() + 1);
            if let Event::Broadcast { channel, .. } = event {
                self.channels.borrow_mut().push(channel);
            }
        }
    }

    /// Two listeners on A and B; X on both, Y on B only.
    #[test]
    fn test_channel_fanout() {
        let lx = Listener::default();
        let ly = Listener::default();
        let x = TestTask::immediate("X", &lx);
        let y = TestTask::immediate("Y", &ly);

        let mut bus = Broadcaster::<TickClock, 8>::new(TickClock::new(), 4);
        bus.subscribe(A, &x).unwrap();
        bus.subscribe(B, &x).unwrap();
        bus.subscribe(B, &y).unwrap();

        assert_eq!(bus.notify(A, 0), Ok(1));
        assert_eq!((lx.hits.get(), ly.hits.get()), (1, 0));

        assert_eq!(bus.notify(B, 0), Ok(2));
        assert_eq!((lx.hits.get(), ly.hits.get()), (2, 1));

        bus.unsubscribe(A, &x).unwrap();
        assert_eq!(bus.notify(A, 0), Ok(0));
        assert_eq!((lx.hits.get(), ly.hits.get()), (2, 1));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let l = Listener::default();
        let t = TestTask::immediate("t", &l);

        let mut bus = Broadcaster::<TickClock, 4>::new(TickClock::new(), 4);
        bus.subscribe(A, &t).unwrap();
        bus.subscribe(A, &t).unwrap();
        assert_eq!(bus.len(), 1);

        assert_eq!(bus.notify(A, 9), Ok(1));
        assert_eq!(l.hits.get(), 1);
    }

    #[test]
    fn test_wildcard_calls_each_once() {
        let lx = Listener::default();
        let ly = Listener::default();
        let x = TestTask::immediate("X", &lx);
        let y = TestTask::immediate("Y", &ly);

        let mut bus = Broadcaster::<TickClock, 8>::new(TickClock::new(), 4);
        bus.subscribe(A, &x).unwrap();
        bus.subscribe(B, &x).unwrap();
        bus.subscribe(Channel(2), &x).unwrap();
        bus.subscribe(B, &y).unwrap();

        assert_eq!(bus.subscriber_count(Channel::WILDCARD), 2);
        assert_eq!(bus.notify(Channel::WILDCARD, 1), Ok(2));
        assert_eq!((lx.hits.get(), ly.hits.get()), (1, 1));
        assert_eq!(*lx.channels.borrow(), [Channel::WILDCARD]);
    }

    #[test]
    fn test_illegal_channels() {
        let l = Listener::default();
        let t = TestTask::immediate("t", &l);

        let mut bus = Broadcaster::<TickClock, 4>::new(TickClock::new(), 4);
        assert_eq!(bus.subscribe(Channel(4), &t), Err(Error::IllegalChannel));
        assert_eq!(bus.subscribe(Channel::UNASSIGNED, &t), Err(Error::IllegalChannel));
        assert_eq!(bus.subscribe(Channel::WILDCARD, &t), Err(Error::IllegalChannel));
        assert_eq!(bus.notify(Channel::UNASSIGNED, 0), Err(Error::IllegalChannel));
        assert!(bus.is_empty());
    }

    #[test]
    fn test_pool_exhaustion() {
        let l = Listener::default();
        let t = TestTask::immediate("t", &l);

        let mut bus = Broadcaster::<TickClock, 2>::new(TickClock::new(), 4);
        assert_eq!(bus.capacity(), 2);
        bus.subscribe(A, &t).unwrap();
        bus.subscribe(B, &t).unwrap();
        assert_eq!(bus.subscribe(Channel(2), &t), Err(Error::Full));
        // Existing pair still accepted when full
        assert_eq!(bus.subscribe(A, &t), Ok(()));
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn test_unsubscribe_missing() {
        let l = Listener::default();
        let t = TestTask::immediate("t", &l);

        let mut bus = Broadcaster::<TickClock, 4>::new(TickClock::new(), 4);
        assert_eq!(bus.unsubscribe(A, &t), Err(Error::NotFound));
        bus.subscribe(A, &t).unwrap();
        assert_eq!(bus.unsubscribe(B, &t), Err(Error::NotFound));
        assert_eq!(bus.unsubscribe(A, &t), Ok(()));
        assert_eq!(bus.unsubscribe(A, &t), Err(Error::NotFound));
    }

    #[test]
    fn test_unsubscribe_all() {
        let lx = Listener::default();
        let ly = Listener::default();
        let x = TestTask::immediate("X", &lx);
        let y = TestTask::immediate("Y", &ly);

        let mut bus = Broadcaster::<TickClock, 8>::new(TickClock::new(), 4);
        bus.subscribe(A, &x).unwrap();
        bus.subscribe(B, &y).unwrap();
        bus.subscribe(B, &x).unwrap();

        assert_eq!(bus.unsubscribe_all(&x), 2);
        assert!(!bus.is_subscribed(A, &x));
        assert!(bus.is_subscribed(B, &y));
        assert_eq!(bus.notify(Channel::WILDCARD, 0), Ok(1));
        assert_eq!(lx.hits.get(), 0);
    }

    #[test]
    fn test_payload_and_order() {
        /// Logs (name, payload) pairs into a shared trace
        struct Tracer<'l> {
            trace: &'l RefCell<StdVec<(&'static str, u32)>>,
        }

        impl Callback<TickClock> for Tracer<'_> {
            fn call<'a>(&self, task: &'a Task<'a, TickClock>, event: Event<'_, 'a, TickClock>) {
                if let Event::Broadcast { payload, .. } = event {
                    self.trace.borrow_mut().push((task.name(), payload));
                }
            }
        }

        let trace = RefCell::new(StdVec::new());
        let tracer = Tracer { trace: &trace };
        let first = TestTask::immediate("first", &tracer);
        let second = TestTask::immediate("second", &tracer);

        let mut bus = Broadcaster::<TickClock, 4>::new(TickClock::new(), 2);
        bus.subscribe(A, &first).unwrap();
        bus.subscribe(A, &second).unwrap();
        bus.notify(A, 42).unwrap();

        assert_eq!(*trace.borrow(), [("first", 42), ("second", 42)]);
    }

    #[test]
    fn test_channel_count_clamped() {
        let bus = Broadcaster::<TickClock, 1>::new(TickClock::new(), u16::MAX);
        assert_eq!(bus.channel_count(), MAX_CHANNELS);
        assert!(!bus.is_legal(Channel::WILDCARD));
        assert!(!bus.is_legal(Channel::UNASSIGNED));
        assert!(bus.is_legal(Channel(MAX_CHANNELS - 1)));
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(std::format!("{}", Channel(3)), "3");
        assert_eq!(std::format!("{}", Channel::WILDCARD), "*");
    }

    #[cfg(feature = "profiling")]
    #[test]
    fn test_notify_profiles_calls() {
        let l = Listener::default();
        let t = TestTask::immediate("t", &l);
        let mut bus = Broadcaster::<TickClock, 4>::new(TickClock::new(), 2);
        bus.subscribe(A, &t).unwrap();
        bus.notify(A, 0).unwrap();
        bus.notify(A, 0).unwrap();
        assert_eq!(t.profile().calls, 2);
    }

    #[cfg(feature = "profiling")]
    #[test]
    fn test_notify_profiles_against_shared_clock() {
        /// Takes five ticks of the shared clock per call
        struct Slow<'c>(&'c TickClock);

        impl<'c> Callback<&'c TickClock> for Slow<'c> {
            fn call<'a>(&self, _task: &'a Task<'a, &'c TickClock>, _event: Event<'_, 'a, &'c TickClock>) {
                self.0.advance(5);
            }
        }

        let clock = TickClock::new();
        let slow = Slow(&clock);
        let t: Task<'_, &TickClock> = Task::immediate("slow", &slow);
        let mut bus = Broadcaster::<&TickClock, 4>::new(&clock, 2);
        bus.subscribe(A, &t).unwrap();
        bus.notify(A, 0).unwrap();
        bus.notify(A, 0).unwrap();

        assert_eq!(clock.now(), crate::clock::Tick(10));
        assert_eq!(t.profile().calls, 2);
        assert_eq!(t.profile().runtime, 10);
    }
}
