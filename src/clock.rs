//! Clock abstraction — hardware-abstract time source
//!
//! The scheduler treats time as an opaque, totally-ordered value. Any type
//! implementing [`Clock`] can drive it: a SysTick counter, a free-running
//! hardware timer, or a simulated clock in tests.
//!
//! Author: Moroya Sakamoto

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Span between two instants
///
/// Profiling sums spans over a task's whole life, so the sum saturates
/// instead of overflowing.
pub trait Span: Copy + Ord + Default + fmt::Debug {
    /// `self + rhs`, clamped to the type's range
    fn saturating_add(self, rhs: Self) -> Self;
}

macro_rules! impl_span {
    ($($t:ty),*) => {
        $(
            impl Span for $t {
                #[inline]
                fn saturating_add(self, rhs: Self) -> Self {
                    <$t>::saturating_add(self, rhs)
                }
            }
        )*
    };
}

impl_span!(i16, i32, i64, isize, u16, u32, u64, usize);

impl Span for core::time::Duration {
    #[inline]
    fn saturating_add(self, rhs: Self) -> Self {
        core::time::Duration::saturating_add(self, rhs)
    }
}

/// Time source consumed by the scheduler and by task profiling
pub trait Clock {
    /// A point in time
    type Instant: Copy + PartialEq + fmt::Debug;
    /// Signed or unsigned span between two instants
    type Duration: Span;

    /// Current time
    fn now(&self) -> Self::Instant;

    /// `t + d`
    fn offset(t: Self::Instant, d: Self::Duration) -> Self::Instant;

    /// `t1 - t2`
    fn difference(t1: Self::Instant, t2: Self::Instant) -> Self::Duration;

    /// Is `t1` strictly earlier than `t2`?
    fn precedes(t1: Self::Instant, t2: Self::Instant) -> bool;

    /// Same instant
    fn equals(t1: Self::Instant, t2: Self::Instant) -> bool {
        t1 == t2
    }

    /// Is `t1` strictly later than `t2`?
    fn follows(t1: Self::Instant, t2: Self::Instant) -> bool {
        Self::precedes(t2, t1)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    type Instant = C::Instant;
    type Duration = C::Duration;

    fn now(&self) -> Self::Instant {
        (**self).now()
    }

    fn offset(t: Self::Instant, d: Self::Duration) -> Self::Instant {
        C::offset(t, d)
    }

    fn difference(t1: Self::Instant, t2: Self::Instant) -> Self::Duration {
        C::difference(t1, t2)
    }

    fn precedes(t1: Self::Instant, t2: Self::Instant) -> bool {
        C::precedes(t1, t2)
    }
}

/// Raw tick count of a [`TickClock`]
///
/// Wraps at 2^32. Ordering is only meaningful between instants less than
/// 2^31 ticks apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(pub u32);

/// Tick counter advanced from a timer interrupt
///
/// The interrupt handler is the only writer; the background context only
/// reads. Both sides take `&self`, so the clock can live in a `static`.
pub struct TickClock {
    ticks: AtomicU32,
}

impl TickClock {
    /// Clock starting at tick 0
    pub const fn new() -> Self {
        Self::starting_at(Tick(0))
    }

    /// Clock starting at an arbitrary tick (useful to exercise wraparound)
    pub const fn starting_at(start: Tick) -> Self {
        Self {
            ticks: AtomicU32::new(start.0),
        }
    }

    /// Advance by one tick. Call from the timer interrupt.
    #[inline]
    pub fn tick(&self) {
        self.advance(1);
    }

    /// Advance by `n` ticks
    ///
    /// Load + store rather than `fetch_add`: there is a single writer, and
    /// cores without atomic read-modify-write (Cortex-M0) still support it.
    pub fn advance(&self, n: u32) {
        let t = self.ticks.load(Ordering::Relaxed);
        self.ticks.store(t.wrapping_add(n), Ordering::Release);
    }

    /// Jump to an absolute tick
    pub fn set(&self, t: Tick) {
        self.ticks.store(t.0, Ordering::Release);
    }

    /// Ticks elapsed since `reference`
    pub fn elapsed_since(&self, reference: Tick) -> u32 {
        self.now().0.wrapping_sub(reference.0)
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TickClock {
    type Instant = Tick;
    type Duration = i32;

    #[inline]
    fn now(&self) -> Tick {
        Tick(self.ticks.load(Ordering::Acquire))
    }

    fn offset(t: Tick, d: i32) -> Tick {
        Tick(t.0.wrapping_add(d as u32))
    }

    fn difference(t1: Tick, t2: Tick) -> i32 {
        t1.0.wrapping_sub(t2.0) as i32
    }

    fn precedes(t1: Tick, t2: Tick) -> bool {
        Self::difference(t1, t2) < 0
    }
}

#[cfg(feature = "std")]
pub use self::monotonic::MonotonicClock;

#[cfg(feature = "std")]
mod monotonic {
    use super::Clock;
    use std::time::{Duration, Instant};

    /// Hosted clock backed by `std::time::Instant`
    #[derive(Debug, Default, Clone, Copy)]
    pub struct MonotonicClock;

    impl Clock for MonotonicClock {
        type Instant = Instant;
        type Duration = Duration;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn offset(t: Instant, d: Duration) -> Instant {
            t + d
        }

        /// Saturates at zero when `t1` precedes `t2`
        fn difference(t1: Instant, t2: Instant) -> Duration {
            t1.saturating_duration_since(t2)
        }

        fn precedes(t1: Instant, t2: Instant) -> bool {
            t1 < t2
        }
    }
}
