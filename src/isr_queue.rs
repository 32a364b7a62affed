//! Lock-free ISR ingestion queue
//!
//! Single-producer, single-consumer ring buffer that lets interrupt handlers
//! hand work to the background scheduler without masking interrupts.
//! No heap, no mutex, no critical sections, no compare-and-swap.
//!
//! Indices run modulo `2 * N`, so all `N` slots are usable:
//! empty when the indices are equal, full when they are `N` apart.
//!
//! Author: Moroya Sakamoto

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// Lock-free SPSC ring buffer of `N` copyable items
///
/// Exactly one context may call the producer side ([`enqueue`](Self::enqueue))
/// and exactly one context may call the consumer side
/// ([`dequeue`](Self::dequeue), [`drain`](Self::drain)). Using it with more
/// than one writer or more than one reader loses or duplicates items.
pub struct IsrQueue<T: Copy, const N: usize> {
    /// Ring buffer storage
    slots: [UnsafeCell<Option<T>>; N],
    /// Producer index, written only by the producer
    head: AtomicUsize,
    /// Consumer index, written only by the consumer
    tail: AtomicUsize,
    /// Rejected enqueues, written only by the producer
    overflows: AtomicUsize,
}

// The index discipline hands each slot to exactly one side at a time.
unsafe impl<T: Copy + Send, const N: usize> Sync for IsrQueue<T, N> {}

impl<T: Copy, const N: usize> IsrQueue<T, N> {
    /// Create a new empty queue
    pub const fn new() -> Self {
        const { assert!(N > 0, "IsrQueue capacity must be non-zero") };
        Self {
            slots: [const { UnsafeCell::new(None) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflows: AtomicUsize::new(0),
        }
    }

    #[inline]
    const fn wrap(index: usize) -> usize {
        (index + 1) % (2 * N)
    }

    #[inline]
    const fn distance(head: usize, tail: usize) -> usize {
        (head + 2 * N - tail) % (2 * N)
    }

    /// Push an item (producer side)
    ///
    /// Returns [`Error::Full`] and leaves the queue untouched when all `N`
    /// slots are occupied. The item is then dropped.
    pub fn enqueue(&self, item: T) -> Result<()> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if Self::distance(head, tail) == N {
            let n = self.overflows.load(Ordering::Relaxed);
            self.overflows.store(n.wrapping_add(1), Ordering::Relaxed);
            return Err(Error::Full);
        }

        // SAFETY: the slot at `head` is outside [tail, head) so the consumer
        // does not read it until the Release store below publishes it.
        unsafe { *self.slots[head % N].get() = Some(item) };
        self.head.store(Self::wrap(head), Ordering::Release);
        Ok(())
    }

    /// Pop the oldest item (consumer side)
    ///
    /// Returns [`Error::Empty`] if nothing is queued.
    pub fn dequeue(&self) -> Result<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if head == tail {
            return Err(Error::Empty);
        }

        // SAFETY: the Acquire load of `head` makes the producer's write to
        // this slot visible, and the producer will not touch it again until
        // `tail` moves past it.
        let item = unsafe { *self.slots[tail % N].get() };
        self.tail.store(Self::wrap(tail), Ordering::Release);
        item.ok_or(Error::Empty)
    }

    /// Drain everything queued at the time of the call (consumer side)
    ///
    /// Items the producer adds while draining are left for the next drain,
    /// which bounds a single drain to `N` items.
    pub fn drain(&self) -> Drain<'_, T> {
        Drain::new(self)
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        Self::distance(head, tail)
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is the queue full?
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Number of slots
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Enqueues rejected because the queue was full
    pub fn overflows(&self) -> usize {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl<T: Copy, const N: usize> Default for IsrQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// An [`IsrQueue`] with its capacity erased
///
/// Lets the consumer hold a queue of any size behind one type, so the
/// application picks `N` for its worst-case interrupt burst.
pub trait Handoff<T> {
    /// Push an item (producer side)
    fn enqueue(&self, item: T) -> Result<()>;
    /// Pop the oldest item (consumer side)
    fn dequeue(&self) -> Result<T>;
    /// Number of queued items
    fn len(&self) -> usize;
    /// Number of slots
    fn capacity(&self) -> usize;
    /// Enqueues rejected because the queue was full
    fn overflows(&self) -> usize;

    /// Is the queue empty?
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Copy, const N: usize> Handoff<T> for IsrQueue<T, N> {
    fn enqueue(&self, item: T) -> Result<()> {
        IsrQueue::enqueue(self, item)
    }

    fn dequeue(&self) -> Result<T> {
        IsrQueue::dequeue(self)
    }

    fn len(&self) -> usize {
        IsrQueue::len(self)
    }

    fn capacity(&self) -> usize {
        N
    }

    fn overflows(&self) -> usize {
        IsrQueue::overflows(self)
    }
}

/// Iterator returned by [`IsrQueue::drain`]
pub struct Drain<'q, T> {
    queue: &'q dyn Handoff<T>,
    remaining: usize,
}

impl<'q, T> Drain<'q, T> {
    /// Drain what `queue` holds right now (consumer side)
    pub fn new(queue: &'q dyn Handoff<T>) -> Self {
        Self {
            remaining: queue.len(),
            queue,
        }
    }
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.queue.dequeue().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
