//! Bounded multi-producer/multi-consumer queue over a fixed ring of slots.
//!
//! Two 64-bit position counters only ever grow; a position maps to its slot
//! with `position & (N - 1)`. One slot is always left free so that a full ring
//! never looks like an empty one.
//!
//! ```text
//!   dequeue_pos                enqueue_pos
//!        │                          │
//!        ▼                          ▼
//!   ┌────┬────┬────┬────┬────┬────┬────┬────┐
//!   │ v3 │ v4 │ v5 │ v6 │    │    │    │    │   N = 8, capacity() = 7
//!   └────┴────┴────┴────┴────┴────┴────┴────┘
//! ```
//!
//! Every slot carries a sequence stamp. A producer that wins the CAS on
//! `enqueue_pos` writes its value and then publishes `pos + 1` into the stamp
//! with release ordering; a consumer only claims a position whose stamp shows
//! the value is in place, and hands the slot back for the next lap by storing
//! `pos + N`. No operation ever blocks.

use std::{
    cell::UnsafeCell,
    fmt,
    mem::MaybeUninit,
    sync::atomic::{AtomicU64, Ordering},
};

struct Slot<T> {
    stamp: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity lock-free queue holding up to `N - 1` elements.
///
/// `N` must be a power of two greater than one. Any other value fails to
/// compile as soon as [`BoundedRingQueue::new`] is instantiated.
///
/// ```rust
/// use msgloop::BoundedRingQueue;
///
/// let queue: BoundedRingQueue<u32, 4> = BoundedRingQueue::new();
/// assert_eq!(queue.capacity(), 3);
/// assert!(queue.try_enqueue(7).is_ok());
/// assert_eq!(queue.try_dequeue(), Some(7));
/// assert!(queue.is_empty());
/// ```
pub struct BoundedRingQueue<T, const N: usize> {
    slots: Box<[Slot<T>]>,
    enqueue_pos: AtomicU64,
    dequeue_pos: AtomicU64,
}

// Safety: a slot's value is only touched by the single thread that won the
// CAS for its position, and the stamp hand-off orders those accesses.
unsafe impl<T: Send, const N: usize> Send for BoundedRingQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for BoundedRingQueue<T, N> {}

impl<T, const N: usize> BoundedRingQueue<T, N> {
    const CAPACITY_CHECK: () = assert!(
        N > 1 && N.is_power_of_two(),
        "BoundedRingQueue capacity must be a power of two greater than one"
    );

    const MASK: u64 = (N as u64).wrapping_sub(1);

    const USABLE: u64 = (N as u64).wrapping_sub(1);

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_CHECK;

        let slots = (0..N as u64)
            .map(|position| Slot {
                stamp: AtomicU64::new(position),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            slots,
            enqueue_pos: AtomicU64::new(0),
            dequeue_pos: AtomicU64::new(0),
        }
    }

    /// Attempts to push `value` onto the tail of the queue.
    ///
    /// Returns the value back as `Err` when the queue already holds
    /// [`capacity()`](Self::capacity) elements. Never blocks and never
    /// overwrites a queued element.
    pub fn try_enqueue(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);

        loop {
            let dequeue_pos = self.dequeue_pos.load(Ordering::Acquire);
            // a stale `pos` can trail `dequeue_pos`; the CAS below catches it
            if pos.saturating_sub(dequeue_pos) >= Self::USABLE {
                return Err(value);
            }

            let slot = self.slot(pos);
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == pos {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: winning the CAS grants exclusive ownership of
                        // this slot until the stamp is republished.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.stamp.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if stamp < pos {
                // previous lap's consumer is still moving its value out
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to pop the element at the head of the queue.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);

        loop {
            let slot = self.slot(pos);
            let stamp = slot.stamp.load(Ordering::Acquire);
            let filled = pos + 1;

            if stamp == filled {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    filled,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the acquire load of `stamp == pos + 1` observed
                        // the producer's write, and the CAS made us its only reader.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.stamp.store(pos + N as u64, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if stamp < filled {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Number of queued elements at the time of the call.
    ///
    /// Exact when no other thread is operating on the queue.
    pub fn approximate_size(&self) -> usize {
        let dequeue_pos = self.dequeue_pos.load(Ordering::Acquire);
        let enqueue_pos = self.enqueue_pos.load(Ordering::Acquire);
        enqueue_pos.saturating_sub(dequeue_pos).min(Self::USABLE) as usize
    }

    pub fn is_empty(&self) -> bool {
        let dequeue_pos = self.dequeue_pos.load(Ordering::Acquire);
        let enqueue_pos = self.enqueue_pos.load(Ordering::Acquire);
        enqueue_pos == dequeue_pos
    }

    /// Usable capacity, `N - 1`.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    #[inline]
    fn slot(&self, position: u64) -> &Slot<T> {
        &self.slots[(position & Self::MASK) as usize]
    }
}

impl<T, const N: usize> Default for BoundedRingQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for BoundedRingQueue<T, N> {
    fn drop(&mut self) {
        while self.try_dequeue().is_some() {}
    }
}

impl<T, const N: usize> fmt::Debug for BoundedRingQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedRingQueue")
            .field("capacity", &self.capacity())
            .field("approximate_size", &self.approximate_size())
            .finish()
    }
}
