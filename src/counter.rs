//! Dependency counters with a fixed number of waiter slots.
//!
//! A counter tracks outstanding jobs. Fibers can park on a counter until it
//! reaches an exact target value; each parked fiber occupies one slot. Every
//! increment and decrement scans the slots for targets equal to the *new*
//! value and hands matching fibers to a [`FiberWaker`].

use crate::fiber_pool::FiberIndex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// Receives fibers whose wait condition became true.
pub trait FiberWaker {
    fn wake_fiber(&self, fiber: FiberIndex);
}

/// Type-erased view of a counter, held by job records.
pub(crate) trait DependencyCounter: Send + Sync {
    fn value(&self) -> u32;
    fn increment(&self, by: u32, waker: &dyn FiberWaker) -> u32;
    fn decrement(&self, by: u32, waker: &dyn FiberWaker) -> u32;
}

/// One waiter slot.
///
/// `in_use` is true whenever the slot is not armed (free, being filled, or
/// already claimed by a waker), so no other thread ever acts on a half
/// written slot.
struct WaiterSlot {
    fiber: AtomicUsize,
    target: AtomicU32,
    in_use: AtomicBool,
}

impl WaiterSlot {
    fn new() -> Self {
        WaiterSlot {
            fiber: AtomicUsize::new(0),
            target: AtomicU32::new(0),
            in_use: AtomicBool::new(true),
        }
    }
}

struct CounterState<const WAITERS: usize> {
    value: AtomicU32,
    free_slots: [AtomicBool; WAITERS],
    slots: [WaiterSlot; WAITERS],
}

impl<const WAITERS: usize> CounterState<WAITERS> {
    fn check_waiting_fibers(&self, value: u32, waker: &dyn FiberWaker) {
        for (free, slot) in self.free_slots.iter().zip(&self.slots) {
            if free.load(Ordering::Acquire) {
                continue;
            }
            if slot.in_use.load(Ordering::Acquire) {
                continue;
            }
            if slot.target.load(Ordering::Relaxed) != value {
                continue;
            }
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            waker.wake_fiber(slot.fiber.load(Ordering::Relaxed));
            free.store(true, Ordering::Release);
        }
    }
}

impl<const WAITERS: usize> DependencyCounter for CounterState<WAITERS> {
    fn value(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    fn increment(&self, by: u32, waker: &dyn FiberWaker) -> u32 {
        let value = match self.value.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            v.checked_add(by)
        }) {
            Ok(previous) => previous + by,
            Err(previous) => panic!("counter overflow: {} + {}", previous, by),
        };
        self.check_waiting_fibers(value, waker);
        value
    }

    fn decrement(&self, by: u32, waker: &dyn FiberWaker) -> u32 {
        let value = match self.value.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            v.checked_sub(by)
        }) {
            Ok(previous) => previous - by,
            Err(previous) => panic!("counter underflow: {} - {}", previous, by),
        };
        self.check_waiting_fibers(value, waker);
        value
    }
}

/// An atomic job counter with `WAITERS` waiter slots.
///
/// Cloning yields another handle to the same counter.
#[derive(Clone)]
pub struct BaseCounter<const WAITERS: usize> {
    inner: Arc<CounterState<WAITERS>>,
}

/// Counter with four waiter slots.
pub type Counter = BaseCounter<4>;

/// Counter with a single waiter slot, for one-shot waits.
pub type TinyCounter = BaseCounter<1>;

impl<const WAITERS: usize> BaseCounter<WAITERS> {
    /// Creates a counter with the given initial value.
    pub fn new(initial: u32) -> Self {
        BaseCounter {
            inner: Arc::new(CounterState {
                value: AtomicU32::new(initial),
                free_slots: std::array::from_fn(|_| AtomicBool::new(true)),
                slots: std::array::from_fn(|_| WaiterSlot::new()),
            }),
        }
    }

    pub fn value(&self) -> u32 {
        self.inner.value()
    }

    /// Adds `by` and wakes fibers waiting for the new value.
    pub fn increment(&self, by: u32, waker: &dyn FiberWaker) -> u32 {
        self.inner.increment(by, waker)
    }

    /// Subtracts `by` and wakes fibers waiting for the new value.
    ///
    /// # Panics
    ///
    /// Panics if the counter would go below zero.
    pub fn decrement(&self, by: u32, waker: &dyn FiberWaker) -> u32 {
        self.inner.decrement(by, waker)
    }

    /// Registers `fiber` as waiting for the counter to equal `target`.
    ///
    /// Returns `true` if the counter already equals `target`, in which case
    /// nothing stays registered. Otherwise the slot stays armed until a
    /// change to exactly `target` wakes the fiber.
    ///
    /// # Panics
    ///
    /// Panics if every waiter slot is occupied.
    pub fn add_waiting_fiber(&self, fiber: FiberIndex, target: u32) -> bool {
        self.try_add_waiting_fiber(fiber, target)
            .unwrap_or_else(|| panic!("all {} counter waiter slots are occupied", WAITERS))
    }

    /// Like [`add_waiting_fiber`](Self::add_waiting_fiber), but returns
    /// `None` instead of panicking when every slot is occupied.
    pub(crate) fn try_add_waiting_fiber(&self, fiber: FiberIndex, target: u32) -> Option<bool> {
        let state = &*self.inner;
        for (free, slot) in state.free_slots.iter().zip(&state.slots) {
            if free
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            slot.fiber.store(fiber, Ordering::Relaxed);
            slot.target.store(target, Ordering::Relaxed);
            slot.in_use.store(false, Ordering::Release);

            // A change to `target` may have been scanned before the slot was armed.
            if state.value.load(Ordering::Acquire) == target
                && slot
                    .in_use
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                free.store(true, Ordering::Release);
                return Some(true);
            }
            return Some(false);
        }

        None
    }

    /// Number of occupied waiter slots.
    pub fn waiting_fibers(&self) -> usize {
        self.inner
            .free_slots
            .iter()
            .filter(|free| !free.load(Ordering::Acquire))
            .count()
    }

    pub const fn waiter_capacity(&self) -> usize {
        WAITERS
    }

    pub(crate) fn shared(&self) -> Arc<dyn DependencyCounter> {
        self.inner.clone()
    }
}

impl<const WAITERS: usize> Default for BaseCounter<WAITERS> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<const WAITERS: usize> std::fmt::Debug for BaseCounter<WAITERS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseCounter")
            .field("value", &self.value())
            .field("waiting_fibers", &self.waiting_fibers())
            .field("waiter_capacity", &WAITERS)
            .finish()
    }
}
