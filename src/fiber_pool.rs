use crate::fiber::{Fiber, FiberCallback};
use crossbeam::utils::Backoff;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Index of a fiber inside a [`FiberPool`].
pub type FiberIndex = usize;

struct FiberSlot {
    fiber: Fiber,
    /// Idle bitmap entry: true while no job or wait owns the fiber.
    idle: AtomicBool,
    /// Hand-off cell: set once a parked fiber has fully switched out and may
    /// be resumed by whichever thread holds it in a ready list.
    stored: AtomicBool,
}

/// A fixed-size pool of fibers shared by all worker threads.
///
/// Ownership of a fiber is tracked only through the idle bitmap: whoever
/// flips a fiber from idle to busy owns it until it is released again.
pub struct FiberPool {
    slots: Box<[FiberSlot]>,
}

impl FiberPool {
    /// Creates `count` idle fibers, all using `callback` as entry point.
    pub fn new(count: usize, stack_size: usize, callback: FiberCallback) -> io::Result<Self> {
        let slots = (0..count)
            .map(|_| {
                let fiber = Fiber::new(stack_size)?;
                fiber.set_callback(callback);
                Ok(FiberSlot {
                    fiber,
                    idle: AtomicBool::new(true),
                    stored: AtomicBool::new(false),
                })
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(FiberPool {
            slots: slots.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn fiber(&self, index: FiberIndex) -> &Fiber {
        &self.slots[index].fiber
    }

    /// Claims an idle fiber, if any.
    pub fn try_acquire(&self) -> Option<FiberIndex> {
        self.slots.iter().position(|slot| {
            slot.idle
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        })
    }

    /// Claims an idle fiber, spinning until one is released.
    pub fn acquire(&self) -> FiberIndex {
        let backoff = Backoff::new();
        let mut warned = false;
        loop {
            if let Some(index) = self.try_acquire() {
                return index;
            }
            if backoff.is_completed() {
                if !warned {
                    log::warn!(
                        "fiber pool exhausted ({} fibers); waiting for a fiber to be released",
                        self.len()
                    );
                    warned = true;
                }
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Returns a fiber to the idle set. The fiber must be suspended.
    pub fn release(&self, index: FiberIndex) {
        let was_idle = self.slots[index].idle.swap(true, Ordering::AcqRel);
        debug_assert!(!was_idle, "fiber {} released twice", index);
    }

    pub fn idle_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.idle.load(Ordering::Acquire))
            .count()
    }

    pub(crate) fn clear_stored(&self, index: FiberIndex) {
        self.slots[index].stored.store(false, Ordering::Release);
    }

    pub(crate) fn mark_stored(&self, index: FiberIndex) {
        self.slots[index].stored.store(true, Ordering::Release);
    }

    pub(crate) fn is_stored(&self, index: FiberIndex) -> bool {
        self.slots[index].stored.load(Ordering::Acquire)
    }
}
