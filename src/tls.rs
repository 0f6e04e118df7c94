//! Per-thread scheduler state.
//!
//! Each scheduler thread owns one [`ThreadState`] on its native stack for as
//! long as it runs fibers. Fibers can migrate between threads, so code running
//! on a fiber must look the block up again after every switch and must never
//! keep a reference to it across one. [`with_current`] enforces that by only
//! lending the block to a closure.

use crate::fiber::Fiber;
use crate::fiber_pool::{FiberIndex, FiberPool};
use crate::job_manager::JobManager;
use std::cell::{Cell, RefCell};
use std::ptr;

/// Where the previously running fiber goes once a switch has completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FiberDestination {
    /// Back into the idle set.
    Pool,
    /// Parked on a counter: flip its stored flag so it can be resumed.
    Waiting,
}

pub(crate) struct ThreadState {
    index: usize,
    manager: *const JobManager,
    thread_fiber: Fiber,
    current_fiber: Cell<Option<FiberIndex>>,
    previous_fiber: Cell<Option<(FiberIndex, FiberDestination)>>,
    ready_fibers: RefCell<Vec<FiberIndex>>,
}

thread_local! {
    static CURRENT: Cell<*const ThreadState> = const { Cell::new(ptr::null()) };
}

impl ThreadState {
    /// Converts the calling thread for use by `manager` as thread `index`.
    pub fn new(index: usize, manager: &JobManager) -> Self {
        ThreadState {
            index,
            manager: manager as *const JobManager,
            thread_fiber: Fiber::from_current_thread(),
            current_fiber: Cell::new(None),
            previous_fiber: Cell::new(None),
            ready_fibers: RefCell::new(Vec::new()),
        }
    }

    /// Makes this block the current thread's state until the guard drops.
    pub fn install(&self) -> InstallGuard<'_> {
        let previous = CURRENT.replace(self as *const ThreadState);
        assert!(
            previous.is_null(),
            "thread is already running a job manager"
        );
        InstallGuard { _state: self }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn thread_fiber(&self) -> &Fiber {
        &self.thread_fiber
    }

    pub fn current_fiber(&self) -> Option<FiberIndex> {
        self.current_fiber.get()
    }

    pub fn set_current_fiber(&self, fiber: FiberIndex) {
        self.current_fiber.set(Some(fiber));
    }

    pub fn set_previous_fiber(&self, fiber: FiberIndex, destination: FiberDestination) {
        let pending = self.previous_fiber.replace(Some((fiber, destination)));
        debug_assert!(pending.is_none(), "previous fiber was never cleaned up");
    }

    pub fn take_previous_fiber(&self) -> Option<(FiberIndex, FiberDestination)> {
        self.previous_fiber.take()
    }

    pub fn push_ready_fiber(&self, fiber: FiberIndex) {
        self.ready_fibers.borrow_mut().push(fiber);
    }

    /// Removes and returns the first ready fiber that has fully switched out.
    pub fn take_ready_fiber(&self, pool: &FiberPool) -> Option<FiberIndex> {
        let mut ready = self.ready_fibers.borrow_mut();
        let position = ready.iter().position(|&fiber| pool.is_stored(fiber))?;
        Some(ready.remove(position))
    }

    pub fn ready_fiber_count(&self) -> usize {
        self.ready_fibers.borrow().len()
    }
}

pub(crate) struct InstallGuard<'a> {
    _state: &'a ThreadState,
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        CURRENT.set(ptr::null());
    }
}

/// Lends the current thread's state to `f`, if this is a scheduler thread.
///
/// `f` must not switch fibers. Never inlined so the thread-local address is
/// recomputed on every call, even on a fiber that moved threads.
#[inline(never)]
pub(crate) fn with_current<R>(f: impl FnOnce(&ThreadState) -> R) -> Option<R> {
    let state = CURRENT.get();
    if state.is_null() {
        return None;
    }
    // SAFETY: the pointer is installed by a ThreadState living on this
    // thread's stack and cleared before that frame returns.
    Some(f(unsafe { &*state }))
}

/// Like [`with_current`], but only if the thread belongs to `manager`.
#[inline(never)]
pub(crate) fn with_current_for<R>(
    manager: &JobManager,
    f: impl FnOnce(&ThreadState) -> R,
) -> Option<R> {
    with_current(|state| ptr::eq(state.manager, manager).then(|| f(state))).flatten()
}
