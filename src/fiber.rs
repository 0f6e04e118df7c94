//! Stackful fibers with explicit switching.
//!
//! Each pooled fiber wraps a `corosensei` coroutine. Coroutines are
//! asymmetric (resume/suspend), so symmetric `switch_to` is built on top of a
//! per-thread trampoline: the *thread fiber* (the OS thread's own stack)
//! resumes a fiber, and when that fiber wants to switch to another one it
//! suspends back to the trampoline with the target, which resumes the target
//! in turn. From the fibers' point of view control moves directly from one
//! to the next.
//!
//! A fiber may be resumed on a different OS thread than the one it suspended
//! on. Switching "to a thread fiber" always returns control to the thread the
//! switching fiber is currently running on.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::{Cell, UnsafeCell};
use std::io;

/// Entry point of a fiber, called on the first switch into it with the
/// userdata passed to that switch. It must never return.
pub type FiberCallback = fn(fiber: &Fiber, userdata: usize);

/// Raw handle to a fiber, used to pass fibers through the trampoline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FiberHandle(pub *const Fiber);

unsafe impl Send for FiberHandle {}
unsafe impl Sync for FiberHandle {}

#[derive(Clone, Copy)]
struct FiberInput {
    this: FiberHandle,
    userdata: usize,
}

#[derive(Clone, Copy, Debug)]
enum Transfer {
    To(FiberHandle, usize),
    ToThread,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReturnTarget {
    Thread,
    Fiber(FiberHandle),
}

type FiberCoroutine = Coroutine<FiberInput, Transfer, (), DefaultStack>;

/// A cooperatively scheduled execution context.
///
/// Either a pooled fiber with its own stack, or the thread fiber that stands
/// for an OS thread's native stack (see [`Fiber::from_current_thread`]).
pub struct Fiber {
    /// `None` for thread fibers.
    coroutine: Option<UnsafeCell<FiberCoroutine>>,
    callback: Cell<Option<FiberCallback>>,
    /// Valid once the coroutine has started.
    yielder: Cell<*const Yielder<FiberInput, Transfer>>,
    /// Set by whoever last switched into this fiber.
    return_fiber: Cell<Option<ReturnTarget>>,
}

// SAFETY: a fiber is only ever touched by the thread that currently owns it.
// Ownership is handed between threads by the scheduler's atomics (idle
// bitmap, waiter slots, stored flags), which order every access.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Creates a pooled fiber with a stack of `stack_size` bytes.
    pub fn new(stack_size: usize) -> io::Result<Self> {
        let stack = DefaultStack::new(stack_size)?;
        let coroutine = Coroutine::with_stack(
            stack,
            |yielder: &Yielder<FiberInput, Transfer>, input: FiberInput| {
                // SAFETY: the handle is the fiber being resumed, which
                // outlives its own coroutine.
                let fiber = unsafe { &*input.this.0 };
                fiber.yielder.set(yielder as *const _);
                let callback = match fiber.callback.get() {
                    Some(callback) => callback,
                    None => panic!("fiber started without an entry callback"),
                };
                callback(fiber, input.userdata);
            },
        );

        Ok(Fiber {
            coroutine: Some(UnsafeCell::new(coroutine)),
            callback: Cell::new(None),
            yielder: Cell::new(std::ptr::null()),
            return_fiber: Cell::new(None),
        })
    }

    /// Converts the calling OS thread into a fiber-capable context.
    ///
    /// The returned thread fiber has no stack of its own; switching from it
    /// runs the trampoline on the current thread until some fiber switches
    /// back to the thread.
    pub fn from_current_thread() -> Self {
        Fiber {
            coroutine: None,
            callback: Cell::new(None),
            yielder: Cell::new(std::ptr::null()),
            return_fiber: Cell::new(None),
        }
    }

    pub fn is_thread_fiber(&self) -> bool {
        self.coroutine.is_none()
    }

    /// Whether the fiber has been switched into at least once.
    pub fn is_started(&self) -> bool {
        !self.yielder.get().is_null()
    }

    /// Sets the entry callback. Must be called before the first switch.
    pub fn set_callback(&self, callback: FiberCallback) {
        assert!(!self.is_thread_fiber(), "thread fibers have no entry callback");
        assert!(!self.is_started(), "entry callback set on a running fiber");
        self.callback.set(Some(callback));
    }

    /// Suspends `self` (which must be the running fiber) and resumes `target`.
    ///
    /// `self` becomes `target`'s return fiber. `target` continues from its
    /// last suspension point, or starts its entry callback with `userdata`.
    /// Returns when some fiber switches back into `self`.
    pub fn switch_to(&self, target: &Fiber, userdata: usize) {
        assert!(!std::ptr::eq(self, target), "fiber switched to itself");

        if target.is_thread_fiber() {
            assert!(!self.is_thread_fiber(), "thread fiber switched to a thread fiber");
            self.suspend(Transfer::ToThread);
            return;
        }

        target.return_fiber.set(Some(if self.is_thread_fiber() {
            ReturnTarget::Thread
        } else {
            ReturnTarget::Fiber(FiberHandle(self))
        }));

        if self.is_thread_fiber() {
            Self::trampoline(FiberHandle(target), userdata);
        } else {
            self.suspend(Transfer::To(FiberHandle(target), userdata));
        }
    }

    /// Resumes whichever fiber last switched into this one.
    ///
    /// # Panics
    ///
    /// Panics if nothing has switched into this fiber yet.
    pub fn switch_back(&self) {
        match self.return_fiber.get() {
            Some(ReturnTarget::Thread) => self.switch_to_thread(),
            // SAFETY: return fibers are pool members that outlive every switch.
            Some(ReturnTarget::Fiber(handle)) => self.switch_to(unsafe { &*handle.0 }, 0),
            None => panic!("switch_back on a fiber with no return fiber"),
        }
    }

    /// Suspends the running fiber and returns control to the thread fiber of
    /// the OS thread it is currently running on.
    pub fn switch_to_thread(&self) {
        assert!(!self.is_thread_fiber(), "thread fiber switched to a thread fiber");
        self.suspend(Transfer::ToThread);
    }

    fn suspend(&self, transfer: Transfer) {
        let yielder = self.yielder.get();
        assert!(!yielder.is_null(), "suspend on a fiber that is not running");
        // SAFETY: the yielder lives as long as the running coroutine.
        unsafe { (*yielder).suspend(transfer) };
    }

    fn resume(&self, input: FiberInput) -> CoroutineResult<Transfer, ()> {
        let coroutine = match &self.coroutine {
            Some(coroutine) => coroutine,
            None => panic!("thread fiber cannot be resumed"),
        };
        // SAFETY: only the owning thread resumes a fiber, and never while it runs.
        unsafe { (*coroutine.get()).resume(input) }
    }

    fn trampoline(target: FiberHandle, userdata: usize) {
        let mut next = Some((target, userdata));
        while let Some((handle, userdata)) = next {
            // SAFETY: switch targets are kept alive by their owner for the
            // whole time they can be switched into.
            let fiber = unsafe { &*handle.0 };
            next = match fiber.resume(FiberInput {
                this: handle,
                userdata,
            }) {
                CoroutineResult::Yield(Transfer::To(handle, userdata)) => Some((handle, userdata)),
                CoroutineResult::Yield(Transfer::ToThread) => None,
                CoroutineResult::Return(()) => panic!("fiber entry callback returned"),
            };
        }
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if let Some(coroutine) = self.coroutine.as_mut() {
            let coroutine = coroutine.get_mut();
            if coroutine.started() && !coroutine.done() {
                // Parked fibers are abandoned at teardown: their frames are
                // discarded without unwinding, leaking whatever they own.
                unsafe { coroutine.force_reset() };
            }
        }
    }
}
