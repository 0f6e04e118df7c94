//! Job definitions and execution logic.
//!
//! A job stores its closure inline in a fixed-size buffer instead of boxing
//! it, so scheduling a job never allocates. Closures that do not fit are
//! rejected at compile time.

use crate::counter::{BaseCounter, DependencyCounter};
use crate::job_manager::JobManager;
use std::mem::{self, MaybeUninit};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::sync::Arc;

/// Inline closure capacity of a job, in bytes.
pub const JOB_STORAGE_SIZE: usize = 128;

/// Maximum alignment of a closure stored in a job.
pub const JOB_STORAGE_ALIGN: usize = 16;

/// Priority levels for job scheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

#[repr(C, align(16))]
struct InlineStorage([MaybeUninit<u8>; JOB_STORAGE_SIZE]);

type CallFn = unsafe fn(*mut u8, &JobManager);
type DropFn = unsafe fn(*mut u8);

unsafe fn drop_noop(_data: *mut u8) {}

/// A unit of work: a type-erased callable plus an optional counter that is
/// decremented when the job completes.
pub struct Job {
    storage: InlineStorage,
    /// `None` for empty jobs and after the closure has been taken.
    call: Option<CallFn>,
    drop_fn: DropFn,
    counter: Option<Arc<dyn DependencyCounter>>,
}

// SAFETY: only `Send` closures are ever written into the storage.
unsafe impl Send for Job {}

impl Job {
    /// Creates a job from a closure, stored inline.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&JobManager) + Send + 'static,
    {
        const {
            assert!(
                mem::size_of::<F>() <= JOB_STORAGE_SIZE,
                "closure does not fit in the job's inline storage"
            );
            assert!(
                mem::align_of::<F>() <= JOB_STORAGE_ALIGN,
                "closure alignment exceeds the job's inline storage alignment"
            );
        }

        unsafe fn call<F: FnOnce(&JobManager)>(data: *mut u8, manager: &JobManager) {
            let work = unsafe { ptr::read(data as *mut F) };
            work(manager);
        }

        unsafe fn drop_in_place<F>(data: *mut u8) {
            unsafe { ptr::drop_in_place(data as *mut F) };
        }

        let mut job = Job {
            storage: InlineStorage([MaybeUninit::uninit(); JOB_STORAGE_SIZE]),
            call: Some(call::<F>),
            drop_fn: drop_in_place::<F>,
            counter: None,
        };
        unsafe { ptr::write(job.storage.0.as_mut_ptr() as *mut F, work) };
        job
    }

    /// Creates a job that calls `work(args)` exactly once.
    pub fn with_args<A, F>(work: F, args: A) -> Self
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        Job::new(move |_: &JobManager| work(args))
    }

    /// A job with no callable. Executing it is a fatal error.
    pub fn empty() -> Self {
        Job {
            storage: InlineStorage([MaybeUninit::uninit(); JOB_STORAGE_SIZE]),
            call: None,
            drop_fn: drop_noop,
            counter: None,
        }
    }

    /// Attaches a counter, decremented once the job has run.
    pub fn with_counter<const WAITERS: usize>(mut self, counter: &BaseCounter<WAITERS>) -> Self {
        self.counter = Some(counter.shared());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.call.is_none()
    }

    pub fn has_counter(&self) -> bool {
        self.counter.is_some()
    }

    pub(crate) fn counter(&self) -> Option<&Arc<dyn DependencyCounter>> {
        self.counter.as_ref()
    }

    pub(crate) fn take_counter(&mut self) -> Option<Arc<dyn DependencyCounter>> {
        self.counter.take()
    }

    /// Runs the closure, catching any panic it raises.
    ///
    /// The counter is left untouched; see [`Job::take_counter`].
    ///
    /// # Panics
    ///
    /// Panics if the job is empty.
    pub(crate) fn invoke(mut self, manager: &JobManager) -> std::thread::Result<()> {
        let call = match self.call.take() {
            Some(call) => call,
            None => panic!("attempt to execute an empty job"),
        };
        // The closure is moved out by `call`; the storage must not be dropped again.
        self.drop_fn = drop_noop;
        let data = self.storage.0.as_mut_ptr() as *mut u8;
        catch_unwind(AssertUnwindSafe(|| unsafe { call(data, manager) }))
    }
}

impl Default for Job {
    fn default() -> Self {
        Job::empty()
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        unsafe { (self.drop_fn)(self.storage.0.as_mut_ptr() as *mut u8) };
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("empty", &self.is_empty())
            .field("has_counter", &self.has_counter())
            .finish()
    }
}
