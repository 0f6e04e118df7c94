//! The job manager: thread pool, fiber pool, priority queues and the
//! scheduling loop every fiber runs.
//!
//! `run` turns the calling thread into scheduler thread 0, spawns threads
//! 1..N and switches into a fiber running the main callback. Every other
//! fiber runs the worker loop: take a job, run it, decrement its counter,
//! repeat. A job that waits on a counter parks its fiber and the thread
//! carries on with a fresh fiber from the pool; the parked fiber is resumed
//! later by whichever thread sees its counter reach the target.

use crate::config::ManagerConfig;
use crate::counter::{BaseCounter, FiberWaker, TinyCounter};
use crate::error::{RunError, fatal};
use crate::fiber::Fiber;
use crate::fiber_pool::{FiberIndex, FiberPool};
use crate::job::{Job, JobPriority};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::profiling::{self, TraceGuard};
use crate::queue::BoundedQueue;
use crate::thread::{self as worker_thread, Thread};
use crate::tls::{self, FiberDestination, ThreadState};
use crossbeam::queue::SegQueue;
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// Callback run on thread 0 once the scheduler is up.
pub type MainCallback = Box<dyn FnOnce(&JobManager) + Send + 'static>;

/// Lifecycle of a [`JobManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ManagerState {
    Uninitialized = 0,
    Running = 1,
    ShuttingDown = 2,
    Joined = 3,
}

impl ManagerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ManagerState::Uninitialized,
            1 => ManagerState::Running,
            2 => ManagerState::ShuttingDown,
            _ => ManagerState::Joined,
        }
    }
}

enum Next {
    Job(Job),
    /// A parked fiber was resumed and has since switched back here.
    Resumed,
    Idle,
}

/// Fiber-based job scheduler.
///
/// Jobs are scheduled into one of three bounded priority queues and run on a
/// fixed pool of fibers multiplexed over the scheduler threads.
///
/// # Example
///
/// ```no_run
/// use jobfiber::{JobManager, JobPriority, ManagerConfig};
/// use std::sync::Arc;
///
/// let manager = Arc::new(JobManager::new(ManagerConfig::new(4)));
/// manager
///     .run(|manager| {
///         manager.wait_for_single(JobPriority::Normal, |_| {
///             println!("Hello from a fiber job!");
///         });
///     })
///     .unwrap();
/// ```
pub struct JobManager {
    config: ManagerConfig,
    num_threads: usize,
    state: AtomicU8,
    shutdown: AtomicBool,
    fibers: OnceLock<FiberPool>,
    high_priority: BoundedQueue<Job>,
    normal_priority: BoundedQueue<Job>,
    low_priority: BoundedQueue<Job>,
    /// Fibers woken from threads that do not belong to this manager.
    orphan_ready: SegQueue<FiberIndex>,
    threads: Mutex<Vec<Thread>>,
    main_callback: Mutex<Option<MainCallback>>,
    main_panic: Mutex<Option<Box<dyn Any + Send>>>,
    metrics: Metrics,
}

impl JobManager {
    /// Creates a manager. Nothing is spawned until [`JobManager::run`].
    pub fn new(config: ManagerConfig) -> Self {
        JobManager {
            num_threads: config.thread_count(),
            state: AtomicU8::new(ManagerState::Uninitialized as u8),
            shutdown: AtomicBool::new(false),
            fibers: OnceLock::new(),
            high_priority: BoundedQueue::new(config.high_priority_queue_size),
            normal_priority: BoundedQueue::new(config.normal_priority_queue_size),
            low_priority: BoundedQueue::new(config.low_priority_queue_size),
            orphan_ready: SegQueue::new(),
            threads: Mutex::new(Vec::new()),
            main_callback: Mutex::new(None),
            main_panic: Mutex::new(None),
            metrics: Metrics::new(),
            config,
        }
    }

    /// Starts the scheduler and runs `main` on a fiber of thread 0.
    ///
    /// Blocks the calling thread until shutdown has been signalled and every
    /// scheduler thread has stopped. With `shutdown_after_main` set, shutdown
    /// is signalled as soon as `main` returns.
    ///
    /// # Panics
    ///
    /// If `main` panicked, the panic is resumed here once all threads have
    /// been joined.
    pub fn run<F>(self: &Arc<Self>, main: F) -> Result<(), RunError>
    where
        F: FnOnce(&JobManager) + Send + 'static,
    {
        self.run_boxed(Some(Box::new(main)))
    }

    /// Like [`JobManager::run`] for an already boxed, possibly missing callback.
    pub fn run_boxed(self: &Arc<Self>, main: Option<MainCallback>) -> Result<(), RunError> {
        if self.state() != ManagerState::Uninitialized || self.fibers.get().is_some() {
            return Err(RunError::AlreadyInitialized);
        }
        if self.config.num_fibers == 0 {
            return Err(RunError::InvalidNumFibers);
        }
        if self.config.thread_affinity {
            let available = worker_thread::hardware_threads();
            if self.num_threads > available {
                return Err(RunError::ErrorThreadAffinity {
                    requested: self.num_threads,
                    available,
                });
            }
        }
        let main = main.ok_or(RunError::NullCallback)?;

        if self
            .state
            .compare_exchange(
                ManagerState::Uninitialized as u8,
                ManagerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(RunError::AlreadyInitialized);
        }

        log::info!(
            "job manager starting: {} threads, {} fibers of {} bytes",
            self.num_threads,
            self.config.num_fibers,
            self.config.fiber_stack_size
        );

        let pool = match FiberPool::new(
            self.config.num_fibers,
            self.config.fiber_stack_size,
            Self::fiber_entry,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                log::error!("failed to allocate fiber stacks: {}", e);
                self.set_state(ManagerState::Uninitialized);
                return Err(e.into());
            }
        };
        let pool = self.fibers.get_or_init(|| pool);

        if self.config.thread_affinity {
            worker_thread::pin_current_thread(0);
        }
        let state = ThreadState::new(0, self);
        let _installed = state.install();

        // Claimed before any worker can take the last fibers.
        let main_fiber = pool.acquire();
        *self.main_callback.lock() = Some(main);

        if let Err(e) = self.spawn_workers() {
            log::error!("failed to spawn scheduler threads: {}", e);
            self.main_callback.lock().take();
            pool.release(main_fiber);
            self.shutdown.store(true, Ordering::Release);
            self.join_workers();
            self.set_state(ManagerState::Joined);
            return Err(e.into());
        }

        state.set_current_fiber(main_fiber);
        state
            .thread_fiber()
            .switch_to(pool.fiber(main_fiber), self.userdata());
        self.cleanup_previous_fiber();
        if self.config.record_trace {
            profiling::collect_local_trace();
        }

        self.join_workers();
        self.set_state(ManagerState::Joined);
        log::info!("job manager stopped");

        if let Some(payload) = self.main_panic.lock().take() {
            panic::resume_unwind(payload);
        }
        Ok(())
    }

    fn spawn_workers(self: &Arc<Self>) -> std::io::Result<()> {
        let mut threads = self.threads.lock();
        for index in 1..self.num_threads {
            let manager = Arc::clone(self);
            threads.push(Thread::spawn(index, move || manager.thread_main(index))?);
        }
        Ok(())
    }

    fn thread_main(&self, index: usize) {
        if self.config.thread_affinity {
            worker_thread::pin_current_thread(index);
        }
        let state = ThreadState::new(index, self);
        let _installed = state.install();
        log::debug!("scheduler thread {} started", index);

        let pool = self.pool();
        let backoff = Backoff::new();
        let fiber = loop {
            if let Some(fiber) = pool.try_acquire() {
                break Some(fiber);
            }
            if self.is_shutting_down() {
                break None;
            }
            self.idle(&backoff);
        };

        if let Some(fiber) = fiber {
            state.set_current_fiber(fiber);
            state
                .thread_fiber()
                .switch_to(pool.fiber(fiber), self.userdata());
            self.cleanup_previous_fiber();
        }

        if self.config.record_trace {
            profiling::collect_local_trace();
        }
        log::debug!("scheduler thread {} stopped", index);
    }

    /// Entry point of every pooled fiber. `userdata` is the manager.
    fn fiber_entry(fiber: &Fiber, userdata: usize) {
        // SAFETY: every switch into a pooled fiber passes the owning manager,
        // which outlives its pool.
        let manager = unsafe { &*(userdata as *const JobManager) };
        manager.cleanup_previous_fiber();

        let main = if manager.thread_index() == Some(0) {
            manager.main_callback.lock().take()
        } else {
            None
        };
        if let Some(main) = main {
            manager.run_main(main);
        }

        manager.worker_loop(fiber);
    }

    fn run_main(&self, main: MainCallback) {
        log::debug!("main callback started");
        match panic::catch_unwind(AssertUnwindSafe(|| main(self))) {
            Ok(()) => {
                log::debug!("main callback returned");
                if self.config.shutdown_after_main {
                    self.shutdown(false);
                }
            }
            Err(payload) => {
                log::error!("main callback panicked: {}", panic_message(&*payload));
                *self.main_panic.lock() = Some(payload);
                self.shutdown(false);
            }
        }
    }

    fn worker_loop(&self, fiber: &Fiber) -> ! {
        let backoff = Backoff::new();
        loop {
            if self.is_shutting_down() {
                self.leave_to_thread(fiber);
                continue;
            }

            match self.get_next_job(fiber) {
                Next::Job(job) => {
                    self.execute_job(job);
                    backoff.reset();
                }
                Next::Resumed => backoff.reset(),
                Next::Idle => self.idle(&backoff),
            }
        }
    }

    fn idle(&self, backoff: &Backoff) {
        if backoff.is_completed() {
            std::thread::sleep(self.config.idle_sleep);
        } else {
            backoff.snooze();
        }
    }

    /// Returns the running fiber to the pool and hands control back to the
    /// thread it is currently on. Returns only if the fiber is reused later.
    fn leave_to_thread(&self, fiber: &Fiber) {
        tls::with_current_for(self, |state| {
            if let Some(current) = state.current_fiber() {
                state.set_previous_fiber(current, FiberDestination::Pool);
            }
        });
        fiber.switch_to_thread();
        self.cleanup_previous_fiber();
    }

    /// High priority jobs first, then parked fibers that are ready again,
    /// then normal and low priority jobs.
    fn get_next_job(&self, fiber: &Fiber) -> Next {
        if let Some(job) = self.high_priority.dequeue() {
            return Next::Job(job);
        }

        if let Some(ready) = self.take_ready_fiber() {
            self.resume_ready_fiber(fiber, ready);
            return Next::Resumed;
        }

        match self
            .normal_priority
            .dequeue()
            .or_else(|| self.low_priority.dequeue())
        {
            Some(job) => Next::Job(job),
            None => Next::Idle,
        }
    }

    fn take_ready_fiber(&self) -> Option<FiberIndex> {
        let pool = self.pool();
        if let Some(fiber) = tls::with_current_for(self, |state| state.take_ready_fiber(pool)).flatten() {
            return Some(fiber);
        }

        let fiber = self.orphan_ready.pop()?;
        if pool.is_stored(fiber) {
            Some(fiber)
        } else {
            self.orphan_ready.push(fiber);
            None
        }
    }

    fn resume_ready_fiber(&self, fiber: &Fiber, ready: FiberIndex) {
        let pool = self.pool();
        tls::with_current_for(self, |state| {
            if let Some(current) = state.current_fiber() {
                state.set_previous_fiber(current, FiberDestination::Pool);
            }
            state.set_current_fiber(ready);
        });
        pool.clear_stored(ready);

        Metrics::bump(&self.metrics.fibers_resumed);
        Metrics::bump(&self.metrics.fiber_switches);
        fiber.switch_to(pool.fiber(ready), self.userdata());
        self.cleanup_previous_fiber();
    }

    /// Finishes the switch that just landed on this fiber.
    fn cleanup_previous_fiber(&self) {
        let previous = tls::with_current_for(self, |state| state.take_previous_fiber()).flatten();
        match previous {
            Some((fiber, FiberDestination::Pool)) => self.pool().release(fiber),
            Some((fiber, FiberDestination::Waiting)) => self.pool().mark_stored(fiber),
            None => {}
        }
    }

    fn execute_job(&self, mut job: Job) {
        let counter = job.take_counter();
        let span = self
            .config
            .record_trace
            .then(|| TraceGuard::new("job", self.thread_index().unwrap_or(0)));

        if let Err(payload) = job.invoke(self) {
            Metrics::bump(&self.metrics.jobs_panicked);
            log::error!("job panicked: {}", panic_message(&*payload));
        }
        drop(span);
        Metrics::bump(&self.metrics.jobs_executed);

        if let Some(counter) = counter {
            counter.decrement(1, self);
        }
    }

    /// Pushes a job into the queue for `priority`, incrementing its counter
    /// first.
    ///
    /// # Aborts
    ///
    /// Aborts the process if the queue is full. The counter increment is
    /// rolled back first.
    pub fn schedule(&self, priority: JobPriority, job: Job) {
        if let Some(counter) = job.counter() {
            counter.increment(1, self);
        }
        Metrics::bump(&self.metrics.jobs_scheduled);

        let queue = self.queue(priority);
        if let Err(job) = queue.enqueue(job) {
            if let Some(counter) = job.counter() {
                counter.decrement(1, self);
            }
            fatal(format_args!(
                "{:?} priority job queue is full (capacity {})",
                priority,
                queue.capacity()
            ));
        }
    }

    /// Schedules `work` without a counter.
    pub fn schedule_job<F>(&self, priority: JobPriority, work: F)
    where
        F: FnOnce(&JobManager) + Send + 'static,
    {
        self.schedule(priority, Job::new(work));
    }

    /// Schedules `work`; `counter` is incremented now and decremented once
    /// the job has run.
    pub fn schedule_job_with_counter<const WAITERS: usize, F>(
        &self,
        priority: JobPriority,
        counter: &BaseCounter<WAITERS>,
        work: F,
    ) where
        F: FnOnce(&JobManager) + Send + 'static,
    {
        self.schedule(priority, Job::new(work).with_counter(counter));
    }

    /// Schedules a call of `work(args)`.
    pub fn schedule_job_with_args<A, F>(&self, priority: JobPriority, work: F, args: A)
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        self.schedule(priority, Job::with_args(work, args));
    }

    /// Waits until `counter` equals `target` exactly.
    ///
    /// On a scheduler fiber the fiber is parked and the thread moves on to
    /// other work. With `blocking` set, or when called from any other
    /// thread, the OS thread itself waits.
    ///
    /// # Aborts
    ///
    /// Aborts the process if a fiber wait finds every waiter slot occupied.
    pub fn wait_for_counter<const WAITERS: usize>(
        &self,
        counter: &BaseCounter<WAITERS>,
        target: u32,
        blocking: bool,
    ) {
        if counter.value() == target {
            Metrics::bump(&self.metrics.waits_immediate);
            return;
        }

        let current = if blocking {
            None
        } else {
            tls::with_current_for(self, |state| state.current_fiber()).flatten()
        };
        let Some(current) = current else {
            self.wait_blocking(counter, target);
            return;
        };

        let pool = self.pool();
        pool.clear_stored(current);
        let Some(satisfied) = counter.try_add_waiting_fiber(current, target) else {
            fatal(format_args!(
                "all {} counter waiter slots are occupied",
                counter.waiter_capacity()
            ));
        };
        if satisfied {
            Metrics::bump(&self.metrics.waits_immediate);
            return;
        }
        Metrics::bump(&self.metrics.waits_suspended);

        let next = pool.acquire();
        tls::with_current_for(self, |state| {
            state.set_previous_fiber(current, FiberDestination::Waiting);
            state.set_current_fiber(next);
        });

        Metrics::bump(&self.metrics.fiber_switches);
        pool.fiber(current)
            .switch_to(pool.fiber(next), self.userdata());
        // Possibly on another thread from here on.
        self.cleanup_previous_fiber();
    }

    fn wait_blocking<const WAITERS: usize>(&self, counter: &BaseCounter<WAITERS>, target: u32) {
        let backoff = Backoff::new();
        while counter.value() != target {
            self.idle(&backoff);
        }
    }

    /// Runs `work` as a job and waits for it to finish.
    pub fn wait_for_single<F>(&self, priority: JobPriority, work: F)
    where
        F: FnOnce(&JobManager) + Send + 'static,
    {
        let counter = TinyCounter::new(0);
        self.schedule(priority, Job::new(work).with_counter(&counter));
        self.wait_for_counter(&counter, 0, false);
    }

    /// Signals every scheduler thread to stop once its current job is done.
    ///
    /// With `blocking` set, also waits until all threads have stopped. That
    /// is only possible from outside the scheduler; on a scheduler thread
    /// the request is downgraded to non-blocking.
    pub fn shutdown(&self, blocking: bool) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            log::info!("job manager shutdown requested");
            let _ = self.state.compare_exchange(
                ManagerState::Running as u8,
                ManagerState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        if !blocking {
            return;
        }
        if self.thread_index().is_some() {
            log::warn!("blocking shutdown requested from a scheduler thread; not waiting");
            return;
        }

        self.join_workers();
        let backoff = Backoff::new();
        while self.state() == ManagerState::ShuttingDown {
            self.idle(&backoff);
        }
    }

    fn join_workers(&self) {
        // Held while joining so concurrent callers return only once all are done.
        let mut threads = self.threads.lock();
        for thread in threads.drain(..) {
            let index = thread.index();
            if thread.join().is_err() {
                log::error!("scheduler thread {} panicked", index);
            }
        }
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ManagerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Scheduler threads including thread 0.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Index of the scheduler thread running the caller, if it is one of
    /// this manager's threads.
    pub fn thread_index(&self) -> Option<usize> {
        tls::with_current_for(self, |state| state.index())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn queue(&self, priority: JobPriority) -> &BoundedQueue<Job> {
        match priority {
            JobPriority::High => &self.high_priority,
            JobPriority::Normal => &self.normal_priority,
            JobPriority::Low => &self.low_priority,
        }
    }

    fn pool(&self) -> &FiberPool {
        match self.fibers.get() {
            Some(pool) => pool,
            None => panic!("job manager has not been started"),
        }
    }

    fn userdata(&self) -> usize {
        self as *const JobManager as usize
    }
}

impl FiberWaker for JobManager {
    fn wake_fiber(&self, fiber: FiberIndex) {
        let queued = tls::with_current_for(self, |state| state.push_ready_fiber(fiber));
        if queued.is_none() {
            self.orphan_ready.push(fiber);
        }
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("state", &self.state())
            .field("num_threads", &self.num_threads)
            .field("num_fibers", &self.config.num_fibers)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
