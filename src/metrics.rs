use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Scheduler counters, updated with relaxed atomics on the hot paths.
#[derive(Debug)]
pub struct Metrics {
    /// Jobs pushed into any priority queue.
    pub jobs_scheduled: AtomicU64,
    /// Jobs that ran to completion or panicked.
    pub jobs_executed: AtomicU64,
    /// Jobs whose callable panicked.
    pub jobs_panicked: AtomicU64,
    /// Fiber-to-fiber switches made by the scheduler.
    pub fiber_switches: AtomicU64,
    /// Parked fibers resumed from a ready list.
    pub fibers_resumed: AtomicU64,
    /// Counter waits that parked the calling fiber.
    pub waits_suspended: AtomicU64,
    /// Counter waits that found the target already reached.
    pub waits_immediate: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_scheduled: AtomicU64::new(0),
            jobs_executed: AtomicU64::new(0),
            jobs_panicked: AtomicU64::new(0),
            fiber_switches: AtomicU64::new(0),
            fibers_resumed: AtomicU64::new(0),
            waits_suspended: AtomicU64::new(0),
            waits_immediate: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_scheduled: self.jobs_scheduled.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            fiber_switches: self.fiber_switches.load(Ordering::Relaxed),
            fibers_resumed: self.fibers_resumed.load(Ordering::Relaxed),
            waits_suspended: self.waits_suspended.load(Ordering::Relaxed),
            waits_immediate: self.waits_immediate.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub jobs_scheduled: u64,
    pub jobs_executed: u64,
    pub jobs_panicked: u64,
    pub fiber_switches: u64,
    pub fibers_resumed: u64,
    pub waits_suspended: u64,
    pub waits_immediate: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Jobs scheduled but not yet finished.
    pub fn jobs_outstanding(&self) -> u64 {
        self.jobs_scheduled.saturating_sub(self.jobs_executed)
    }
}
