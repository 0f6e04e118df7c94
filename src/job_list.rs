//! Batching helpers over [`JobManager`].

use crate::counter::{Counter, TinyCounter};
use crate::job::{Job, JobPriority};
use crate::job_manager::JobManager;

/// A batch of jobs sharing one counter.
///
/// Jobs are scheduled as soon as they are added; [`JobList::wait`] parks the
/// calling fiber until the batch has drained to the given value.
///
/// ```no_run
/// # use jobfiber::{JobList, JobManager, JobPriority, ManagerConfig};
/// # use std::sync::Arc;
/// # let manager = Arc::new(JobManager::new(ManagerConfig::default()));
/// manager.run(|manager| {
///     let list = JobList::new(manager);
///     for i in 0..8 {
///         list.add(JobPriority::Normal, move |_| println!("job {}", i));
///     }
///     list.wait(0);
/// }).unwrap();
/// ```
pub struct JobList<'a> {
    manager: &'a JobManager,
    counter: Counter,
}

impl<'a> JobList<'a> {
    pub fn new(manager: &'a JobManager) -> Self {
        JobList {
            manager,
            counter: Counter::new(0),
        }
    }

    /// Schedules `work` as part of this batch.
    pub fn add<F>(&self, priority: JobPriority, work: F)
    where
        F: FnOnce(&JobManager) + Send + 'static,
    {
        self.add_job(priority, Job::new(work));
    }

    /// Schedules a prepared job, replacing any counter it carried.
    pub fn add_job(&self, priority: JobPriority, job: Job) {
        self.manager.schedule(priority, job.with_counter(&self.counter));
    }

    /// Waits until the number of unfinished jobs equals `target`.
    pub fn wait(&self, target: u32) {
        self.manager.wait_for_counter(&self.counter, target, false);
    }

    /// Jobs added but not yet finished.
    pub fn pending(&self) -> u32 {
        self.counter.value()
    }

    pub fn counter(&self) -> &Counter {
        &self.counter
    }
}

/// Jobs collected up front and then run strictly one after another.
///
/// [`JobQueue::execute`] schedules a job, waits for it to finish and only
/// then schedules the next, so the jobs observe each other's effects in
/// insertion order.
pub struct JobQueue<'a> {
    manager: &'a JobManager,
    counter: TinyCounter,
    jobs: Vec<(JobPriority, Job)>,
}

impl<'a> JobQueue<'a> {
    pub fn new(manager: &'a JobManager) -> Self {
        JobQueue {
            manager,
            counter: TinyCounter::new(0),
            jobs: Vec::new(),
        }
    }

    pub fn add<F>(&mut self, priority: JobPriority, work: F)
    where
        F: FnOnce(&JobManager) + Send + 'static,
    {
        self.add_job(priority, Job::new(work));
    }

    pub fn add_job(&mut self, priority: JobPriority, job: Job) {
        self.jobs.push((priority, job));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs every buffered job in order and leaves the queue empty.
    pub fn execute(&mut self) {
        for (priority, job) in std::mem::take(&mut self.jobs) {
            self.manager.schedule(priority, job.with_counter(&self.counter));
            self.manager.wait_for_counter(&self.counter, 0, false);
        }
    }
}
