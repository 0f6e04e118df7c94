//! # jobfiber - Fiber-Based Job Scheduler
//!
//! A job scheduler in the style of Naughty Dog's fiber job system. Work is
//! split into many small jobs that run on a fixed pool of stackful fibers
//! multiplexed over a fixed set of OS threads. Waiting on other jobs never
//! blocks a thread: the waiting fiber is parked and the thread picks up
//! other work until the awaited jobs are done.
//!
//! ## Architecture
//!
//! - **Queues**: three bounded lock-free queues, one per [`JobPriority`]
//! - **Jobs**: closures stored inline in a fixed-size [`Job`] record
//! - **Fibers**: pre-allocated stackful contexts, switched cooperatively
//! - **Counters**: atomic job counters that fibers can park on
//!   ([`Counter`], [`TinyCounter`])
//! - **Job manager**: owns all of the above and runs the scheduling loop
//!
//! A thread looking for work takes high priority jobs first, then resumes
//! parked fibers whose counters reached their targets, then takes normal
//! and finally low priority jobs.
//!
//! ## Example
//!
//! ```no_run
//! use jobfiber::{JobList, JobManager, JobPriority, ManagerConfig};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let manager = Arc::new(JobManager::new(ManagerConfig::new(4)));
//! let sum = Arc::new(AtomicUsize::new(0));
//! let total = sum.clone();
//!
//! manager
//!     .run(move |manager| {
//!         let list = JobList::new(manager);
//!         for i in 0..100 {
//!             let sum = sum.clone();
//!             list.add(JobPriority::Normal, move |_| {
//!                 sum.fetch_add(i, Ordering::Relaxed);
//!             });
//!         }
//!         list.wait(0);
//!     })
//!     .expect("failed to start job manager");
//!
//! assert_eq!(total.load(Ordering::Relaxed), 4950);
//! ```

pub mod config;
pub mod counter;
pub mod error;
pub mod fiber;
pub mod fiber_pool;
pub mod job;
pub mod job_list;
pub mod job_manager;
pub mod metrics;
pub mod profiling;
pub mod queue;
pub mod thread;
mod tls;

pub use config::ManagerConfig;
pub use counter::{BaseCounter, Counter, FiberWaker, TinyCounter};
pub use error::{ReturnCode, RunError};
pub use job::{Job, JobPriority};
pub use job_list::{JobList, JobQueue};
pub use job_manager::{JobManager, MainCallback, ManagerState};
pub use metrics::MetricsSnapshot;
