//! Job manager configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`JobManager`](crate::JobManager).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Scheduler threads including the calling thread. 0 means one per
    /// hardware thread.
    pub num_threads: usize,
    /// Size of the fixed fiber pool. Default: 25.
    pub num_fibers: usize,
    /// Stack size of each fiber in bytes. Default: 512KB.
    pub fiber_stack_size: usize,
    pub high_priority_queue_size: usize,
    pub normal_priority_queue_size: usize,
    pub low_priority_queue_size: usize,
    /// Pin thread i to logical core i.
    pub thread_affinity: bool,
    /// Signal shutdown as soon as the main callback returns.
    pub shutdown_after_main: bool,
    /// Sleep between idle polls once spinning gives up.
    pub idle_sleep: Duration,
    /// Record job spans for [`profiling`](crate::profiling).
    pub record_trace: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            num_threads: 0,
            num_fibers: 25,
            fiber_stack_size: 512 * 1024,
            high_priority_queue_size: 512,
            normal_priority_queue_size: 16 * 1024,
            low_priority_queue_size: 4 * 1024,
            thread_affinity: false,
            shutdown_after_main: true,
            idle_sleep: Duration::from_micros(100),
            record_trace: false,
        }
    }
}

impl ManagerConfig {
    pub fn new(num_threads: usize) -> Self {
        ManagerConfig {
            num_threads,
            ..Default::default()
        }
    }

    pub fn with_fibers(mut self, num_fibers: usize) -> Self {
        self.num_fibers = num_fibers;
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.fiber_stack_size = bytes;
        self
    }

    pub fn with_queue_sizes(mut self, high: usize, normal: usize, low: usize) -> Self {
        self.high_priority_queue_size = high;
        self.normal_priority_queue_size = normal;
        self.low_priority_queue_size = low;
        self
    }

    pub fn with_thread_affinity(mut self, enabled: bool) -> Self {
        self.thread_affinity = enabled;
        self
    }

    pub fn with_shutdown_after_main(mut self, enabled: bool) -> Self {
        self.shutdown_after_main = enabled;
        self
    }

    pub fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep = sleep;
        self
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.record_trace = enabled;
        self
    }

    /// Thread count with the hardware default resolved.
    pub fn thread_count(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.num_threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.num_fibers, 25);
        assert_eq!(config.fiber_stack_size, 512 * 1024);
        assert!(config.shutdown_after_main);
        assert!(!config.thread_affinity);
        assert!(config.thread_count() >= 1);
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::new(3)
            .with_fibers(8)
            .with_queue_sizes(4, 8, 16)
            .with_thread_affinity(true)
            .with_shutdown_after_main(false);
        assert_eq!(config.thread_count(), 3);
        assert_eq!(config.num_fibers, 8);
        assert_eq!(config.normal_priority_queue_size, 8);
        assert!(config.thread_affinity);
        assert!(!config.shutdown_after_main);
    }
}
