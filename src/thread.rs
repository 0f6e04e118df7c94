//! OS worker thread wrapper.
//!
//! Thread 0 is always the thread that calls `JobManager::run`; threads
//! 1..N are spawned here. Each runs its own trampoline over the shared fiber
//! pool until shutdown.

use std::io;
use std::thread::{self, JoinHandle};

/// A spawned scheduler thread.
pub struct Thread {
    index: usize,
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Spawns scheduler thread `index` running `body`.
    pub fn spawn<F>(index: usize, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("jobfiber-worker-{}", index))
            .spawn(body)?;

        Ok(Thread {
            index,
            handle: Some(handle),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Waits for the thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// Number of hardware threads available for pinning.
pub fn hardware_threads() -> usize {
    core_affinity::get_core_ids()
        .map(|ids| ids.len())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
}

/// Pins the calling thread to logical core `index`.
///
/// Returns false if the core does not exist or the OS refused.
pub fn pin_current_thread(index: usize) -> bool {
    let pinned = core_affinity::get_core_ids()
        .and_then(|ids| ids.get(index).copied())
        .map(core_affinity::set_for_current)
        .unwrap_or(false);

    if pinned {
        log::debug!("scheduler thread {} pinned to core {}", index, index);
    } else {
        log::warn!("failed to pin scheduler thread {} to a core", index);
    }
    pinned
}
