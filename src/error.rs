//! Startup errors and return codes.

/// Flat result code of [`JobManager::run`](crate::JobManager::run).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    Success,
    AlreadyInitialized,
    InvalidNumFibers,
    ErrorThreadAffinity,
    NullCallback,
    OSError,
}

/// Errors that prevent the job manager from starting.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RunError {
    /// Threads or fibers were already created by an earlier run.
    #[error("job manager is already initialized")]
    AlreadyInitialized,

    #[error("fiber pool size must be at least 1")]
    InvalidNumFibers,

    #[error("thread affinity requested for {requested} threads but only {available} hardware threads exist")]
    ErrorThreadAffinity {
        requested: usize,
        available: usize,
    },

    #[error("main callback is missing")]
    NullCallback,

    #[error("operating system error: {0}")]
    Os(#[from] std::io::Error),
}

impl RunError {
    pub fn return_code(&self) -> ReturnCode {
        match self {
            RunError::AlreadyInitialized => ReturnCode::AlreadyInitialized,
            RunError::InvalidNumFibers => ReturnCode::InvalidNumFibers,
            RunError::ErrorThreadAffinity { .. } => ReturnCode::ErrorThreadAffinity,
            RunError::NullCallback => ReturnCode::NullCallback,
            RunError::Os(_) => ReturnCode::OSError,
        }
    }
}

impl From<&Result<(), RunError>> for ReturnCode {
    fn from(result: &Result<(), RunError>) -> Self {
        match result {
            Ok(()) => ReturnCode::Success,
            Err(e) => e.return_code(),
        }
    }
}

/// Reports a broken scheduler invariant and aborts the process.
///
/// Unwinding is not an option here: a job's panic boundary would catch it and
/// leave counters and parked fibers inconsistent.
#[cold]
pub(crate) fn fatal(message: std::fmt::Arguments<'_>) -> ! {
    log::error!("fatal scheduler error: {}", message);
    eprintln!("jobfiber: fatal scheduler error: {}", message);
    std::process::abort()
}
