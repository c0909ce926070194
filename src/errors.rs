//! Error handling for the threading runtime.
//!
//! Every public operation reports failure through [`ThreadError`]. Internal
//! policy-module operations never fail: removing an absent thread from a
//! ready-set is a no-op, not an error.

use thiserror::Error;

/// Result type for threading operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Error type for all threading operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
    /// The thread table is full; no thread was created.
    #[error("thread table capacity exhausted")]
    OutOfIds,
    /// Stack or control block allocation failed; no thread was created.
    #[error("out of memory allocating thread resources")]
    OutOfMemory,
    /// An argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The operation would block forever (self-join, join cycle, or no other
    /// thread left to run).
    #[error("operation would deadlock")]
    Deadlock,
    /// The calling thread does not own the mutex.
    #[error("mutex is not owned by the calling thread")]
    NotOwner,
    /// The thread was already detached.
    #[error("thread is already detached")]
    AlreadyDetached,
    /// The target thread was detached or has already been reclaimed.
    #[error("no such thread")]
    NoSuchThread,
    /// The resource is held by another thread. Expected outcome of `try_lock`.
    #[error("resource busy")]
    Busy,
    /// No runtime is active on the calling OS thread.
    #[error("threading runtime is not initialized")]
    NotInitialized,
    /// A runtime is already active on the calling OS thread.
    #[error("threading runtime is already initialized")]
    AlreadyInitialized,
    /// The joined thread terminated by panicking.
    #[error("thread panicked")]
    Panicked,
    /// The preemption timer could not be configured.
    #[error("preemption timer: {0}")]
    Timer(#[from] TimerError),
}

/// Preemption timer errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    /// The quantum is zero or too large to program.
    #[error("invalid quantum")]
    InvalidQuantum,
    /// Installing the signal handler failed (errno).
    #[error("failed to install signal handler (errno {0})")]
    SignalHandler(i32),
    /// Arming the interval timer failed (errno).
    #[error("failed to arm interval timer (errno {0})")]
    Arm(i32),
    /// The crate was built without a timer backend.
    #[error("interval timer not supported on this build")]
    Unsupported,
}

impl ThreadError {
    /// Whether this error describes an expected outcome rather than a fault.
    ///
    /// `Busy` from `try_lock` is the only such case.
    pub fn is_expected(&self) -> bool {
        matches!(self, ThreadError::Busy)
    }
}
