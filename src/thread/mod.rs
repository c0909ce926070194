//! Threads: identifiers, control blocks, and the public thread API.
//!
//! The free functions here act on the runtime active on the calling OS
//! thread. Outside a runtime they report [`ThreadError::NotInitialized`],
//! except [`yield_now`] and [`preemption_point`], which do nothing.

use crate::arch::Context;
use crate::errors::{ThreadError, ThreadResult};
use crate::kernel::{current_kernel, ExitRequest};
use crate::mem::Stack;
use crate::sched::{Policy, SchedParams};
use std::any::Any;
use std::collections::VecDeque;
use std::num::NonZeroUsize;

pub mod builder;
pub mod handle;

pub use builder::Builder;
pub use handle::JoinHandle;

/// Type-erased value a thread produced, by returning or through [`exit`].
pub type ExitValue = Box<dyn Any + Send>;

/// Boxed start routine stored in a control block until the thread first runs.
pub(crate) type StartFn = Box<dyn FnOnce() -> ExitValue>;

/// Unique thread identifier. Never reused within a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroUsize);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// Id of the thread that created the runtime.
    pub const MAIN: ThreadId = ThreadId(match NonZeroUsize::new(1) {
        Some(one) => one,
        None => unreachable!(),
    });

    /// Id from a raw value; `None` for zero.
    pub fn from_raw(id: usize) -> Option<Self> {
        NonZeroUsize::new(id).map(Self)
    }

    /// Get the raw ID value.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// What a blocked thread waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Queued on a mutex wait list.
    Mutex,
    /// Waiting for the given thread to terminate.
    Join(ThreadId),
}

/// Thread lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// In its policy's ready-set.
    Ready,
    /// Executing. Exactly one thread per runtime.
    Running,
    /// Waiting on a mutex or a join.
    Blocked(BlockReason),
    /// Terminated, not yet reclaimed.
    Zombie,
}

/// How a thread ended.
pub(crate) enum Outcome {
    Returned(ExitValue),
    Panicked,
}

/// Thread control block.
///
/// Owned by the kernel's thread table. Boxed so the saved context keeps its
/// address while the table changes shape.
pub(crate) struct Tcb {
    pub(crate) id: ThreadId,
    pub(crate) name: Option<String>,
    pub(crate) context: Context,
    pub(crate) state: ThreadState,
    pub(crate) params: SchedParams,
    pub(crate) detached: bool,
    pub(crate) outcome: Option<Outcome>,
    pub(crate) join_waiters: VecDeque<ThreadId>,
    /// `None` for the main thread, which runs on the OS thread's stack.
    pub(crate) stack: Option<Stack>,
    pub(crate) start: Option<StartFn>,
    pub(crate) dispatches: u64,
    /// Distinct mutexes currently owned.
    pub(crate) mutexes_held: usize,
}

impl Tcb {
    pub(crate) fn new(
        id: ThreadId,
        name: Option<String>,
        params: SchedParams,
        stack: Option<Stack>,
        start: Option<StartFn>,
    ) -> Box<Self> {
        Box::new(Tcb {
            id,
            name,
            context: Context::default(),
            state: ThreadState::Ready,
            params,
            detached: false,
            outcome: None,
            join_waiters: VecDeque::new(),
            stack,
            start,
            dispatches: 0,
            mutexes_held: 0,
        })
    }

    pub(crate) fn info(&self) -> ThreadInfo {
        ThreadInfo {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            params: self.params,
            detached: self.detached,
            dispatches: self.dispatches,
            mutexes_held: self.mutexes_held,
        }
    }
}

/// Snapshot of a thread's control block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: Option<String>,
    pub state: ThreadState,
    pub params: SchedParams,
    pub detached: bool,
    /// Times the thread was picked by the dispatcher.
    pub dispatches: u64,
    /// Mutexes the thread owns. Non-zero on a zombie means they were never
    /// released.
    pub mutexes_held: usize,
}

/// Spawn a Round-Robin thread running `f`.
pub fn spawn<F, T>(f: F) -> ThreadResult<JoinHandle<T>>
where
    F: FnOnce() -> T + 'static,
    T: Send + 'static,
{
    Builder::new().spawn(f)
}

/// Spawn a thread under `policy`.
pub fn spawn_with_policy<F, T>(policy: Policy, f: F) -> ThreadResult<JoinHandle<T>>
where
    F: FnOnce() -> T + 'static,
    T: Send + 'static,
{
    Builder::new().policy(policy).spawn(f)
}

/// Give up the CPU. The thread stays ready under its policy.
///
/// Does nothing outside a runtime.
pub fn yield_now() {
    if let Ok(kernel) = current_kernel() {
        kernel.yield_now();
    }
}

/// Terminate the calling thread with `value`. Never returns.
///
/// In a spawned thread the stack unwinds first, so destructors run. The
/// value is handed to the joiner; [`JoinHandle::join`] recovers it as `T`.
///
/// # Panics
///
/// Panics when called outside a runtime.
pub fn exit<T: Send + 'static>(value: T) -> ! {
    let kernel = match current_kernel() {
        Ok(kernel) => kernel,
        Err(_) => panic!("uthreads::exit called outside a runtime"),
    };
    let value: ExitValue = Box::new(value);
    if kernel.current() == kernel.main_thread() {
        kernel.exit_main(value)
    } else {
        std::panic::resume_unwind(Box::new(ExitRequest(value)))
    }
}

/// Id of the calling thread.
pub fn current() -> ThreadResult<ThreadId> {
    Ok(current_kernel()?.current())
}

/// Wait for thread `id` to terminate and reclaim it.
///
/// Prefer [`JoinHandle::join`], which also recovers the typed value.
pub fn join(id: ThreadId) -> ThreadResult<ExitValue> {
    current_kernel()?.join(id)
}

/// Detach thread `id`; it is reclaimed as soon as it terminates.
pub fn detach(id: ThreadId) -> ThreadResult<()> {
    current_kernel()?.detach(id)
}

/// Move the calling thread to another scheduling policy.
pub fn change_policy(policy: Policy) -> ThreadResult<()> {
    current_kernel()?.change_policy(policy)
}

/// Control block snapshot of thread `id`.
pub fn info(id: ThreadId) -> ThreadResult<ThreadInfo> {
    current_kernel()?.thread_info(id)
}

/// Switch threads if the quantum expired or a more urgent thread is ready.
///
/// Long computations without other runtime calls should call this (or the
/// [`preemption_point!`](crate::preemption_point) macro) regularly. Does
/// nothing outside a runtime.
#[inline]
pub fn preemption_point() {
    if let Ok(kernel) = current_kernel() {
        kernel.preemption_point();
    }
}

/// Run `f` with involuntary preemption deferred.
///
/// Explicit yields and blocking calls inside `f` still switch. A preemption
/// that came due while masked is taken right after `f` returns.
pub fn without_preemption<R>(f: impl FnOnce() -> R) -> R {
    match current_kernel() {
        Ok(kernel) => {
            let result = {
                let _mask = kernel.mask_preemption();
                f()
            };
            kernel.preemption_point();
            result
        }
        Err(_) => f(),
    }
}

impl From<ThreadId> for usize {
    fn from(id: ThreadId) -> usize {
        id.get()
    }
}

impl TryFrom<usize> for ThreadId {
    type Error = ThreadError;

    fn try_from(raw: usize) -> ThreadResult<Self> {
        ThreadId::from_raw(raw).ok_or(ThreadError::InvalidArgument("thread id zero"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id() {
        assert_eq!(ThreadId::MAIN.get(), 1);
        assert_eq!(ThreadId::from_raw(0), None);
        assert_eq!(ThreadId::try_from(7usize).map(ThreadId::get), Ok(7));
        assert!(ThreadId::try_from(0usize).is_err());
        assert_eq!(ThreadId::MAIN.to_string(), "1");
    }

    #[test]
    fn test_api_outside_runtime() {
        yield_now();
        preemption_point();
        assert_eq!(current(), Err(ThreadError::NotInitialized));
        assert_eq!(detach(ThreadId::MAIN), Err(ThreadError::NotInitialized));
        assert_eq!(change_policy(Policy::RoundRobin), Err(ThreadError::NotInitialized));
        assert_eq!(without_preemption(|| 3), 3);
        assert!(spawn(|| ()).is_err());
    }
}
