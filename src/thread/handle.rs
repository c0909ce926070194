use super::{ThreadId, ThreadInfo};
use crate::errors::{ThreadError, ThreadResult};
use crate::kernel::current_kernel;
use core::marker::PhantomData;

/// Owned permission to join or detach a thread.
///
/// Dropping the handle neither joins nor detaches: the thread stays joinable
/// by id through [`crate::thread::join`].
#[derive(Debug)]
pub struct JoinHandle<T> {
    id: ThreadId,
    _value: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> JoinHandle<T> {
    pub(crate) fn new(id: ThreadId) -> Self {
        Self {
            id,
            _value: PhantomData,
        }
    }

    /// Id of the thread.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Block until the thread terminates, reclaim it, and return its value.
    ///
    /// # Errors
    ///
    /// * `Deadlock` - joining oneself, or nothing else can run
    /// * `NoSuchThread` - the thread was detached or already reclaimed
    /// * `Panicked` - the thread panicked
    /// * `InvalidArgument` - the thread exited through [`crate::exit`] with a
    ///   value that is not a `T`
    pub fn join(self) -> ThreadResult<T> {
        let value = current_kernel()?.join(self.id)?;
        value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| ThreadError::InvalidArgument("exit value has a different type"))
    }

    /// Let the thread be reclaimed as soon as it terminates.
    pub fn detach(self) -> ThreadResult<()> {
        current_kernel()?.detach(self.id)
    }

    /// Control block snapshot of the thread.
    pub fn info(&self) -> ThreadResult<ThreadInfo> {
        current_kernel()?.thread_info(self.id)
    }

    /// Whether the thread has terminated.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.info(),
            Ok(ThreadInfo {
                state: super::ThreadState::Zombie,
                ..
            })
        )
    }
}
