//! Thread builder.

use super::{ExitValue, JoinHandle, StartFn};
use crate::errors::{ThreadError, ThreadResult};
use crate::kernel::current_kernel;
use crate::mem::StackSizeClass;
use crate::sched::Policy;

/// Configures a thread before spawning it.
///
/// ```ignore
/// let handle = uthreads::Builder::new()
///     .name("sampler")
///     .policy(uthreads::Policy::lottery(10))
///     .stack_size(64 * 1024)
///     .spawn(|| 42)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    policy: Policy,
    name: Option<String>,
    stack_class: Option<StackSizeClass>,
    stack_bytes: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduling policy. Defaults to Round-Robin.
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size class, overriding the runtime default.
    pub fn stack_size_class(mut self, class: StackSizeClass) -> Self {
        self.stack_class = Some(class);
        self.stack_bytes = None;
        self
    }

    /// Minimum stack size in bytes, rounded up to a size class.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_bytes = Some(bytes);
        self.stack_class = None;
        self
    }

    fn resolve_stack(&self, default: StackSizeClass) -> ThreadResult<StackSizeClass> {
        match (self.stack_class, self.stack_bytes) {
            (Some(class), _) => Ok(class),
            (None, Some(bytes)) => StackSizeClass::for_size(bytes)
                .ok_or(ThreadError::InvalidArgument("stack size exceeds the largest class")),
            (None, None) => Ok(default),
        }
    }

    /// Create the thread and make it ready under its policy.
    ///
    /// # Errors
    ///
    /// * `OutOfIds` - the thread table is full
    /// * `OutOfMemory` - no stack could be allocated
    /// * `InvalidArgument` - stack size too large, or a Real-Time request
    ///   without a deadline under an explicit-deadline runtime
    /// * `NotInitialized` - no runtime on this OS thread
    pub fn spawn<F, T>(self, f: F) -> ThreadResult<JoinHandle<T>>
    where
        F: FnOnce() -> T + 'static,
        T: Send + 'static,
    {
        let kernel = current_kernel()?;
        let stack_class = self.resolve_stack(kernel.config().stack_size)?;
        let start: StartFn = Box::new(move || -> ExitValue { Box::new(f()) });
        let id = kernel.spawn_boxed(start, self.policy, self.name, stack_class)?;
        Ok(JoinHandle::new(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_resolution() {
        let default = StackSizeClass::Large;
        assert_eq!(Builder::new().resolve_stack(default), Ok(default));
        assert_eq!(
            Builder::new().stack_size(10_000).resolve_stack(default),
            Ok(StackSizeClass::Small)
        );
        assert_eq!(
            Builder::new()
                .stack_size(10_000)
                .stack_size_class(StackSizeClass::Huge)
                .resolve_stack(default),
            Ok(StackSizeClass::Huge)
        );
        assert!(matches!(
            Builder::new().stack_size(usize::MAX).resolve_stack(default),
            Err(ThreadError::InvalidArgument(_))
        ));
    }
}
