//! Architecture abstraction layer for execution contexts.
//!
//! A saved context holds exactly the callee-saved register set of the
//! platform ABI plus the stack pointer. Everything else is either
//! caller-saved (the compiler already spilled it around the call into
//! [`Arch::context_switch`]) or lives on the thread's own stack.
//!
//! The three context operations map onto one primitive:
//!
//! * capture: the save half of [`Arch::context_switch`]; a thread's state is
//!   captured at the moment it switches away.
//! * restore: [`restore`], a switch that discards the caller's state.
//! * save-and-switch: [`Arch::context_switch`], which returns when the saved
//!   context is later switched back to.

/// Entry point a fresh context starts in. Receives the argument baked in by
/// [`Arch::init_context`] and must never return.
pub type EntryFn = extern "C" fn(usize) -> !;

/// Architecture abstraction trait.
///
/// # Safety
///
/// Implementations manipulate stack pointers and registers directly. The
/// unsafe methods have preconditions that the caller must uphold.
pub trait Arch {
    /// Architecture-specific saved context type.
    type SavedContext: Send + Default;

    /// Save the current execution state into `prev` and resume `next`.
    ///
    /// Returns when some later switch resumes `prev`.
    ///
    /// # Safety
    ///
    /// - `prev` must be valid for writes and `next` valid for reads, and both
    ///   must stay valid until the switch back to `prev` happens.
    /// - `next` must hold a state captured by a previous switch or primed by
    ///   [`Arch::init_context`], whose stack is still allocated.
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Prime `ctx` so the first switch to it calls `entry(arg)` on the stack
    /// ending at `stack_top`.
    ///
    /// # Safety
    ///
    /// `stack_top` must be the 16-byte aligned upper end of a writable stack
    /// that outlives every use of `ctx`.
    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        stack_top: *mut u8,
        entry: EntryFn,
        arg: usize,
    );
}

/// Resume `next` without keeping the caller's state. Never returns.
///
/// # Safety
///
/// Same as [`Arch::context_switch`] for `next`. Nothing may ever switch back
/// to the caller, whose stack may be freed once `next` runs.
pub unsafe fn restore<A: Arch>(next: *const A::SavedContext) -> ! {
    let mut scratch = A::SavedContext::default();
    // SAFETY: forwarded from the caller; `scratch` is never resumed.
    unsafe { A::context_switch(&mut scratch, next) };
    log::error!("a discarded execution context was resumed");
    std::process::abort()
}

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::X86_64Arch as DefaultArch;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::Aarch64Arch as DefaultArch;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("uthreads supports x86_64 and aarch64 targets only");

/// Saved context type of the host architecture.
pub type Context = <DefaultArch as Arch>::SavedContext;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{StackPool, StackSizeClass};
    use std::cell::Cell;

    struct Ping {
        main: Context,
        child: Context,
        hits: Cell<u32>,
    }

    extern "C" fn ping_entry(arg: usize) -> ! {
        let ping = unsafe { &mut *(arg as *mut Ping) };
        loop {
            ping.hits.set(ping.hits.get() + 1);
            unsafe { DefaultArch::context_switch(&mut ping.child, &ping.main) };
        }
    }

    #[test]
    fn test_switch_into_fresh_context_and_back() {
        let pool = StackPool::new();
        let stack = pool.allocate(StackSizeClass::Small).unwrap();
        let mut ping = Box::new(Ping {
            main: Context::default(),
            child: Context::default(),
            hits: Cell::new(0),
        });
        let arg = &mut *ping as *mut Ping as usize;

        unsafe {
            DefaultArch::init_context(&mut ping.child, stack.initial_sp(), ping_entry, arg);
            for round in 1..=3 {
                let p = arg as *mut Ping;
                DefaultArch::context_switch(&mut (*p).main, &(*p).child);
                assert_eq!((*p).hits.get(), round);
            }
        }
        assert!(stack.check_canary());
        pool.release(stack);
    }

    #[test]
    fn test_float_state_survives_switch() {
        let pool = StackPool::new();
        let stack = pool.allocate(StackSizeClass::Small).unwrap();
        let mut ping = Box::new(Ping {
            main: Context::default(),
            child: Context::default(),
            hits: Cell::new(0),
        });
        let arg = &mut *ping as *mut Ping as usize;
        let x = std::hint::black_box(1.5f64);

        unsafe {
            DefaultArch::init_context(&mut ping.child, stack.initial_sp(), ping_entry, arg);
            let p = arg as *mut Ping;
            DefaultArch::context_switch(&mut (*p).main, &(*p).child);
        }
        assert_eq!(x * 2.0, 3.0);
        pool.release(stack);
    }
}
