#![deny(unsafe_op_in_unsafe_fn)]
#![warn(unreachable_pub)]

//! User-level preemptive threads with pluggable scheduling policies.
//!
//! Threads created by this crate are multiplexed on a single OS thread. Each
//! has its own stack and saved register context; the runtime switches
//! between them on explicit yields, on blocking calls, and when the
//! preemption quantum expires.
//!
//! Every thread runs under one of three policies:
//!
//! - **Round-Robin**: FIFO time sharing
//! - **Lottery**: weighted random selection by ticket count
//! - **Real-Time**: earliest deadline first
//!
//! A ready Real-Time thread always wins over Lottery and Round-Robin
//! threads, and a ready Lottery thread always wins over Round-Robin ones.
//!
//! # Features
//!
//! - `signal-timer`: drive preemption from a `SIGALRM` interval timer
//!   (default). Without it, preemption only comes from
//!   [`Kernel::timer_interrupt`] and explicit yields.
//!
//! # Quick Start
//!
//! ```ignore
//! use uthreads::{Config, Mutex, Policy, Runtime};
//!
//! let runtime = Runtime::new(Config::default())?;
//!
//! let urgent = uthreads::spawn_with_policy(Policy::real_time_default(), || "first")?;
//! let lucky = uthreads::spawn_with_policy(Policy::lottery(10), || "second")?;
//!
//! assert_eq!(urgent.join()?, "first");
//! assert_eq!(lucky.join()?, "second");
//! runtime.shutdown();
//! ```
//!
//! # Preemption
//!
//! The timer signal handler never switches stacks itself; it only records
//! that the quantum elapsed. The switch happens at the next preemption
//! point: any runtime call, or [`preemption_point!`] in a loop that makes
//! no runtime calls.

pub mod arch;
pub mod config;
pub mod errors;
pub mod kernel;
pub mod mem;
pub mod platform_timer;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod time;

#[cfg(test)]
mod tests;

// ============================================================================
// Public API
// ============================================================================

// Configuration
pub use config::{Config, DeadlinePolicy};

// Kernel
pub use kernel::{Kernel, KernelStats, Runtime};

// Scheduling
pub use sched::{Policy, PolicyClass, SchedParams};

// Threads
pub use thread::{
    change_policy, current, detach, exit, join, spawn, spawn_with_policy, without_preemption,
    yield_now, Builder, ExitValue, JoinHandle, ThreadId, ThreadInfo, ThreadState,
};

// Synchronization
pub use sync::{Mutex, MutexGuard};

// Memory management
pub use mem::{StackPoolStats, StackSizeClass};

// Time
pub use time::{Duration, Instant};

// Errors
pub use errors::{ThreadError, ThreadResult, TimerError};
