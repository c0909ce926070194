//! Runtime configuration.
//!
//! A [`Config`] is handed to [`Runtime::new`](crate::Runtime::new). Defaults
//! match the classic setup: a 10 ms quantum, 256 KiB stacks, and a 100 ms
//! deadline for threads entering the Real-Time policy without one.

use crate::mem::StackSizeClass;
use crate::time::{Duration, DEFAULT_DEADLINE_OFFSET, DEFAULT_QUANTUM};

/// Default thread-table capacity, main thread included.
pub const DEFAULT_MAX_THREADS: usize = 1024;

/// Default seed for the lottery draw generator.
pub const DEFAULT_LOTTERY_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// How a thread entering the Real-Time policy gets its deadline when the
/// caller does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlinePolicy {
    /// Assign `now + offset`.
    DefaultOffset(Duration),
    /// Require an explicit deadline; requests without one are rejected with
    /// [`ThreadError::InvalidArgument`](crate::ThreadError::InvalidArgument).
    Explicit,
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        DeadlinePolicy::DefaultOffset(DEFAULT_DEADLINE_OFFSET)
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Preemption quantum. `None` disables the interval timer; preemption is
    /// then driven only by [`Kernel::timer_interrupt`](crate::Kernel::timer_interrupt).
    pub quantum: Option<Duration>,
    /// Thread-table capacity, counting the main thread and unreclaimed zombies.
    pub max_threads: usize,
    /// Stack size class for threads that do not ask for one.
    pub stack_size: StackSizeClass,
    /// Seed of the lottery draw generator.
    pub lottery_seed: u64,
    /// Deadline assignment for Real-Time requests without a deadline.
    pub deadline_policy: DeadlinePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quantum: Some(DEFAULT_QUANTUM),
            max_threads: DEFAULT_MAX_THREADS,
            stack_size: StackSizeClass::Large,
            lottery_seed: DEFAULT_LOTTERY_SEED,
            deadline_policy: DeadlinePolicy::default(),
        }
    }
}

impl Config {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the preemption quantum, or disable the timer with `None`.
    pub fn with_quantum(mut self, quantum: Option<Duration>) -> Self {
        self.quantum = quantum;
        self
    }

    /// Set the thread-table capacity.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the default stack size class.
    pub fn with_stack_size(mut self, stack_size: StackSizeClass) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Set the lottery seed.
    pub fn with_lottery_seed(mut self, seed: u64) -> Self {
        self.lottery_seed = seed;
        self
    }

    /// Set the Real-Time deadline assignment policy.
    pub fn with_deadline_policy(mut self, policy: DeadlinePolicy) -> Self {
        self.deadline_policy = policy;
        self
    }

    /// Default configuration overlaid with `UTHREADS_*` environment variables.
    ///
    /// * `UTHREADS_QUANTUM_MS` - quantum in milliseconds, `0` disables the timer
    /// * `UTHREADS_MAX_THREADS` - thread-table capacity
    /// * `UTHREADS_STACK_KB` - default stack size, rounded up to a size class
    /// * `UTHREADS_LOTTERY_SEED` - lottery seed
    /// * `UTHREADS_RT_DEADLINE_MS` - default Real-Time deadline offset
    ///
    /// Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_var::<u64>(&lookup, "UTHREADS_QUANTUM_MS") {
            self.quantum = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(max) = parse_var::<usize>(&lookup, "UTHREADS_MAX_THREADS") {
            if max == 0 {
                log::warn!("UTHREADS_MAX_THREADS must be positive, ignoring");
            } else {
                self.max_threads = max;
            }
        }
        if let Some(kb) = parse_var::<usize>(&lookup, "UTHREADS_STACK_KB") {
            match StackSizeClass::for_size(kb.saturating_mul(1024)) {
                Some(class) => self.stack_size = class,
                None => log::warn!("UTHREADS_STACK_KB={} exceeds the largest stack class, ignoring", kb),
            }
        }
        if let Some(seed) = parse_var::<u64>(&lookup, "UTHREADS_LOTTERY_SEED") {
            self.lottery_seed = seed;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "UTHREADS_RT_DEADLINE_MS") {
            self.deadline_policy = DeadlinePolicy::DefaultOffset(Duration::from_millis(ms));
        }
        self
    }
}

fn parse_var<T: core::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring malformed {}={:?}", key, raw);
            None
        }
    }
}
