//! Scheduling policies and the global ready-set.
//!
//! Three policy modules each keep their own ready-set:
//!
//! - [`RoundRobinQueue`]: FIFO
//! - [`LotteryQueue`]: ticket-weighted random selection
//! - [`EdfQueue`]: earliest deadline first
//!
//! [`ReadySets`] merges them with a fixed precedence: Real-Time, then
//! Lottery, then Round-Robin.

pub mod edf;
pub mod lottery;
pub mod rr;
pub mod trait_def;

pub use edf::EdfQueue;
pub use lottery::{LotteryQueue, TicketRng};
pub use rr::RoundRobinQueue;
pub use trait_def::ReadyQueue;

use crate::config::DeadlinePolicy;
use crate::errors::{ThreadError, ThreadResult};
use crate::thread::ThreadId;
use crate::time::{Duration, Instant};

/// Scheduling policy requested for a thread.
///
/// Parameters are taken as given and normalized by [`Policy::resolve`]:
/// non-positive ticket counts become 1, and a missing Real-Time deadline is
/// filled in from the runtime's [`DeadlinePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// FIFO time sharing.
    #[default]
    RoundRobin,
    /// Weighted random selection.
    Lottery { tickets: i64 },
    /// Earliest deadline first.
    RealTime { deadline: Option<Instant> },
}

impl Policy {
    /// Raw policy code for Round-Robin.
    pub const RAW_ROUND_ROBIN: i32 = 0;
    /// Raw policy code for Lottery.
    pub const RAW_LOTTERY: i32 = 1;
    /// Raw policy code for Real-Time.
    pub const RAW_REAL_TIME: i32 = 2;

    /// Build a policy from a `(kind, param)` pair.
    ///
    /// For Lottery `param` is the ticket count. For Real-Time a positive
    /// `param` is the deadline in microseconds from now; otherwise the
    /// runtime assigns one. Unknown kinds fall back to Round-Robin.
    pub fn from_raw(kind: i32, param: i64) -> Policy {
        match kind {
            Self::RAW_ROUND_ROBIN => Policy::RoundRobin,
            Self::RAW_LOTTERY => Policy::Lottery { tickets: param },
            Self::RAW_REAL_TIME => Policy::RealTime {
                deadline: u64::try_from(param)
                    .ok()
                    .filter(|&us| us > 0)
                    .map(|us| Instant::after(Duration::from_micros(us))),
            },
            unknown => {
                log::warn!("unknown scheduling policy {}, using round-robin", unknown);
                Policy::RoundRobin
            }
        }
    }

    /// Lottery policy with the given tickets.
    pub fn lottery(tickets: i64) -> Policy {
        Policy::Lottery { tickets }
    }

    /// Real-Time policy with an explicit deadline.
    pub fn real_time(deadline: Instant) -> Policy {
        Policy::RealTime {
            deadline: Some(deadline),
        }
    }

    /// Real-Time policy whose deadline the runtime assigns.
    pub fn real_time_default() -> Policy {
        Policy::RealTime { deadline: None }
    }

    /// Policy class this request belongs to.
    pub fn class(&self) -> PolicyClass {
        match self {
            Policy::RoundRobin => PolicyClass::RoundRobin,
            Policy::Lottery { .. } => PolicyClass::Lottery,
            Policy::RealTime { .. } => PolicyClass::RealTime,
        }
    }

    /// Normalize into the parameters stored in a thread control block.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a Real-Time request without a deadline when the
    /// runtime requires explicit deadlines.
    pub fn resolve(self, deadlines: DeadlinePolicy) -> ThreadResult<SchedParams> {
        Ok(match self {
            Policy::RoundRobin => SchedParams::RoundRobin,
            Policy::Lottery { tickets } => SchedParams::Lottery {
                tickets: u32::try_from(tickets.max(1)).unwrap_or(u32::MAX),
            },
            Policy::RealTime {
                deadline: Some(deadline),
            } => SchedParams::RealTime { deadline },
            Policy::RealTime { deadline: None } => match deadlines {
                DeadlinePolicy::DefaultOffset(offset) => SchedParams::RealTime {
                    deadline: Instant::after(offset),
                },
                DeadlinePolicy::Explicit => {
                    return Err(ThreadError::InvalidArgument(
                        "real-time policy requires an explicit deadline",
                    ))
                }
            },
        })
    }
}

/// Resolved scheduling parameters of a thread.
///
/// Only the parameter meaningful for the current policy exists, so tickets
/// and deadlines can never linger on a thread that does not use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedParams {
    RoundRobin,
    Lottery { tickets: u32 },
    RealTime { deadline: Instant },
}

impl SchedParams {
    pub fn class(&self) -> PolicyClass {
        match self {
            SchedParams::RoundRobin => PolicyClass::RoundRobin,
            SchedParams::Lottery { .. } => PolicyClass::Lottery,
            SchedParams::RealTime { .. } => PolicyClass::RealTime,
        }
    }
}

/// Policy classes in dispatch precedence order (lowest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyClass {
    RoundRobin,
    Lottery,
    RealTime,
}

/// The three policy ready-sets behind one dispatch decision.
#[derive(Debug)]
pub struct ReadySets {
    real_time: EdfQueue,
    lottery: LotteryQueue,
    round_robin: RoundRobinQueue,
}

impl ReadySets {
    pub fn new(lottery_seed: u64) -> Self {
        Self {
            real_time: EdfQueue::new(),
            lottery: LotteryQueue::new(lottery_seed),
            round_robin: RoundRobinQueue::new(),
        }
    }

    /// Make `id` ready in the ready-set of its policy.
    pub fn add(&mut self, id: ThreadId, params: SchedParams) {
        self.remove(id);
        match params {
            SchedParams::RoundRobin => self.round_robin.add(id, ()),
            SchedParams::Lottery { tickets } => self.lottery.add(id, tickets),
            SchedParams::RealTime { deadline } => self.real_time.add(id, deadline),
        }
    }

    /// Put back a thread that yielded or was preempted.
    pub fn requeue(&mut self, id: ThreadId, params: SchedParams) {
        self.remove(id);
        match params {
            SchedParams::RoundRobin => self.round_robin.requeue_after_preemption(id, ()),
            SchedParams::Lottery { tickets } => {
                self.lottery.requeue_after_preemption(id, tickets)
            }
            SchedParams::RealTime { deadline } => {
                self.real_time.requeue_after_preemption(id, deadline)
            }
        }
    }

    /// Remove `id` from whichever ready-set holds it. No-op if none does.
    pub fn remove(&mut self, id: ThreadId) -> bool {
        // Non-short-circuiting on purpose: all three are always checked.
        self.real_time.remove(id) | self.lottery.remove(id) | self.round_robin.remove(id)
    }

    /// Remove and return the next thread: Real-Time first, then Lottery,
    /// then Round-Robin.
    pub fn pick_next(&mut self) -> Option<ThreadId> {
        self.real_time
            .pick_next()
            .or_else(|| self.lottery.pick_next())
            .or_else(|| self.round_robin.pick_next())
    }

    /// Highest policy class with a ready thread.
    pub fn highest_class(&self) -> Option<PolicyClass> {
        if !self.real_time.is_empty() {
            Some(PolicyClass::RealTime)
        } else if !self.lottery.is_empty() {
            Some(PolicyClass::Lottery)
        } else if !self.round_robin.is_empty() {
            Some(PolicyClass::RoundRobin)
        } else {
            None
        }
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.real_time.contains(id) || self.lottery.contains(id) || self.round_robin.contains(id)
    }

    pub fn len(&self) -> usize {
        self.real_time.len() + self.lottery.len() + self.round_robin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn real_time(&self) -> &EdfQueue {
        &self.real_time
    }

    pub fn lottery(&self) -> &LotteryQueue {
        &self.lottery
    }

    pub fn round_robin(&self) -> &RoundRobinQueue {
        &self.round_robin
    }
}
