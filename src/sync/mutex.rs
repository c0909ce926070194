//! Recursive mutex with a FIFO wait queue.
//!
//! Unlocking hands ownership straight to the longest waiter, so threads
//! acquire a contended lock in the order they blocked on it.

use crate::errors::{ThreadError, ThreadResult};
use crate::kernel::current_kernel;
use crate::thread::{BlockReason, ThreadId};
use portable_atomic::{AtomicBool, Ordering};
use std::collections::VecDeque;

/// Owning thread, qualified by its runtime: thread ids restart at
/// [`ThreadId::MAIN`] in every runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Owner {
    runtime: usize,
    thread: ThreadId,
}

#[derive(Debug)]
struct MutexState {
    owner: Option<Owner>,
    recursion: usize,
    /// Threads of the owner's runtime, in blocking order.
    waiters: VecDeque<ThreadId>,
    destroyed: bool,
}

/// Recursive mutual-exclusion lock for runtime threads.
///
/// The owner may lock again; it must unlock as many times as it locked.
/// All operations act on the runtime of the calling OS thread. A mutex may
/// be shared between runtimes, but only threads of the runtime currently
/// holding it can queue for it; [`Mutex::lock`] from another runtime fails
/// with `InvalidArgument` instead of blocking.
///
/// A thread that exits while owning the lock does not release it.
#[derive(Debug)]
pub struct Mutex {
    locked: AtomicBool,
    state: spin::Mutex<MutexState>,
}

enum Acquire {
    /// Newly owned.
    Acquired,
    /// Already owned by the caller; recursion deepened.
    Reentered,
    Wait,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    /// Create an unlocked mutex.
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            state: spin::Mutex::new(MutexState {
                owner: None,
                recursion: 0,
                waiters: VecDeque::new(),
                destroyed: false,
            }),
        }
    }

    fn try_acquire(&self, state: &mut MutexState, me: Owner) -> ThreadResult<Acquire> {
        if state.destroyed {
            return Err(ThreadError::InvalidArgument("mutex was destroyed"));
        }
        if state.owner == Some(me) {
            state.recursion += 1;
            return Ok(Acquire::Reentered);
        }
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            state.owner = Some(me);
            state.recursion = 1;
            return Ok(Acquire::Acquired);
        }
        Ok(Acquire::Wait)
    }

    /// Acquire the lock, blocking until it is handed over.
    ///
    /// # Errors
    ///
    /// * `Deadlock` - the lock is held and no other thread can run
    /// * `InvalidArgument` - the mutex was destroyed, or a thread of another
    ///   runtime holds it
    /// * `NotInitialized` - no runtime on this OS thread
    pub fn lock(&self) -> ThreadResult<()> {
        let kernel = current_kernel()?;
        let mut cs = kernel.critical();
        let me = Owner {
            runtime: cs.runtime_id(),
            thread: cs.current(),
        };
        {
            let mut state = self.state.lock();
            match self.try_acquire(&mut state, me)? {
                Acquire::Acquired | Acquire::Reentered => {
                    if state.recursion == 1 {
                        cs.note_mutex_acquired(me.thread);
                    }
                    drop(state);
                    drop(cs);
                    kernel.preemption_point();
                    return Ok(());
                }
                Acquire::Wait => {}
            }
            if state.owner.map(|owner| owner.runtime) != Some(me.runtime) {
                return Err(ThreadError::InvalidArgument(
                    "mutex is held by a thread of another runtime",
                ));
            }
            if cs.nothing_else_ready() {
                return Err(ThreadError::Deadlock);
            }
            state.waiters.push_back(me.thread);
        }

        log::trace!("thread {} waits for mutex {:p}", me.thread, self);
        kernel.block(cs, BlockReason::Mutex);
        // `unlock` made us the owner before waking us.
        debug_assert_eq!(self.state.lock().owner, Some(me));
        Ok(())
    }

    /// Acquire the lock only if that needs no waiting.
    ///
    /// # Errors
    ///
    /// `Busy` if another thread, of any runtime, holds it.
    pub fn try_lock(&self) -> ThreadResult<()> {
        let kernel = current_kernel()?;
        let mut cs = kernel.critical();
        let me = Owner {
            runtime: cs.runtime_id(),
            thread: cs.current(),
        };
        let acquired = self.try_acquire(&mut self.state.lock(), me)?;
        if let Acquire::Acquired = acquired {
            cs.note_mutex_acquired(me.thread);
        }
        drop(cs);
        match acquired {
            Acquire::Acquired | Acquire::Reentered => {
                kernel.preemption_point();
                Ok(())
            }
            Acquire::Wait => Err(ThreadError::Busy),
        }
    }

    /// Release one level of ownership. The last release passes the lock to
    /// the first waiter, if any.
    ///
    /// # Errors
    ///
    /// `NotOwner` if the calling thread does not hold the lock.
    pub fn unlock(&self) -> ThreadResult<()> {
        let kernel = current_kernel()?;
        let mut cs = kernel.critical();
        let me = Owner {
            runtime: cs.runtime_id(),
            thread: cs.current(),
        };
        let handoff = {
            let mut state = self.state.lock();
            if state.owner != Some(me) {
                return Err(ThreadError::NotOwner);
            }
            state.recursion -= 1;
            if state.recursion > 0 {
                return Ok(());
            }
            match state.waiters.pop_front() {
                Some(next) => {
                    state.owner = Some(Owner {
                        runtime: me.runtime,
                        thread: next,
                    });
                    state.recursion = 1;
                    Some(next)
                }
                None => {
                    state.owner = None;
                    self.locked.store(false, Ordering::Release);
                    None
                }
            }
        };

        cs.note_mutex_released(me.thread);
        if let Some(next) = handoff {
            log::trace!("mutex {:p} handed from {} to {}", self, me.thread, next);
            cs.note_mutex_acquired(next);
            kernel.wake(&mut cs, next);
        }
        drop(cs);
        kernel.preemption_point();
        Ok(())
    }

    /// Retire the mutex. Later operations on it fail with `InvalidArgument`.
    ///
    /// # Errors
    ///
    /// `Busy` if the mutex is locked or has waiters.
    pub fn destroy(&self) -> ThreadResult<()> {
        let mut state = self.state.lock();
        if self.locked.load(Ordering::Acquire) || !state.waiters.is_empty() {
            return Err(ThreadError::Busy);
        }
        state.destroyed = true;
        Ok(())
    }

    /// Lock and return a guard that unlocks when dropped.
    pub fn guard(&self) -> ThreadResult<MutexGuard<'_>> {
        self.lock()?;
        Ok(MutexGuard { mutex: self })
    }

    /// Whether some thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Current owner, as an id within its own runtime.
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner.map(|owner| owner.thread)
    }

    /// Number of threads blocked on the lock.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

/// RAII guard from [`Mutex::guard`].
#[must_use = "the mutex unlocks as soon as the guard is dropped"]
#[derive(Debug)]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.mutex.unlock() {
            log::warn!("failed to release mutex guard: {}", err);
        }
    }
}
