//! Kernel: dispatcher and thread lifecycle.
//!
//! A [`Kernel`] owns every control block, the three policy ready-sets, and
//! the id of the running thread. A [`Runtime`] creates one kernel, publishes
//! it to the calling OS thread, and tears it down again. Several runtimes
//! may exist at once on different OS threads.
//!
//! # Critical sections
//!
//! All scheduler state sits behind one `spin::Mutex`. Entering a critical
//! section raises the kernel's preemption-disable count and takes the lock;
//! leaving reverses both. The timer signal handler never touches scheduler
//! state; it only advances [`TICKS`]. Involuntary switches happen at
//! preemption points, which are skipped while the count is raised, so the
//! lock is never contended. Finding it held means the kernel re-entered
//! itself, which is fatal.

use crate::arch::{self, Arch, Context, DefaultArch};
use crate::config::Config;
use crate::errors::{ThreadError, ThreadResult};
use crate::mem::{StackPool, StackPoolStats, StackSizeClass};
use crate::platform_timer::PreemptionTimer;
use crate::sched::{Policy, PolicyClass, ReadySets, SchedParams};
use crate::thread::{
    BlockReason, ExitValue, Outcome, StartFn, Tcb, ThreadId, ThreadInfo, ThreadState,
};
use crate::time::TICKS;
use core::cell::Cell;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::ops::{Deref, DerefMut};
use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

std::thread_local! {
    static CURRENT_KERNEL: Cell<*const Kernel> = Cell::new(core::ptr::null());
}

/// Kernel of the runtime active on this OS thread.
pub(crate) fn current_kernel() -> ThreadResult<&'static Kernel> {
    let kernel = CURRENT_KERNEL.with(Cell::get);
    if kernel.is_null() {
        return Err(ThreadError::NotInitialized);
    }
    // SAFETY: the pointer is published by `Runtime::new` and cleared before
    // the kernel is freed. Only this OS thread ever reads it.
    Ok(unsafe { &*kernel })
}

static NEXT_KERNEL_ID: AtomicUsize = AtomicUsize::new(1);

/// Unwind payload carrying the value passed to [`crate::exit`].
pub(crate) struct ExitRequest(pub(crate) ExitValue);

fn fatal(message: core::fmt::Arguments<'_>) -> ! {
    log::error!("fatal scheduler error: {}", message);
    std::process::abort()
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    /// Control blocks in the thread table (main thread and zombies included).
    pub threads: usize,
    pub ready: usize,
    pub blocked: usize,
    pub zombies: usize,
    pub spawned: u64,
    /// Picks made by the dispatcher, including re-picks of the same thread.
    pub dispatches: u64,
    /// Dispatches that switched to a different thread.
    pub context_switches: u64,
    /// Involuntary switches through preemption points.
    pub preemptions: u64,
    pub yields: u64,
}

#[derive(Debug, Default)]
struct Counters {
    spawned: u64,
    dispatches: u64,
    context_switches: u64,
    preemptions: u64,
    yields: u64,
}

pub(crate) struct State {
    threads: BTreeMap<ThreadId, Box<Tcb>>,
    ready: ReadySets,
    current: ThreadId,
    main: ThreadId,
    /// Detached threads that terminated; reaped after the switch away from
    /// their stack.
    graveyard: Vec<Box<Tcb>>,
    next_id: usize,
    counters: Counters,
}

impl State {
    fn tcb(&self, id: ThreadId) -> &Tcb {
        match self.threads.get(&id) {
            Some(tcb) => tcb,
            None => fatal(format_args!("thread {} missing from the thread table", id)),
        }
    }

    fn tcb_mut(&mut self, id: ThreadId) -> &mut Tcb {
        match self.threads.get_mut(&id) {
            Some(tcb) => tcb,
            None => fatal(format_args!("thread {} missing from the thread table", id)),
        }
    }

    fn current_class(&self) -> PolicyClass {
        self.tcb(self.current).params.class()
    }

    fn allocate_id(&mut self) -> ThreadId {
        let id = ThreadId::from_raw(self.next_id)
            .unwrap_or_else(|| fatal(format_args!("thread id space exhausted")));
        self.next_id += 1;
        id
    }

    /// Whether `target` is blocked, directly or through a chain of joins,
    /// joining `joiner`.
    fn join_cycle(&self, joiner: ThreadId, target: ThreadId) -> bool {
        let mut cursor = target;
        for _ in 0..self.threads.len() {
            match self.threads.get(&cursor).map(|tcb| tcb.state) {
                Some(ThreadState::Blocked(BlockReason::Join(next))) if next == joiner => {
                    return true
                }
                Some(ThreadState::Blocked(BlockReason::Join(next))) => cursor = next,
                _ => return false,
            }
        }
        false
    }
}

/// Guard for a scheduler critical section.
pub(crate) struct Critical<'k> {
    kernel: &'k Kernel,
    state: spin::MutexGuard<'k, State>,
}

impl Deref for Critical<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

impl DerefMut for Critical<'_> {
    fn deref_mut(&mut self) -> &mut State {
        &mut self.state
    }
}

impl Drop for Critical<'_> {
    fn drop(&mut self) {
        self.kernel.preempt_count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Critical<'_> {
    pub(crate) fn current(&self) -> ThreadId {
        self.state.current
    }

    pub(crate) fn nothing_else_ready(&self) -> bool {
        self.state.ready.is_empty()
    }

    /// Identity of the kernel this section belongs to.
    pub(crate) fn runtime_id(&self) -> usize {
        self.kernel.id
    }

    pub(crate) fn note_mutex_acquired(&mut self, id: ThreadId) {
        self.state.tcb_mut(id).mutexes_held += 1;
    }

    pub(crate) fn note_mutex_released(&mut self, id: ThreadId) {
        let tcb = self.state.tcb_mut(id);
        tcb.mutexes_held = tcb.mutexes_held.saturating_sub(1);
    }
}

/// Guard returned by [`Kernel::mask_preemption`].
pub(crate) struct PreemptMask<'k> {
    kernel: &'k Kernel,
}

impl Drop for PreemptMask<'_> {
    fn drop(&mut self) {
        self.kernel.preempt_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Scheduler instance.
pub struct Kernel {
    /// Process-unique; thread ids are only unique within one kernel.
    id: usize,
    state: spin::Mutex<State>,
    config: Config,
    stack_pool: StackPool,
    /// Preemption-disable depth of the running thread. Saved and restored
    /// around every context switch.
    preempt_count: AtomicUsize,
    /// Set when the running thread should give up the CPU at the next
    /// preemption point.
    need_resched: AtomicBool,
    /// Tick count when the running thread's quantum started.
    slice_tick: AtomicU64,
    /// Whether an interval timer drives quantum expiry.
    timer_armed: AtomicBool,
}

impl Kernel {
    fn new(config: Config) -> Self {
        let main = ThreadId::MAIN;
        let mut tcb = Tcb::new(main, Some("main".into()), SchedParams::RoundRobin, None, None);
        tcb.state = ThreadState::Running;
        tcb.dispatches = 1;

        let mut threads = BTreeMap::new();
        threads.insert(main, tcb);

        Self {
            id: NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed),
            state: spin::Mutex::new(State {
                threads,
                ready: ReadySets::new(config.lottery_seed),
                current: main,
                main,
                graveyard: Vec::new(),
                next_id: main.get() + 1,
                counters: Counters::default(),
            }),
            config,
            stack_pool: StackPool::new(),
            preempt_count: AtomicUsize::new(0),
            need_resched: AtomicBool::new(false),
            slice_tick: AtomicU64::new(TICKS.ticks()),
            timer_armed: AtomicBool::new(false),
        }
    }

    pub(crate) fn critical(&self) -> Critical<'_> {
        self.preempt_count.fetch_add(1, Ordering::AcqRel);
        match self.state.try_lock() {
            Some(state) => Critical {
                kernel: self,
                state,
            },
            None => fatal(format_args!("scheduler state re-entered")),
        }
    }

    pub(crate) fn mask_preemption(&self) -> PreemptMask<'_> {
        self.preempt_count.fetch_add(1, Ordering::AcqRel);
        PreemptMask { kernel: self }
    }

    /// Configuration this kernel runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Id of the running thread.
    pub fn current(&self) -> ThreadId {
        self.critical().current
    }

    /// Id of the thread that created the runtime.
    pub fn main_thread(&self) -> ThreadId {
        self.critical().main
    }

    /// Whether involuntary preemption is currently deferred.
    pub fn preemption_masked(&self) -> bool {
        self.preempt_count.load(Ordering::Acquire) > 0
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Pick the next thread and switch to it.
    ///
    /// The running thread must already be back in its ready-set, blocked,
    /// or a zombie. Returns once the calling thread is dispatched again.
    fn dispatch(&self, mut cs: Critical<'_>) {
        let prev = cs.current;
        let next = self.pick_and_mark(&mut cs);
        if next == prev {
            return;
        }

        let prev_ctx: *mut Context = &mut cs.tcb_mut(prev).context;
        let next_ctx: *const Context = &cs.tcb(next).context;
        drop(cs);

        let depth = self.preempt_count.load(Ordering::Acquire);
        // SAFETY: both contexts live in boxed control blocks that stay in the
        // thread table until their thread is reclaimed, which never happens
        // to a thread that can still be switched to.
        unsafe { DefaultArch::context_switch(prev_ctx, next_ctx) };
        self.preempt_count.store(depth, Ordering::Release);
        self.finish_switch();
    }

    fn pick_and_mark(&self, cs: &mut Critical<'_>) -> ThreadId {
        let prev = cs.current;
        let next = match cs.ready.pick_next() {
            Some(next) => next,
            None => fatal(format_args!("dispatch with an empty ready set")),
        };

        self.need_resched.store(false, Ordering::Release);
        self.slice_tick.store(TICKS.ticks(), Ordering::Release);

        let tcb = cs.tcb_mut(next);
        if tcb.state != ThreadState::Ready {
            fatal(format_args!("thread {} picked in state {:?}", next, tcb.state));
        }
        tcb.state = ThreadState::Running;
        tcb.dispatches += 1;

        cs.current = next;
        cs.counters.dispatches += 1;
        if next != prev {
            cs.counters.context_switches += 1;
            log::trace!("switch {} -> {}", prev, next);
        }
        next
    }

    /// First thing a thread does after being switched to: reap detached
    /// threads whose stacks are no longer in use.
    fn finish_switch(&self) {
        let graveyard = mem::take(&mut self.critical().graveyard);
        for tcb in graveyard {
            drop(self.reclaim(tcb));
        }
    }

    /// Release a terminated thread's stack and hand back its outcome.
    fn reclaim(&self, mut tcb: Box<Tcb>) -> Option<Outcome> {
        if let Some(stack) = tcb.stack.take() {
            if !self.stack_pool.release(stack) {
                log::warn!("thread {} overflowed its stack", tcb.id);
            }
        }
        log::debug!("reclaimed thread {}", tcb.id);
        tcb.outcome.take()
    }

    /// Return the running thread to its ready-set and dispatch.
    fn reschedule(&self, voluntary: bool) {
        let mut cs = self.critical();
        let current = cs.current;
        let params = cs.tcb(current).params;
        cs.tcb_mut(current).state = ThreadState::Ready;
        cs.ready.requeue(current, params);
        if voluntary {
            cs.counters.yields += 1;
        } else {
            cs.counters.preemptions += 1;
        }
        self.dispatch(cs);
    }

    /// Give up the CPU voluntarily.
    pub fn yield_now(&self) {
        self.reschedule(true);
    }

    /// Take a pending involuntary switch, if any.
    ///
    /// A switch is pending when the timer ticked since the running thread was
    /// dispatched, or when a thread of a higher policy class became ready.
    /// Skipped while preemption is masked and while the thread is unwinding.
    pub fn preemption_point(&self) {
        if self.preemption_masked() || std::thread::panicking() {
            return;
        }
        let expired = self.timer_armed.load(Ordering::Acquire)
            && TICKS.elapsed_since(self.slice_tick.load(Ordering::Acquire));
        if expired || self.need_resched.load(Ordering::Acquire) {
            self.reschedule(false);
        }
    }

    /// Timer callback: the running thread's quantum is over.
    ///
    /// Switches at once unless preemption is masked, in which case the
    /// switch happens at the first preemption point after unmasking.
    pub fn timer_interrupt(&self) {
        self.need_resched.store(true, Ordering::Release);
        self.preemption_point();
    }

    /// Block the running thread and dispatch.
    ///
    /// The caller has already registered the thread wherever its waker will
    /// find it and checked that another thread is ready.
    pub(crate) fn block(&self, mut cs: Critical<'_>, reason: BlockReason) {
        let current = cs.current;
        cs.tcb_mut(current).state = ThreadState::Blocked(reason);
        log::trace!("thread {} blocked on {:?}", current, reason);
        self.dispatch(cs);
    }

    /// Make a blocked thread ready again.
    pub(crate) fn wake(&self, cs: &mut Critical<'_>, id: ThreadId) {
        let tcb = cs.tcb_mut(id);
        if !matches!(tcb.state, ThreadState::Blocked(_)) {
            return;
        }
        tcb.state = ThreadState::Ready;
        let params = tcb.params;
        cs.ready.add(id, params);
        if params.class() > cs.current_class() {
            self.need_resched.store(true, Ordering::Release);
        }
        log::trace!("thread {} woken", id);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn spawn_boxed(
        &self,
        start: StartFn,
        policy: Policy,
        name: Option<String>,
        stack_class: StackSizeClass,
    ) -> ThreadResult<ThreadId> {
        let params = policy.resolve(self.config.deadline_policy)?;
        let mut cs = self.critical();
        if cs.threads.len() >= self.config.max_threads {
            return Err(ThreadError::OutOfIds);
        }
        let stack = self
            .stack_pool
            .allocate(stack_class)
            .ok_or(ThreadError::OutOfMemory)?;

        let id = cs.allocate_id();
        let stack_top = stack.initial_sp();
        let mut tcb = Tcb::new(id, name, params, Some(stack), Some(start));
        // SAFETY: the stack is owned by the control block, which outlives
        // every switch to this context.
        unsafe {
            DefaultArch::init_context(
                &mut tcb.context,
                stack_top,
                thread_entry,
                self as *const Kernel as usize,
            )
        };
        cs.threads.insert(id, tcb);
        cs.ready.add(id, params);
        cs.counters.spawned += 1;
        if params.class() > cs.current_class() {
            self.need_resched.store(true, Ordering::Release);
        }
        log::debug!("spawned thread {} ({:?}, {:?})", id, params, stack_class);
        drop(cs);

        self.preemption_point();
        Ok(id)
    }

    /// Terminate the running thread. Wakes its joiners, parks a detached
    /// thread for reaping, and switches away for good.
    fn terminate(&self, outcome: Outcome) -> ! {
        let mut cs = self.critical();
        let id = cs.current;
        let panicked = matches!(outcome, Outcome::Panicked);

        let tcb = cs.tcb_mut(id);
        tcb.state = ThreadState::Zombie;
        tcb.outcome = Some(outcome);
        let detached = tcb.detached;
        let mutexes_held = tcb.mutexes_held;
        let waiters = mem::take(&mut tcb.join_waiters);
        for waiter in waiters {
            self.wake(&mut cs, waiter);
        }
        if detached {
            if let Some(tcb) = cs.threads.remove(&id) {
                cs.graveyard.push(tcb);
            }
        }
        log::debug!(
            "thread {} exited{}{}",
            id,
            if panicked { " by panicking" } else { "" },
            if detached { " (detached)" } else { "" }
        );
        if mutexes_held > 0 {
            log::warn!(
                "thread {} exited holding {} mutex(es); they stay locked",
                id,
                mutexes_held
            );
        }

        if cs.ready.is_empty() {
            let blocked = cs
                .threads
                .values()
                .filter(|tcb| matches!(tcb.state, ThreadState::Blocked(_)))
                .count();
            if blocked > 0 {
                fatal(format_args!(
                    "thread {} exited leaving {} thread(s) blocked with nothing to run",
                    id, blocked
                ));
            }
            log::info!("last thread exited, terminating process");
            std::process::exit(0);
        }

        let next = self.pick_and_mark(&mut cs);
        let next_ctx: *const Context = &cs.tcb(next).context;
        drop(cs);
        // SAFETY: see `dispatch`. This stack is never resumed; if the thread
        // was detached it is freed by the next thread in `finish_switch`.
        unsafe { arch::restore::<DefaultArch>(next_ctx) }
    }

    /// `exit` called on the main thread: it has no trampoline to unwind to.
    pub(crate) fn exit_main(&self, value: ExitValue) -> ! {
        self.terminate(Outcome::Returned(value))
    }

    /// Wait for `target` to terminate, then reclaim it.
    pub fn join(&self, target: ThreadId) -> ThreadResult<ExitValue> {
        let mut cs = self.critical();
        let me = cs.current;
        if target == me {
            return Err(ThreadError::Deadlock);
        }
        let tcb = cs.threads.get(&target).ok_or(ThreadError::NoSuchThread)?;
        if tcb.detached {
            return Err(ThreadError::NoSuchThread);
        }

        if tcb.state != ThreadState::Zombie {
            if cs.join_cycle(me, target) || cs.ready.is_empty() {
                return Err(ThreadError::Deadlock);
            }
            cs.tcb_mut(target).join_waiters.push_back(me);
            self.block(cs, BlockReason::Join(target));
            cs = self.critical();
        }

        // A third thread may have detached or reclaimed the target meanwhile.
        let reclaimable = matches!(
            cs.threads.get(&target),
            Some(tcb) if tcb.state == ThreadState::Zombie && !tcb.detached
        );
        if !reclaimable {
            return Err(ThreadError::NoSuchThread);
        }
        let tcb = cs.threads.remove(&target);
        drop(cs);

        let outcome = tcb.and_then(|tcb| self.reclaim(tcb));
        log::debug!("thread {} joined {}", me, target);
        self.preemption_point();
        match outcome {
            Some(Outcome::Returned(value)) => Ok(value),
            Some(Outcome::Panicked) => Err(ThreadError::Panicked),
            None => Err(ThreadError::NoSuchThread),
        }
    }

    /// Mark `target` detached. A terminated target is reclaimed right away.
    pub fn detach(&self, target: ThreadId) -> ThreadResult<()> {
        let mut cs = self.critical();
        let tcb = cs
            .threads
            .get_mut(&target)
            .ok_or(ThreadError::NoSuchThread)?;
        if tcb.detached {
            return Err(ThreadError::AlreadyDetached);
        }
        tcb.detached = true;
        let zombie = tcb.state == ThreadState::Zombie;
        let tcb = if zombie {
            cs.threads.remove(&target)
        } else {
            None
        };
        drop(cs);

        log::debug!("thread {} detached", target);
        if let Some(tcb) = tcb {
            drop(self.reclaim(tcb));
        }
        Ok(())
    }

    /// Move the running thread to `policy`.
    ///
    /// Takes effect immediately: if a thread of a higher class than the new
    /// one is ready, the caller gives up the CPU.
    pub fn change_policy(&self, policy: Policy) -> ThreadResult<()> {
        let params = policy.resolve(self.config.deadline_policy)?;
        let mut cs = self.critical();
        let current = cs.current;
        cs.ready.remove(current);
        cs.tcb_mut(current).params = params;
        if cs
            .ready
            .highest_class()
            .map_or(false, |ready| ready > params.class())
        {
            self.need_resched.store(true, Ordering::Release);
        }
        log::debug!("thread {} changed policy to {:?}", current, params);
        drop(cs);

        self.preemption_point();
        Ok(())
    }

    /// Move another thread to `policy`.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - `target` is the running thread; it must use
    ///   [`Kernel::change_policy`] itself
    /// * `NoSuchThread` - `target` is unknown or terminated
    pub fn set_policy(&self, target: ThreadId, policy: Policy) -> ThreadResult<()> {
        let mut cs = self.critical();
        if target == cs.current {
            return Err(ThreadError::InvalidArgument(
                "cannot change the policy of the running thread",
            ));
        }
        let state = match cs.threads.get(&target) {
            Some(tcb) if tcb.state != ThreadState::Zombie => tcb.state,
            _ => return Err(ThreadError::NoSuchThread),
        };
        let params = policy.resolve(self.config.deadline_policy)?;

        cs.tcb_mut(target).params = params;
        if state == ThreadState::Ready {
            cs.ready.add(target, params);
            if params.class() > cs.current_class() {
                self.need_resched.store(true, Ordering::Release);
            }
        }
        log::debug!("thread {} moved to {:?}", target, params);
        drop(cs);

        self.preemption_point();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Control block snapshot of `id`.
    pub fn thread_info(&self, id: ThreadId) -> ThreadResult<ThreadInfo> {
        self.critical()
            .threads
            .get(&id)
            .map(|tcb| tcb.info())
            .ok_or(ThreadError::NoSuchThread)
    }

    /// Scheduler counters.
    pub fn stats(&self) -> KernelStats {
        let cs = self.critical();
        let mut stats = KernelStats {
            threads: cs.threads.len(),
            ready: cs.ready.len(),
            spawned: cs.counters.spawned,
            dispatches: cs.counters.dispatches,
            context_switches: cs.counters.context_switches,
            preemptions: cs.counters.preemptions,
            yields: cs.counters.yields,
            ..KernelStats::default()
        };
        for tcb in cs.threads.values() {
            match tcb.state {
                ThreadState::Blocked(_) => stats.blocked += 1,
                ThreadState::Zombie => stats.zombies += 1,
                ThreadState::Ready | ThreadState::Running => {}
            }
        }
        stats
    }

    /// Stack pool counters.
    pub fn stack_stats(&self) -> StackPoolStats {
        self.stack_pool.stats()
    }

    /// Drop every control block except the running one.
    fn discard_threads(&self) -> usize {
        let mut cs = self.critical();
        let current = cs.current;
        let graveyard = mem::take(&mut cs.graveyard);
        let threads = mem::take(&mut cs.threads);
        let mut discarded = Vec::new();
        for (id, tcb) in threads {
            if id == current {
                cs.threads.insert(id, tcb);
            } else {
                cs.ready.remove(id);
                discarded.push(tcb);
            }
        }
        drop(cs);

        let live = discarded
            .iter()
            .filter(|tcb| tcb.state != ThreadState::Zombie)
            .count();
        for tcb in graveyard.into_iter().chain(discarded) {
            drop(self.reclaim(tcb));
        }
        live
    }
}

/// Entry trampoline of every spawned thread.
///
/// Runs the start routine and always ends in `terminate`; a thread cannot
/// return past this frame.
extern "C" fn thread_entry(arg: usize) -> ! {
    // SAFETY: `arg` is the kernel pointer baked in by `spawn_boxed`; the
    // kernel outlives all of its threads.
    let kernel = unsafe { &*(arg as *const Kernel) };
    kernel.preempt_count.store(0, Ordering::Release);
    kernel.finish_switch();

    let (id, start) = {
        let mut cs = kernel.critical();
        let id = cs.current;
        (id, cs.tcb_mut(id).start.take())
    };
    let start = match start {
        Some(start) => start,
        None => fatal(format_args!("thread {} started twice", id)),
    };

    let outcome = match panic::catch_unwind(AssertUnwindSafe(start)) {
        Ok(value) => Outcome::Returned(value),
        Err(payload) => match payload.downcast::<ExitRequest>() {
            Ok(request) => Outcome::Returned(request.0),
            Err(_) => {
                log::warn!("thread {} panicked", id);
                Outcome::Panicked
            }
        },
    };
    kernel.terminate(outcome)
}

/// Owner of one scheduler instance.
///
/// Creating a runtime turns the calling OS thread into the runtime's main
/// thread (id 1, Round-Robin). The thread API then works on that OS thread
/// until the runtime is dropped.
///
/// ```ignore
/// let runtime = uthreads::Runtime::new(uthreads::Config::default())?;
/// let worker = uthreads::spawn(|| 6 * 7)?;
/// assert_eq!(worker.join()?, 42);
/// runtime.shutdown();
/// ```
pub struct Runtime {
    kernel: ManuallyDrop<Box<Kernel>>,
    timer: Option<PreemptionTimer>,
    _not_send: PhantomData<*const ()>,
}

impl Runtime {
    /// Start a runtime on the calling OS thread.
    ///
    /// # Errors
    ///
    /// * `AlreadyInitialized` - a runtime is already active on this OS thread
    /// * `InvalidArgument` - `max_threads` is zero
    /// * `Timer` - the preemption timer could not be started
    pub fn new(config: Config) -> ThreadResult<Runtime> {
        if current_kernel().is_ok() {
            return Err(ThreadError::AlreadyInitialized);
        }
        if config.max_threads == 0 {
            return Err(ThreadError::InvalidArgument("max_threads must be positive"));
        }

        let timer = config.quantum.map(PreemptionTimer::start).transpose()?;
        let kernel = Box::new(Kernel::new(config));
        kernel.timer_armed.store(timer.is_some(), Ordering::Release);
        CURRENT_KERNEL.with(|current| current.set(&*kernel));

        log::info!(
            "runtime started (quantum {:?}, max {} threads)",
            kernel.config.quantum,
            kernel.config.max_threads
        );
        Ok(Runtime {
            kernel: ManuallyDrop::new(kernel),
            timer,
            _not_send: PhantomData,
        })
    }

    /// Start a runtime configured from the environment
    /// (see [`Config::from_env`]).
    pub fn from_env() -> ThreadResult<Runtime> {
        Self::new(Config::from_env())
    }

    /// The runtime's kernel.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Stop the runtime. Threads that have not terminated are discarded
    /// without running their destructors.
    pub fn shutdown(self) {}
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let current = self.kernel.current();
        if current != self.kernel.main_thread() {
            log::error!(
                "runtime dropped on thread {} instead of the main thread; leaking it",
                current
            );
            return;
        }

        drop(self.timer.take());
        CURRENT_KERNEL.with(|kernel| kernel.set(core::ptr::null()));

        // SAFETY: taken exactly once, here.
        let kernel = unsafe { ManuallyDrop::take(&mut self.kernel) };
        let live = kernel.discard_threads();
        if live > 0 {
            log::warn!("runtime shut down with {} live thread(s)", live);
        }
        log::info!("runtime stopped ({:?})", kernel.stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Runtime {
        Runtime::new(Config::default().with_quantum(None)).unwrap()
    }

    #[test]
    fn test_runtime_lifecycle() {
        let runtime = runtime();
        assert!(matches!(
            Runtime::new(Config::default().with_quantum(None)),
            Err(ThreadError::AlreadyInitialized)
        ));
        assert_eq!(runtime.kernel().current(), ThreadId::MAIN);
        let stats = runtime.kernel().stats();
        assert_eq!(stats.threads, 1);
        assert_eq!(stats.ready, 0);
        runtime.shutdown();
        assert!(current_kernel().is_err());

        let again = self::runtime();
        drop(again);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            Runtime::new(Config::default().with_max_threads(0)).err(),
            Some(ThreadError::InvalidArgument("max_threads must be positive"))
        );
        assert!(current_kernel().is_err());
    }

    #[test]
    fn test_critical_section_masks_preemption() {
        let runtime = runtime();
        let kernel = runtime.kernel();
        assert!(!kernel.preemption_masked());
        {
            let cs = kernel.critical();
            assert!(kernel.preemption_masked());
            assert_eq!(cs.current(), ThreadId::MAIN);
            assert!(cs.nothing_else_ready());
        }
        assert!(!kernel.preemption_masked());
    }

    #[test]
    fn test_yield_alone_is_a_no_op_switch() {
        let runtime = runtime();
        let kernel = runtime.kernel();
        kernel.yield_now();
        kernel.timer_interrupt();
        let stats = kernel.stats();
        assert_eq!(stats.yields, 1);
        assert_eq!(stats.preemptions, 1);
        assert_eq!(stats.context_switches, 0);
        assert_eq!(
            kernel.thread_info(ThreadId::MAIN).unwrap().state,
            ThreadState::Running
        );
    }

    #[test]
    fn test_join_cycle_detection() {
        let runtime = runtime();
        let kernel = runtime.kernel();
        let mut cs = kernel.critical();
        let a = cs.allocate_id();
        let b = cs.allocate_id();
        for id in [a, b] {
            cs.threads
                .insert(id, Tcb::new(id, None, SchedParams::RoundRobin, None, None));
        }
        cs.tcb_mut(a).state = ThreadState::Blocked(BlockReason::Join(b));
        cs.tcb_mut(b).state = ThreadState::Blocked(BlockReason::Join(ThreadId::MAIN));
        assert!(cs.join_cycle(ThreadId::MAIN, a));
        assert!(cs.join_cycle(ThreadId::MAIN, b));
        cs.tcb_mut(b).state = ThreadState::Ready;
        assert!(!cs.join_cycle(ThreadId::MAIN, a));
    }
}
