//! Ready-queue trait shared by the three policy modules.

use crate::thread::ThreadId;

/// A policy module's ready-set.
///
/// Queues hold thread ids only; the control blocks stay in the kernel's
/// thread table. A thread belongs to at most one ready-set at a time, and the
/// running thread belongs to none.
pub trait ReadyQueue {
    /// Per-thread scheduling key (nothing, ticket count, or deadline).
    type Key: Copy;

    /// Make `id` ready under `key`.
    ///
    /// Adding a thread that is already queued replaces its previous entry,
    /// so a thread can never be picked twice for one insertion.
    fn add(&mut self, id: ThreadId, key: Self::Key);

    /// Remove `id` if present.
    ///
    /// # Returns
    ///
    /// `true` if the thread was queued. Removing an absent thread is a no-op.
    fn remove(&mut self, id: ThreadId) -> bool;

    /// Remove and return the next thread according to the policy.
    fn pick_next(&mut self) -> Option<ThreadId>;

    /// Put back a thread that lost the CPU to a yield or a quantum expiry.
    fn requeue_after_preemption(&mut self, id: ThreadId, key: Self::Key) {
        self.add(id, key);
    }

    /// Whether `id` is queued.
    fn contains(&self, id: ThreadId) -> bool;

    /// Number of queued threads.
    fn len(&self) -> usize;

    /// Whether no thread is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
