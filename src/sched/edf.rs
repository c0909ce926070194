//! Earliest-deadline-first ready heap.

use super::trait_def::ReadyQueue;
use crate::thread::ThreadId;
use crate::time::Instant;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Min-heap of ready threads keyed by absolute deadline.
///
/// Equal deadlines are picked in insertion order. Preemption reinserts a
/// thread with its unchanged deadline; deadlines are never extended here.
#[derive(Debug, Default)]
pub struct EdfQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, ThreadId)>>,
    seq: u64,
}

impl EdfQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest queued deadline.
    pub fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }
}

impl ReadyQueue for EdfQueue {
    type Key = Instant;

    fn add(&mut self, id: ThreadId, deadline: Instant) {
        self.remove(id);
        self.seq += 1;
        self.heap.push(Reverse((deadline, self.seq, id)));
    }

    fn remove(&mut self, id: ThreadId) -> bool {
        let before = self.heap.len();
        self.heap.retain(|Reverse((_, _, queued))| *queued != id);
        self.heap.len() != before
    }

    fn pick_next(&mut self) -> Option<ThreadId> {
        self.heap.pop().map(|Reverse((_, _, id))| id)
    }

    fn contains(&self, id: ThreadId) -> bool {
        self.heap.iter().any(|Reverse((_, _, queued))| *queued == id)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: usize) -> ThreadId {
        ThreadId::from_raw(n).unwrap()
    }

    #[test]
    fn test_picks_in_deadline_order() {
        let mut edf = EdfQueue::new();
        edf.add(tid(1), Instant::from_nanos(300));
        edf.add(tid(2), Instant::from_nanos(100));
        edf.add(tid(3), Instant::from_nanos(200));

        assert_eq!(edf.peek_deadline(), Some(Instant::from_nanos(100)));
        assert_eq!(edf.pick_next(), Some(tid(2)));
        assert_eq!(edf.pick_next(), Some(tid(3)));
        assert_eq!(edf.pick_next(), Some(tid(1)));
        assert_eq!(edf.pick_next(), None);
    }

    #[test]
    fn test_equal_deadlines_are_fifo() {
        let mut edf = EdfQueue::new();
        let deadline = Instant::from_nanos(50);
        for n in [4, 2, 7] {
            edf.add(tid(n), deadline);
        }
        assert_eq!(edf.pick_next(), Some(tid(4)));
        assert_eq!(edf.pick_next(), Some(tid(2)));
        assert_eq!(edf.pick_next(), Some(tid(7)));
    }

    #[test]
    fn test_readd_replaces_deadline() {
        let mut edf = EdfQueue::new();
        edf.add(tid(1), Instant::from_nanos(10));
        edf.add(tid(2), Instant::from_nanos(20));
        edf.add(tid(1), Instant::from_nanos(30));
        assert_eq!(edf.len(), 2);
        assert_eq!(edf.pick_next(), Some(tid(2)));
        assert_eq!(edf.pick_next(), Some(tid(1)));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut edf = EdfQueue::new();
        edf.add(tid(1), Instant::from_nanos(10));
        assert!(edf.remove(tid(1)));
        assert!(!edf.remove(tid(1)));
        assert!(!edf.contains(tid(1)));
        edf.requeue_after_preemption(tid(1), Instant::from_nanos(10));
        assert_eq!(edf.pick_next(), Some(tid(1)));
        assert!(edf.is_empty());
    }
}
