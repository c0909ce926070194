//! Round-robin ready queue.

use super::trait_def::ReadyQueue;
use crate::thread::ThreadId;
use std::collections::VecDeque;

/// FIFO ready queue.
///
/// With N queued threads and no blocking, every thread is picked exactly
/// once in any N consecutive picks.
#[derive(Debug, Default)]
pub struct RoundRobinQueue {
    queue: VecDeque<ThreadId>,
}

impl RoundRobinQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued threads from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.queue.iter().copied()
    }
}

impl ReadyQueue for RoundRobinQueue {
    type Key = ();

    fn add(&mut self, id: ThreadId, _key: ()) {
        self.remove(id);
        self.queue.push_back(id);
    }

    fn remove(&mut self, id: ThreadId) -> bool {
        match self.queue.iter().position(|&queued| queued == id) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    fn pick_next(&mut self) -> Option<ThreadId> {
        self.queue.pop_front()
    }

    fn contains(&self, id: ThreadId) -> bool {
        self.queue.contains(&id)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}
