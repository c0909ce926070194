//! Lottery ready set.
//!
//! Each queued thread holds a number of tickets. A pick draws a uniform
//! ticket number in `[0, total)` and walks the set accumulating weights; the
//! first thread whose cumulative weight exceeds the draw wins. Over many
//! picks a thread is selected with frequency `tickets / total`.

use super::trait_def::ReadyQueue;
use crate::thread::ThreadId;

/// xorshift64* generator. Deterministic for a given seed.
#[derive(Debug, Clone)]
pub struct TicketRng {
    state: u64,
}

impl TicketRng {
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        Self {
            state: if seed == 0 { 0x2545_F491_4F6C_DD1D } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform value in `[0, bound)`. `bound` must be non-zero.
    pub fn below(&mut self, bound: u64) -> u64 {
        ((self.next_u64() as u128 * bound as u128) >> 64) as u64
    }
}

/// Ticket-weighted ready set.
#[derive(Debug)]
pub struct LotteryQueue {
    entries: Vec<(ThreadId, u32)>,
    total_tickets: u64,
    rng: TicketRng,
}

impl LotteryQueue {
    pub fn new(seed: u64) -> Self {
        Self {
            entries: Vec::new(),
            total_tickets: 0,
            rng: TicketRng::new(seed),
        }
    }

    /// Sum of the tickets of all queued threads.
    pub fn total_tickets(&self) -> u64 {
        self.total_tickets
    }

    /// Tickets held by `id`, if queued.
    pub fn tickets(&self, id: ThreadId) -> Option<u32> {
        self.entries
            .iter()
            .find(|(queued, _)| *queued == id)
            .map(|&(_, tickets)| tickets)
    }

    fn winner(&self, draw: u64) -> Option<usize> {
        let mut cumulative = 0u64;
        self.entries.iter().position(|&(_, tickets)| {
            cumulative += u64::from(tickets);
            cumulative > draw
        })
    }
}

impl ReadyQueue for LotteryQueue {
    type Key = u32;

    fn add(&mut self, id: ThreadId, tickets: u32) {
        self.remove(id);
        let tickets = tickets.max(1);
        self.entries.push((id, tickets));
        self.total_tickets += u64::from(tickets);
    }

    fn remove(&mut self, id: ThreadId) -> bool {
        match self.entries.iter().position(|&(queued, _)| queued == id) {
            Some(index) => {
                let (_, tickets) = self.entries.remove(index);
                self.total_tickets -= u64::from(tickets);
                true
            }
            None => false,
        }
    }

    fn pick_next(&mut self) -> Option<ThreadId> {
        if self.total_tickets == 0 {
            return None;
        }
        let draw = self.rng.below(self.total_tickets);
        let index = self.winner(draw)?;
        let (id, tickets) = self.entries.remove(index);
        self.total_tickets -= u64::from(tickets);
        Some(id)
    }

    fn contains(&self, id: ThreadId) -> bool {
        self.entries.iter().any(|&(queued, _)| queued == id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: usize) -> ThreadId {
        ThreadId::from_raw(n).unwrap()
    }

    #[test]
    fn test_total_tickets_tracks_membership() {
        let mut lottery = LotteryQueue::new(1);
        lottery.add(tid(1), 3);
        lottery.add(tid(2), 0);
        assert_eq!(lottery.total_tickets(), 4);
        assert_eq!(lottery.tickets(tid(2)), Some(1));

        lottery.add(tid(1), 5);
        assert_eq!(lottery.total_tickets(), 6);
        assert_eq!(lottery.len(), 2);

        assert!(lottery.remove(tid(1)));
        assert!(!lottery.remove(tid(1)));
        assert_eq!(lottery.total_tickets(), 1);
    }

    #[test]
    fn test_winner_walk() {
        let mut lottery = LotteryQueue::new(1);
        lottery.add(tid(1), 1);
        lottery.add(tid(2), 10);
        assert_eq!(lottery.winner(0), Some(0));
        assert_eq!(lottery.winner(1), Some(1));
        assert_eq!(lottery.winner(10), Some(1));
        assert_eq!(lottery.winner(11), None);
    }

    #[test]
    fn test_pick_removes_winner() {
        let mut lottery = LotteryQueue::new(42);
        lottery.add(tid(1), 2);
        lottery.add(tid(2), 2);
        let first = lottery.pick_next().unwrap();
        let second = lottery.pick_next().unwrap();
        assert_ne!(first, second);
        assert_eq!(lottery.pick_next(), None);
        assert_eq!(lottery.total_tickets(), 0);
    }

    #[test]
    fn test_selection_frequency_converges() {
        let mut lottery = LotteryQueue::new(0xC0FFEE);
        let (light, heavy) = (tid(1), tid(2));
        let mut wins = [0u32; 2];
        for _ in 0..110_000 {
            lottery.add(light, 1);
            lottery.add(heavy, 10);
            let winner = lottery.pick_next().unwrap();
            wins[usize::from(winner == heavy)] += 1;
            lottery.remove(light);
            lottery.remove(heavy);
        }
        let ratio = f64::from(wins[1]) / f64::from(wins[0]);
        assert!((9.0..11.0).contains(&ratio), "ratio {}", ratio);
    }

    #[test]
    fn test_rng_bound() {
        let mut rng = TicketRng::new(0);
        for bound in [1u64, 2, 7, 1000] {
            for _ in 0..100 {
                assert!(rng.below(bound) < bound);
            }
        }
    }
}
