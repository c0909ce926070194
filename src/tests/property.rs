//! Property-based tests for the ready-set invariants.

#[cfg(test)]
mod property_tests {
    use crate::sched::{ReadyQueue, ReadySets, SchedParams};
    use crate::sched::{EdfQueue, LotteryQueue, RoundRobinQueue};
    use crate::thread::ThreadId;
    use crate::time::Instant;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn tid(n: usize) -> ThreadId {
        ThreadId::from_raw(n + 1).unwrap()
    }

    fn params() -> impl Strategy<Value = SchedParams> {
        prop_oneof![
            Just(SchedParams::RoundRobin),
            (1u32..50).prop_map(|tickets| SchedParams::Lottery { tickets }),
            (0u64..1_000).prop_map(|ns| SchedParams::RealTime {
                deadline: Instant::from_nanos(ns)
            }),
        ]
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize, SchedParams),
        Requeue(usize, SchedParams),
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..16, params()).prop_map(|(id, p)| Op::Add(id, p)),
            (0usize..16, params()).prop_map(|(id, p)| Op::Requeue(id, p)),
            (0usize..16).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn property_round_robin_serves_everyone_once_per_round(n in 1usize..32, rounds in 1usize..5) {
            let mut queue = RoundRobinQueue::new();
            for i in 0..n {
                queue.add(tid(i), ());
            }
            for _ in 0..rounds {
                let mut seen = BTreeSet::new();
                for _ in 0..n {
                    let id = queue.pick_next().unwrap();
                    prop_assert!(seen.insert(id));
                    queue.requeue_after_preemption(id, ());
                }
                prop_assert_eq!(seen.len(), n);
            }
        }

        #[test]
        fn property_edf_drains_in_deadline_order(deadlines in prop::collection::vec(0u64..100, 1..40)) {
            let mut queue = EdfQueue::new();
            for (i, &ns) in deadlines.iter().enumerate() {
                queue.add(tid(i), Instant::from_nanos(ns));
            }

            let mut drained = Vec::new();
            while let Some(id) = queue.pick_next() {
                drained.push(id.get() - 1);
            }
            prop_assert_eq!(drained.len(), deadlines.len());
            for pair in drained.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                prop_assert!(deadlines[a] <= deadlines[b]);
                // Equal deadlines keep insertion order.
                if deadlines[a] == deadlines[b] {
                    prop_assert!(a < b);
                }
            }
        }

        #[test]
        fn property_lottery_ticket_accounting(
            tickets in prop::collection::vec(1u32..1_000, 1..24),
            seed in any::<u64>(),
        ) {
            let mut queue = LotteryQueue::new(seed);
            for (i, &t) in tickets.iter().enumerate() {
                queue.add(tid(i), t);
            }
            prop_assert_eq!(
                queue.total_tickets(),
                tickets.iter().map(|&t| u64::from(t)).sum::<u64>()
            );

            let mut remaining = queue.total_tickets();
            let mut drawn = BTreeSet::new();
            while let Some(id) = queue.pick_next() {
                prop_assert!(drawn.insert(id));
                remaining -= u64::from(tickets[id.get() - 1]);
                prop_assert_eq!(queue.total_tickets(), remaining);
            }
            prop_assert_eq!(drawn.len(), tickets.len());
            prop_assert_eq!(queue.total_tickets(), 0);
        }

        #[test]
        fn property_ready_sets_match_model(ops in prop::collection::vec(op(), 0..64), seed in any::<u64>()) {
            let mut sets = ReadySets::new(seed);
            let mut model: BTreeMap<ThreadId, SchedParams> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Add(i, p) => {
                        sets.add(tid(i), p);
                        model.insert(tid(i), p);
                    }
                    Op::Requeue(i, p) => {
                        sets.requeue(tid(i), p);
                        model.insert(tid(i), p);
                    }
                    Op::Remove(i) => {
                        prop_assert_eq!(sets.remove(tid(i)), model.remove(&tid(i)).is_some());
                        // Removing twice is a no-op.
                        prop_assert!(!sets.remove(tid(i)));
                    }
                }
                prop_assert_eq!(sets.len(), model.len());
            }

            // Drain: every queued thread comes out exactly once, classes in
            // priority order.
            let mut last_class = None;
            while let Some(id) = sets.pick_next() {
                let params = model.remove(&id);
                prop_assert!(params.is_some(), "thread {} picked twice or never added", id);
                let class = params.map(|p| p.class());
                if let Some(last) = last_class {
                    prop_assert!(class <= Some(last));
                }
                last_class = class;
            }
            prop_assert!(model.is_empty());
        }
    }
}
