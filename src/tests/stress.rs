//! Stress tests for the scheduler under many threads and heavy switching.

#[cfg(test)]
mod stress_tests {
    use crate::tests::helpers::runtime;
    use crate::thread::{self, Builder};
    use crate::{Mutex, Policy, StackSizeClass, ThreadId};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_massive_thread_creation() {
        const THREADS: usize = 200;
        let runtime = runtime();
        let counter = Rc::new(Cell::new(0usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let counter = counter.clone();
                Builder::new()
                    .stack_size_class(StackSizeClass::Small)
                    .spawn(move || {
                        for _ in 0..3 {
                            counter.set(counter.get() + 1);
                            thread::yield_now();
                        }
                        i
                    })
                    .expect("Failed to spawn thread")
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join(), Ok(i));
        }
        assert_eq!(counter.get(), THREADS * 3);

        let stats = runtime.kernel().stats();
        assert_eq!(stats.threads, 1);
        assert_eq!(stats.spawned, THREADS as u64);
        assert_eq!(runtime.kernel().stack_stats().overflows, 0);
    }

    #[test]
    fn test_high_contention_mutex() {
        const THREADS: usize = 32;
        const ITERATIONS: usize = 50;
        let _runtime = runtime();
        let mutex = Rc::new(Mutex::new());
        let counter = Rc::new(Cell::new(0usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let mutex = mutex.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for j in 0..ITERATIONS {
                        let _guard = mutex.guard().unwrap();
                        // Recursive acquisition on every other pass.
                        if j % 2 == 0 {
                            mutex.lock().unwrap();
                        }
                        let seen = counter.get();
                        if (i + j) % 3 == 0 {
                            thread::yield_now();
                        }
                        counter.set(seen + 1);
                        if j % 2 == 0 {
                            mutex.unlock().unwrap();
                        }
                    }
                })
                .unwrap()
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), THREADS * ITERATIONS);
        assert!(!mutex.is_locked());
        assert_eq!(mutex.waiters(), 0);
    }

    #[test]
    fn test_join_chain() {
        const LENGTH: usize = 64;
        let _runtime = runtime();
        let slots: Rc<Vec<Cell<Option<ThreadId>>>> =
            Rc::new((0..LENGTH).map(|_| Cell::new(None)).collect());

        // Thread k joins thread k + 1; the last one returns at once.
        for k in 0..LENGTH {
            let chain = slots.clone();
            let handle = thread::spawn(move || -> usize {
                match chain.get(k + 1).and_then(Cell::get) {
                    Some(next) => {
                        let value = thread::join(next).expect("join in chain failed");
                        value.downcast_ref::<usize>().copied().unwrap_or(0) + 1
                    }
                    None => 0,
                }
            })
            .unwrap();
            slots[k].set(Some(handle.id()));
        }

        let head = slots[0].get().unwrap();
        let value = thread::join(head).unwrap();
        assert_eq!(value.downcast_ref::<usize>(), Some(&(LENGTH - 1)));
    }

    #[test]
    fn test_stack_reuse_under_churn() {
        const ROUNDS: usize = 100;
        let runtime = runtime();
        for i in 0..ROUNDS {
            let handle = Builder::new()
                .stack_size_class(StackSizeClass::Small)
                .spawn(move || i * 2)
                .unwrap();
            assert_eq!(handle.join(), Ok(i * 2));
        }

        let stats = runtime.kernel().stack_stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, ROUNDS - 1);
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn test_scheduler_thrashing() {
        const THREADS: usize = 30;
        let runtime = runtime();
        let finished = Rc::new(Cell::new(0usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let finished = finished.clone();
                let policy = match i % 3 {
                    0 => Policy::RoundRobin,
                    1 => Policy::lottery(i as i64),
                    _ => Policy::real_time_default(),
                };
                thread::spawn_with_policy(policy, move || {
                    for round in 0..10 {
                        thread::yield_now();
                        // Drift between classes so every ready-set sees churn.
                        if round == 4 {
                            let next = match (i + round) % 3 {
                                0 => Policy::RoundRobin,
                                1 => Policy::lottery(3),
                                _ => Policy::real_time_default(),
                            };
                            thread::change_policy(next).unwrap();
                        }
                    }
                    finished.set(finished.get() + 1);
                })
                .unwrap()
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(finished.get(), THREADS);

        let stats = runtime.kernel().stats();
        assert_eq!(stats.threads, 1);
        assert!(stats.yields >= (THREADS * 10) as u64);
    }

    #[test]
    fn test_detached_swarm_is_reaped() {
        const THREADS: usize = 100;
        let runtime = runtime();
        let ran = Rc::new(Cell::new(0usize));
        for _ in 0..THREADS {
            let ran = ran.clone();
            Builder::new()
                .stack_size_class(StackSizeClass::Small)
                .spawn(move || {
                    thread::yield_now();
                    ran.set(ran.get() + 1);
                })
                .unwrap()
                .detach()
                .unwrap();
        }

        while ran.get() < THREADS {
            thread::yield_now();
        }
        // One more round lets main reap the last graveyard entries.
        thread::yield_now();
        let stats = runtime.kernel().stats();
        assert_eq!(stats.threads, 1);
        assert_eq!(runtime.kernel().stack_stats().in_use, 0);
    }
}
