//! Test helper utilities and common functionality.

use crate::{Config, Runtime};
use std::cell::RefCell;
use std::rc::Rc;

/// Route `log` output through the test harness. `RUST_LOG=uthreads=trace`
/// shows every dispatch.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Runtime without an interval timer, so every switch in a test comes from
/// an explicit call and the interleaving is deterministic.
pub(crate) fn runtime() -> Runtime {
    runtime_with(Config::default())
}

/// Like [`runtime`], starting from `config`.
pub(crate) fn runtime_with(config: Config) -> Runtime {
    init_logging();
    Runtime::new(config.with_quantum(None)).expect("failed to start runtime")
}

/// Shared, append-only record of events, cloned into test threads.
#[derive(Debug)]
pub(crate) struct Trace<T>(Rc<RefCell<Vec<T>>>);

impl<T> Clone for Trace<T> {
    fn clone(&self) -> Self {
        Trace(Rc::clone(&self.0))
    }
}

impl<T: Clone> Trace<T> {
    pub(crate) fn new() -> Self {
        Trace(Rc::new(RefCell::new(Vec::new())))
    }

    pub(crate) fn push(&self, event: T) {
        self.0.borrow_mut().push(event);
    }

    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.0.borrow().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

/// Sets its flag when dropped.
pub(crate) struct DropFlag(pub(crate) Rc<std::cell::Cell<bool>>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.set(true);
    }
}
