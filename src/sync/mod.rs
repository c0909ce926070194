//! Synchronization primitives built on the dispatcher's block and wake.

pub mod mutex;

pub use mutex::{Mutex, MutexGuard};
