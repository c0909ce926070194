//! Crate-level test suites.

mod helpers;
mod property;
mod stress;
