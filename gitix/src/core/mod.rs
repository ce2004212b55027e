//! Deterministic, pure logic shared by the gate runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (git output, path lists, parsed documents) and return deterministic
//! outputs suitable for tests.

pub mod changes;
pub mod check_tree;
