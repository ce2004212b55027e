//! Pre-commit and CI gate: run checks against the parts of a repository that changed.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (change-set derivations, the check tree).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (git, toolchains, filesystem, processes).
//!   Isolated behind traits so tests can swap them out.
//!
//! Orchestration modules ([`detect`], [`workspace`], [`engine`]) combine the two:
//! compute what changed, materialize a workspace to check it in, and run the
//! check tree against it.

pub mod core;
pub mod detect;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workspace;
