//! Side-effecting adapters: git, toolchains, the filesystem, and child processes.

pub mod config;
pub mod document;
pub mod executor;
pub mod git;
pub mod process;
pub mod shadow;
pub mod toolchain;
