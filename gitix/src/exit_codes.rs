//! Stable exit codes for the `gitix` binary.

/// Every check passed (or there was nothing to check).
pub const OK: i32 = 0;
/// The run could not start: bad settings, document, revision, or repository.
pub const INVALID: i32 = 1;
/// A check failed.
pub const FAILED: i32 = 2;
