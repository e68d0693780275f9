//! Stable exit codes for calcplan CLI commands.

/// Command succeeded; for `plan`, at least one job is pending.
pub const OK: i32 = 0;
/// Command failed due to invalid config, metadata, artifacts or a failed calculation.
pub const INVALID: i32 = 1;
/// `calcplan plan` found every selected job already matched.
pub const COMPLETE: i32 = 2;
