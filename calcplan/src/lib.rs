//! Dependency-aware calculation scheduler.
//!
//! Calculations are declared in metadata files; each one is expanded into
//! concrete variants, ordered by its upstream dependencies, and matched
//! against the records already sitting in the artifact directory. Only the
//! jobs without a matching record are handed to the external calculation
//! command. The crate is split the usual way:
//!
//! - **[`core`]**: Pure logic (loop expansion, normalization, catalog,
//!   ordering, artifact index, matching). No I/O.
//! - **[`io`]**: Config, metadata files, the artifact directory and the
//!   calculation command.
//!
//! Orchestration modules ([`plan`], [`compute`], [`validate`]) tie the two
//! together for the CLI commands.

pub mod compute;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
