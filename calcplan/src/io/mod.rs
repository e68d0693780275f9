//! I/O helpers for calcplan commands.

pub mod artifact_store;
pub mod config;
pub mod executor;
pub mod init;
pub mod metadata;
pub mod process;
