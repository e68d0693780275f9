//! Deterministic, pure planning logic.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod catalog;
pub mod index;
pub mod loops;
pub mod matcher;
pub mod naming;
pub mod normalize;
pub mod order;
pub mod records;
pub mod slices;
pub mod types;
pub mod value;
