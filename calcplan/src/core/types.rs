//! Shared deterministic types for planning.
//!
//! These types define stable contracts between core components. They do not
//! depend on external state or I/O and stay identical across runs for the same
//! inputs.

use serde::{Deserialize, Serialize};

use crate::core::catalog::Calculation;
use crate::core::records::ResultSpec;

/// How a slice is addressed in artifact names.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SliceKind {
    /// Bounded `start-end-skip` view, optionally group-qualified.
    #[default]
    Standard,
    /// Opaque, name-only view of the member.
    Raw,
}

/// A named, bounded view of one collection member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slice {
    /// Collection member id (`sn`).
    pub member: String,
    /// Member name as it appears in artifact names.
    pub short_name: String,
    pub slice_name: String,
    pub group: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub skip: Option<i64>,
    pub pbc: Option<String>,
    pub kind: SliceKind,
}

/// Index of a record in the artifact index arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordId(pub usize);

/// Pointer from a job to the result record that satisfies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactHandle {
    pub record: RecordId,
    /// Artifact name without the `.dat`/`.spec` extension.
    pub stem: String,
}

/// Scheduling state of a job. `Matched` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Unmatched,
    Matched,
}

/// One calculation variant paired with one slice.
#[derive(Debug, Clone)]
pub struct Job<'a> {
    pub calculation: &'a Calculation,
    pub slice: Slice,
    pub result: Option<ArtifactHandle>,
}

impl Job<'_> {
    pub fn state(&self) -> JobState {
        match self.result {
            Some(_) => JobState::Matched,
            None => JobState::Unmatched,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }

    /// Specification a result record must match to satisfy this job.
    pub fn target(&self) -> ResultSpec {
        ResultSpec::new(self.calculation, &self.slice)
    }
}
