//! Named planning errors.
//!
//! Every variant is a configuration or data error: nothing here is retried.
//! The planner aborts the whole pass and reports the calculation, slice, or
//! artifact name implicated so the operator can fix the metadata.
//!
//! Orchestration code wraps these in `anyhow::Error` with context; callers
//! recover the kind with `err.downcast_ref::<PlanError>()`.

use thiserror::Error;

/// Core result alias.
pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A `loop` marker whose value cannot be expanded.
    #[error("invalid loop at {path}: {reason}")]
    LoopTargetInvalid { path: String, reason: String },

    /// A `+path` reference that does not resolve in the variable table.
    #[error("unresolved reference '+{reference}' at {location}")]
    UnresolvedReference { reference: String, location: String },

    /// A calculation name that is not declared in the metadata.
    #[error("unknown calculation '{name}' (referenced by {referenced_by})")]
    UnknownCalculation { name: String, referenced_by: String },

    /// An upstream reference whose constraints match no variant.
    #[error("calculation '{calc}' requests upstream '{upstream}' with {constraints} but no variant matches")]
    UpstreamNotFound {
        calc: String,
        upstream: String,
        constraints: String,
    },

    /// An upstream reference whose constraints match several variants.
    #[error(
        "calculation '{calc}' requests upstream '{upstream}' with {constraints} which matches {matches} variants ({aliases}); add constraints to pick one"
    )]
    UpstreamAmbiguous {
        calc: String,
        upstream: String,
        constraints: String,
        matches: usize,
        aliases: String,
    },

    /// `find_calculation` could not pick a single variant.
    #[error("no unique variant of calculation '{name}' matches {specs} ({matches} matches)")]
    CalculationNotFound {
        name: String,
        specs: String,
        matches: usize,
    },

    /// The upstream name graph contains a cycle.
    #[error("dependency cycle between calculations: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    /// Only one half of a `.dat`/`.spec` result pair exists.
    #[error("artifact '{stem}' has a .{present} file but its .{missing} twin is missing")]
    MissingTwin {
        stem: String,
        present: String,
        missing: String,
    },

    /// Several result records match one target specification.
    #[error(
        "{target} matches multiple artifacts ({}); the artifact store is corrupted or duplicated, delete them and recompute",
        .stems.join(", ")
    )]
    AmbiguousArtifact { target: String, stems: Vec<String> },

    /// The executor dropped declared parameters from the result attributes.
    #[error(
        "attributes passthrough failed for '{calc}' on '{member}': result attributes are missing {}",
        .missing.join(", ")
    )]
    AttributesPassthroughMissing {
        calc: String,
        member: String,
        missing: Vec<String>,
    },

    /// No slice with this name (and group) is defined for the member.
    #[error("no slice '{slice_name}' (group {}) for member '{member}'", .group.as_deref().unwrap_or("<none>"))]
    SliceNotFound {
        member: String,
        slice_name: String,
        group: Option<String>,
    },

    /// A collection name that is not declared in the metadata.
    #[error("unknown collection '{collection}' (referenced by {referenced_by})")]
    UnknownCollection {
        collection: String,
        referenced_by: String,
    },

    /// The configured short-naming strategy does not apply to a member.
    #[error("cannot derive a short name for member '{member}': {reason}")]
    ShortNameUnresolved { member: String, reason: String },

    /// An upstream result is not visible when a dependent job is about to run.
    #[error("calculation '{calc}' on '{member}' needs upstream '{upstream}' but no result for it exists yet")]
    UpstreamResultMissing {
        calc: String,
        member: String,
        upstream: String,
    },

    /// Structurally malformed metadata or spec file.
    #[error("invalid metadata at {location}: {reason}")]
    InvalidMetadata { location: String, reason: String },
}

impl PlanError {
    /// Shorthand for [`PlanError::InvalidMetadata`].
    pub fn invalid(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Stable kind name used in CLI output and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LoopTargetInvalid { .. } => "LoopTargetInvalid",
            Self::UnresolvedReference { .. } => "UnresolvedReference",
            Self::UnknownCalculation { .. } => "UnknownCalculation",
            Self::UpstreamNotFound { .. } => "UpstreamNotFound",
            Self::UpstreamAmbiguous { .. } => "UpstreamAmbiguous",
            Self::CalculationNotFound { .. } => "CalculationNotFound",
            Self::DependencyCycle { .. } => "DependencyCycle",
            Self::MissingTwin { .. } => "MissingTwin",
            Self::AmbiguousArtifact { .. } => "AmbiguousArtifact",
            Self::AttributesPassthroughMissing { .. } => "AttributesPassthroughMissing",
            Self::SliceNotFound { .. } => "SliceNotFound",
            Self::UnknownCollection { .. } => "UnknownCollection",
            Self::ShortNameUnresolved { .. } => "ShortNameUnresolved",
            Self::UpstreamResultMissing { .. } => "UpstreamResultMissing",
            Self::InvalidMetadata { .. } => "InvalidMetadata",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = PlanError::DependencyCycle {
            cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle between calculations: a -> b -> a"
        );
        assert_eq!(err.kind(), "DependencyCycle");
    }

    #[test]
    fn ambiguous_artifact_advises_recompute() {
        let err = PlanError::AmbiguousArtifact {
            target: "density on v1".to_string(),
            stems: vec!["v1.density.n0".to_string(), "v1.density.n1".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("v1.density.n0, v1.density.n1"));
        assert!(msg.contains("delete them and recompute"));
    }
}
