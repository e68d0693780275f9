//! Validation for `calcplan validate`.
//!
//! Loads the whole project (config, metadata, catalog, dependency order) and
//! scans the artifact directory, so every error a later `plan` or `compute`
//! would hit on metadata or stored records surfaces here first.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::plan::Project;

/// Counts describing a valid project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidateReport {
    pub calculations: usize,
    pub variants: usize,
    pub slices: usize,
    pub collections: usize,
    pub results: usize,
    /// Artifact filenames no naming pattern recognized.
    pub limbo: Vec<String>,
}

pub fn validate_project(root: &Path) -> Result<ValidateReport> {
    let project = Project::load(root)?;
    let index = project.scan()?;
    Ok(ValidateReport {
        calculations: project.order.len(),
        variants: project.catalog.len(),
        slices: project.slices.len(),
        collections: project.metadata.collections.len(),
        results: index.results().count(),
        limbo: index.limbo().map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlanError;
    use crate::test_support::{DENSITY_METADATA, write_legacy_result, write_project};
    use std::fs;

    #[test]
    fn reports_counts_for_a_valid_project() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_project(temp.path(), DENSITY_METADATA);
        write_legacy_result(temp.path(), "v1.0-100-10.all.pbcmol.density.n0", "v1", 1.2);
        fs::write(temp.path().join("post").join("README"), "notes").expect("limbo file");

        let report = validate_project(temp.path()).expect("validate");
        assert_eq!(report.calculations, 1);
        assert_eq!(report.variants, 1);
        assert_eq!(report.slices, 2);
        assert_eq!(report.collections, 1);
        assert_eq!(report.results, 1);
        assert_eq!(report.limbo, vec!["README"]);
    }

    #[test]
    fn missing_metadata_names_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = validate_project(temp.path()).expect_err("no metadata");
        assert!(format!("{err:#}").contains("meta.toml"));
    }

    #[test]
    fn unknown_upstream_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_project(
            temp.path(),
            "[calculations.a]\nspecs = { upstream = \"ghost\" }\n",
        );
        let err = validate_project(temp.path()).expect_err("unknown upstream");
        assert_eq!(
            err.chain()
                .find_map(|cause| cause.downcast_ref::<PlanError>())
                .map(PlanError::kind),
            Some("UnknownCalculation")
        );
    }
}
