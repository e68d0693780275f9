//! The artifact directory on disk.
//!
//! Scanning classifies every regular file and reads every result's `.spec`
//! document in parallel, then folds the results back in filename order so
//! the index is identical from run to run. Writes are append-only: a result
//! pair is created with create-new semantics and never overwritten.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::index::{ArtifactIndex, pair_listing};
use crate::core::naming::{
    ArtifactNaming, NameFields, PAYLOAD_EXT, SPEC_EXT, result_prefix, result_stem,
};
use crate::core::records::{SpecFile, StoredSpec, read_spec_file};
use crate::core::types::{Job, RecordId};

/// Artifact directory plus its compiled naming patterns.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    naming: ArtifactNaming,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            dir: dir.into(),
            naming: ArtifactNaming::new()?,
        })
    }

    pub fn payload_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{PAYLOAD_EXT}"))
    }

    pub fn spec_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{SPEC_EXT}"))
    }

    /// Build the index from the directory contents.
    ///
    /// A missing directory is an empty index.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn scan(&self) -> Result<ArtifactIndex> {
        if !self.dir.exists() {
            debug!("artifact directory missing, treating as empty");
            return Ok(ArtifactIndex::new());
        }

        let mut filenames = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("read artifact dir {}", self.dir.display()))?
        {
            let entry = entry.with_context(|| format!("list {}", self.dir.display()))?;
            let file_type = entry
                .file_type()
                .with_context(|| format!("stat {}", entry.path().display()))?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => filenames.push(name),
                Err(raw) => warn!(name = ?raw, "skipping non-UTF-8 artifact name"),
            }
        }
        filenames.sort();

        let classified: Vec<(String, Option<NameFields>)> = filenames
            .into_par_iter()
            .map(|name| {
                let fields = self.naming.classify(&name);
                (name, fields)
            })
            .collect();
        let listing = pair_listing(classified)?;

        let specs = listing
            .results
            .par_iter()
            .map(|fields| self.read_spec(&fields.stem))
            .collect::<Result<Vec<StoredSpec>>>()?;

        for name in &listing.limbo {
            warn!(name = %name, "unrecognized artifact name (limbo)");
        }
        let index = ArtifactIndex::assemble(listing, specs)?;
        info!(
            results = index.results().count(),
            slices = index.slices().count(),
            limbo = index.limbo().count(),
            "artifact directory scanned"
        );
        Ok(index)
    }

    fn read_spec(&self, stem: &str) -> Result<StoredSpec> {
        let path = self.spec_path(stem);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let value: Value =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        Ok(read_spec_file(value, &path.display().to_string())?)
    }

    /// Write the result of `job` as a new version and register it.
    #[instrument(skip_all, fields(calc = %job.calculation.name, member = %job.slice.member))]
    pub fn write_result(
        &self,
        index: &mut ArtifactIndex,
        job: &Job<'_>,
        payload: &[u8],
        attributes: Map<String, Value>,
    ) -> Result<RecordId> {
        let stem = self.next_stem(index, job)?;
        let fields = self
            .naming
            .classify(&format!("{stem}.{PAYLOAD_EXT}"))
            .ok_or_else(|| anyhow!("rendered artifact name '{stem}' is not recognized"))?;

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create artifact dir {}", self.dir.display()))?;
        let spec_file = SpecFile::new(job.target(), attributes);
        let mut spec_json =
            serde_json::to_string_pretty(&spec_file).context("serialize spec file")?;
        spec_json.push('\n');

        // Payload first: a crash in between leaves a loud MissingTwin, never
        // a spec pointing at nothing.
        write_new(&self.payload_path(&stem), payload)?;
        write_new(&self.spec_path(&stem), spec_json.as_bytes())?;

        let id = index.register(
            fields,
            StoredSpec {
                spec: job.target(),
                attributes: spec_file.attributes,
            },
        )?;
        debug!(stem = %stem, "result written");
        Ok(id)
    }

    /// Stem the next result of `job` would get.
    pub fn next_stem(&self, index: &ArtifactIndex, job: &Job<'_>) -> Result<String> {
        let prefix = result_prefix(&job.slice, &job.calculation.name)?;
        Ok(result_stem(&prefix, index.next_version(&prefix)))
    }
}

fn write_new(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create {} (artifacts are never overwritten)", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlanError;
    use serde_json::json;

    fn legacy_spec(cutoff: f64) -> String {
        json!({
            "calc_name": "density", "specs": {"cutoff": cutoff},
            "sn": "v1", "group": "all", "pbc": "mol", "start": 0, "end": 100, "skip": 10
        })
        .to_string()
    }

    #[test]
    fn scan_indexes_results_slices_and_limbo() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        fs::write(dir.join("v1.0-100-10.all.pbcmol.density.n0.dat"), b"x").expect("dat");
        fs::write(dir.join("v1.0-100-10.all.pbcmol.density.n0.spec"), legacy_spec(1.2))
            .expect("spec");
        fs::write(dir.join("v1.0-100-10.all.pbcmol.xtc"), b"").expect("xtc");
        fs::write(dir.join("notes.txt"), b"").expect("notes");
        fs::create_dir(dir.join("v1.density.n0.dat")).expect("dir entry");

        let store = ArtifactStore::new(dir).expect("store");
        let index = store.scan().expect("scan");
        assert_eq!(index.results().count(), 1);
        assert_eq!(index.slices().count(), 1);
        assert_eq!(index.limbo().collect::<Vec<_>>(), vec!["notes.txt"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(temp.path().join("post")).expect("store");
        assert_eq!(store.scan().expect("scan").results().count(), 0);
    }

    #[test]
    fn orphan_payload_is_missing_twin() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("v1.density.n0.dat"), b"x").expect("dat");
        let err = ArtifactStore::new(temp.path())
            .expect("store")
            .scan()
            .expect_err("twin");
        assert_eq!(
            err.downcast_ref::<PlanError>().map(PlanError::kind),
            Some("MissingTwin")
        );
    }

    #[test]
    fn corrupt_spec_names_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("v1.density.n0.dat"), b"x").expect("dat");
        fs::write(temp.path().join("v1.density.n0.spec"), "{not json").expect("spec");
        let err = ArtifactStore::new(temp.path())
            .expect("store")
            .scan()
            .expect_err("corrupt");
        assert!(format!("{err:#}").contains("v1.density.n0.spec"));
    }

    #[test]
    fn write_new_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("v1.density.n0.dat");
        write_new(&path, b"first").expect("first");
        assert!(write_new(&path, b"second").is_err());
        assert_eq!(fs::read(&path).expect("read"), b"first");
    }
}
