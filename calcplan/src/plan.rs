//! Loading a project and planning its jobs (`calcplan plan` / `order`).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::catalog::CalculationCatalog;
use crate::core::index::ArtifactIndex;
use crate::core::matcher::JobMatcher;
use crate::core::naming::{ShortNamer, result_prefix, result_stem, slice_stem};
use crate::core::normalize::VariableTable;
use crate::core::order::{dependencies, order};
use crate::core::slices::SliceTable;
use crate::core::types::{Job, JobState, SliceKind};
use crate::error::PlanError;
use crate::io::artifact_store::ArtifactStore;
use crate::io::config::{CONFIG_FILE, PlanConfig, load_config};
use crate::io::init::ProjectPaths;
use crate::io::metadata::{Metadata, load_metadata};

/// Everything derived from the config and metadata of one project.
#[derive(Debug)]
pub struct Project {
    pub paths: ProjectPaths,
    pub config: PlanConfig,
    pub metadata: Metadata,
    pub variables: VariableTable,
    pub slices: SliceTable,
    pub catalog: CalculationCatalog,
    /// Calculation names in dependency order.
    pub order: Vec<String>,
    dependencies: BTreeMap<String, Vec<String>>,
    pub store: ArtifactStore,
}

impl Project {
    /// Load config and metadata and build every in-memory structure.
    ///
    /// The artifact directory is not read; see [`Project::scan`].
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn load(root: &Path) -> Result<Self> {
        let config = load_config(&root.join(CONFIG_FILE))?;
        let paths = ProjectPaths::new(root, &config);
        let metadata = load_metadata(&paths.metadata_paths)?;

        let variables = VariableTable::build(&metadata.variables).context("build variables")?;
        let namer = ShortNamer::from_strategy(&config.naming).context("build short namer")?;
        let slices =
            SliceTable::build(&metadata.slices, &variables, &namer).context("build slices")?;
        let dependencies = dependencies(&metadata.calculations, &variables).context("read dependencies")?;
        let order = order(&metadata.calculations, &variables).context("order calculations")?;
        let catalog = CalculationCatalog::build(&metadata.calculations, &variables)
            .context("build calculation catalog")?;
        let store = ArtifactStore::new(&paths.post_dir)?;

        debug!(
            calculations = order.len(),
            variants = catalog.len(),
            slices = slices.len(),
            "project loaded"
        );
        Ok(Self {
            paths,
            config,
            metadata,
            variables,
            slices,
            catalog,
            order,
            dependencies,
            store,
        })
    }

    pub fn scan(&self) -> Result<ArtifactIndex> {
        self.store
            .scan()
            .with_context(|| format!("scan {}", self.paths.post_dir.display()))
    }

    pub fn matcher(&self) -> JobMatcher<'_> {
        JobMatcher::new(&self.catalog, &self.slices, &self.metadata.collections)
    }

    /// Names to schedule, in dependency order.
    ///
    /// An empty request selects everything. Otherwise the requested names are
    /// widened to everything they depend on, so upstream results are produced
    /// (or found) first.
    pub fn selected_names(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.order.clone());
        }
        let mut wanted = BTreeSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for name in requested {
            if !self.dependencies.contains_key(name) {
                return Err(PlanError::UnknownCalculation {
                    name: name.clone(),
                    referenced_by: "--calc".to_string(),
                }
                .into());
            }
            stack.push(name.as_str());
        }
        while let Some(name) = stack.pop() {
            if wanted.insert(name) {
                if let Some(deps) = self.dependencies.get(name) {
                    stack.extend(deps.iter().map(String::as_str));
                }
            }
        }
        Ok(self
            .order
            .iter()
            .filter(|name| wanted.contains(name.as_str()))
            .cloned()
            .collect())
    }

    /// Prepare jobs for `selection` against `index`.
    pub fn prepare<'a>(
        &'a self,
        index: &ArtifactIndex,
        selection: &Selection,
    ) -> Result<Vec<Job<'a>>> {
        let names = self.selected_names(&selection.calcs)?;
        let jobs = self
            .matcher()
            .prepare(index, &names, selection.collection_filter())?;
        Ok(jobs)
    }
}

/// Which jobs a command should consider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Calculation names; empty means all.
    pub calcs: Vec<String>,
    /// Collection names replacing each calculation's own; empty means none.
    pub collections: Vec<String>,
}

impl Selection {
    pub fn collection_filter(&self) -> Option<&[String]> {
        if self.collections.is_empty() {
            None
        } else {
            Some(&self.collections)
        }
    }
}

/// One line of `calcplan plan` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub calc: String,
    pub alias: String,
    pub member: String,
    pub slice_name: String,
    pub group: Option<String>,
    pub state: JobState,
    /// Existing result for matched jobs, next free name for pending ones.
    pub stem: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub jobs: Vec<JobSummary>,
}

impl PlanReport {
    pub fn pending(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.state == JobState::Unmatched)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }
}

/// Load, scan and prepare: the read-only planning pass.
pub fn plan_from_root(root: &Path, selection: &Selection) -> Result<PlanReport> {
    let project = Project::load(root)?;
    let index = project.scan()?;
    let jobs = project.prepare(&index, selection)?;
    summarize(&index, &jobs)
}

/// Summaries for `jobs`, warning about pending jobs whose slice files are absent.
pub fn summarize(index: &ArtifactIndex, jobs: &[Job<'_>]) -> Result<PlanReport> {
    let mut summaries = Vec::with_capacity(jobs.len());
    // Pending jobs sharing a prefix get consecutive free versions, as compute would assign.
    let mut reserved: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
    for job in jobs {
        let stem = match &job.result {
            Some(handle) => handle.stem.clone(),
            None => {
                warn_if_slice_missing(index, job)?;
                let prefix = result_prefix(&job.slice, &job.calculation.name)?;
                let taken = reserved
                    .entry(prefix.clone())
                    .or_insert_with(|| index.used_versions(&prefix));
                let version = (0..).find(|v| !taken.contains(v)).unwrap_or(u32::MAX);
                taken.insert(version);
                result_stem(&prefix, version)
            }
        };
        summaries.push(JobSummary {
            calc: job.calculation.name.clone(),
            alias: job.calculation.alias().to_string(),
            member: job.slice.member.clone(),
            slice_name: job.slice.slice_name.clone(),
            group: job.slice.group.clone(),
            state: job.state(),
            stem,
        });
    }
    Ok(PlanReport { jobs: summaries })
}

fn warn_if_slice_missing(index: &ArtifactIndex, job: &Job<'_>) -> Result<()> {
    if job.slice.kind != SliceKind::Standard {
        return Ok(());
    }
    if let Some(stem) = slice_stem(&job.slice)? {
        if index.find_slice(&job.slice).is_none() {
            warn!(
                slice = %stem,
                calc = %job.calculation.name,
                "intermediate slice files not found"
            );
        }
    }
    Ok(())
}
