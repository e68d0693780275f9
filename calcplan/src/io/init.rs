//! Project scaffolding for `calcplan init`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{CONFIG_FILE, PlanConfig, write_config};

/// Scratch directory for payloads being written by a calculation.
pub const SCRATCH_DIR: &str = ".calcplan/work";

/// Canonical paths of a project rooted at `root`, per its config.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub metadata_paths: Vec<PathBuf>,
    pub post_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>, config: &PlanConfig) -> Self {
        let root = root.into();
        Self {
            config_path: root.join(CONFIG_FILE),
            metadata_paths: config.metadata_paths(&root),
            post_dir: config.post_path(&root),
            scratch_dir: root.join(SCRATCH_DIR),
            root,
        }
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite the config and skeleton files.
    pub force: bool,
}

/// Write `calcplan.toml`, a metadata skeleton, a sample calculation script
/// and the artifact directory.
///
/// Fails if `calcplan.toml` already exists unless `options.force` is set.
/// Existing artifacts are never touched.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    let config = PlanConfig::default();
    let paths = ProjectPaths::new(root, &config);
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "calcplan init: {CONFIG_FILE} already exists (use --force to overwrite)"
        ));
    }

    write_config(&paths.config_path, &config)?;
    for metadata in &paths.metadata_paths {
        write_file(metadata, METADATA_SKELETON)?;
    }
    write_file(&root.join(SAMPLE_SCRIPT_PATH), SAMPLE_SCRIPT)?;
    create_dir(&paths.post_dir)?;
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const SAMPLE_SCRIPT_PATH: &str = "calcs/compute.py";

const METADATA_SKELETON: &str = r#"# Calculation metadata. References start with '+' and point into [variables].

[variables]
selectors = { all = "all" }

[collections]
demo = ["v1"]

[slices.v1.groups]
all = "+selectors/all"

[slices.v1.slices.current]
kind = "standard"
start = 0
end = 100
skip = 10
pbc = "mol"
groups = ["all"]

[calculations.count]
collections = "demo"
slice_name = "current"
group = "all"
specs = { window = { loop = [5, 10] } }
"#;

const SAMPLE_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Sample calculation: reads the request on stdin, writes a payload, echoes parameters."""
import json
import sys

request = json.load(sys.stdin)
with open(request["payload_path"], "w") as handle:
    json.dump({"calc": sys.argv[-1], "member": request["member"]}, handle)
json.dump({"attributes": request["params"]}, sys.stdout)
"#;
