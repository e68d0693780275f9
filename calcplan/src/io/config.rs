//! Project configuration stored in `calcplan.toml` at the project root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::naming::NamingStrategy;

/// Config file name, relative to the project root.
pub const CONFIG_FILE: &str = "calcplan.toml";

/// Project configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlanConfig {
    /// Metadata documents, merged in this order. Relative to the project root.
    pub metadata: Vec<PathBuf>,

    /// Artifact directory. Relative to the project root.
    pub post_dir: PathBuf,

    pub naming: NamingStrategy,

    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Calculation command; the calculation name is appended as the last argument.
    pub command: Vec<String>,

    /// Per-job wall-clock budget in seconds.
    pub timeout_secs: u64,

    /// Keep at most this many bytes of executor stdout/stderr.
    pub output_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "calcs/compute.py".to_string()],
            timeout_secs: 60 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            metadata: vec![PathBuf::from("calcs/meta.toml")],
            post_dir: PathBuf::from("post"),
            naming: NamingStrategy::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl PlanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.metadata.is_empty() {
            return Err(anyhow!("metadata must list at least one document"));
        }
        if self.post_dir.as_os_str().is_empty() {
            return Err(anyhow!("post_dir must not be empty"));
        }
        if self.executor.timeout_secs == 0 {
            return Err(anyhow!("executor.timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        if self.executor.command.is_empty() || self.executor.command[0].trim().is_empty() {
            return Err(anyhow!("executor.command must be a non-empty array"));
        }
        Ok(())
    }

    /// Metadata paths resolved against `root`.
    pub fn metadata_paths(&self, root: &Path) -> Vec<PathBuf> {
        self.metadata.iter().map(|path| root.join(path)).collect()
    }

    pub fn post_path(&self, root: &Path) -> PathBuf {
        root.join(&self.post_dir)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PlanConfig::default()`.
pub fn load_config(path: &Path) -> Result<PlanConfig> {
    if !path.exists() {
        let cfg = PlanConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PlanConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PlanConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
