//! Calculator abstraction for running one job.
//!
//! The [`Calculator`] trait decouples compute orchestration from the actual
//! calculation backend (an external command). Tests use scripted calculators
//! that return predetermined payloads without spawning processes.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::types::Slice;
use crate::io::config::ExecutorConfig;
use crate::io::process::run_command_with_timeout;

/// One upstream result handed to a calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamPayload {
    /// Edge key as declared by the downstream calculation.
    pub key: String,
    /// Label of the upstream variant (`name` or `name[alias]`).
    pub calc: String,
    /// Path of the upstream `.dat` file.
    pub payload_path: PathBuf,
    pub attributes: Map<String, Value>,
}

/// Everything a calculation needs for one job.
///
/// Serialized as the JSON request on the command's stdin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalcRequest {
    pub calc: String,
    pub member: String,
    pub slice: Slice,
    /// Declared selection of the slice's group, if the slice has one.
    pub selection: Option<Value>,
    pub params: Map<String, Value>,
    pub upstream: Vec<UpstreamPayload>,
    /// Where the calculation must write its payload bytes.
    pub payload_path: PathBuf,
}

/// Result of one calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct CalcOutput {
    pub payload: Vec<u8>,
    /// Must repeat every declared parameter key.
    pub attributes: Map<String, Value>,
}

/// Abstraction over calculation backends.
pub trait Calculator {
    fn compute(&self, request: &CalcRequest) -> Result<CalcOutput>;
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    attributes: Map<String, Value>,
}

/// Calculator that spawns the configured command once per job.
///
/// The calculation name is appended as the last argument, the request is
/// written to stdin, and stdout must be `{"attributes": {...}}`.
#[derive(Debug, Clone)]
pub struct CommandCalculator {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandCalculator {
    pub fn from_config(config: &ExecutorConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl Calculator for CommandCalculator {
    #[instrument(skip_all, fields(calc = %request.calc, member = %request.member, timeout_secs = self.timeout.as_secs()))]
    fn compute(&self, request: &CalcRequest) -> Result<CalcOutput> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("executor command is empty"))?;
        if let Some(parent) = request.payload_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create payload dir {}", parent.display()))?;
        }

        let mut cmd = Command::new(program);
        cmd.args(args).arg(&request.calc).current_dir(&self.workdir);
        let input = serde_json::to_vec(request).context("serialize calculation request")?;

        info!(program = %program, "starting calculation command");
        let output = run_command_with_timeout(
            cmd,
            Some(&input),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run calculation command for '{}'", request.calc))?;

        if output.timed_out {
            warn!("calculation command timed out");
            return Err(anyhow!(
                "calculation '{}' on '{}' timed out after {:?}",
                request.calc,
                request.member,
                self.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "calculation command failed");
            return Err(anyhow!(
                "calculation '{}' on '{}' failed with status {:?}: {}",
                request.calc,
                request.member,
                output.status.code(),
                output.stderr_excerpt()
            ));
        }

        let reply: CommandReply = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parse reply of calculation '{}'", request.calc))?;
        let payload = fs::read(&request.payload_path).with_context(|| {
            format!("read payload {}", request.payload_path.display())
        })?;
        if let Err(err) = fs::remove_file(&request.payload_path) {
            debug!(err = %err, "could not remove scratch payload");
        }

        debug!(bytes = payload.len(), "calculation command completed");
        Ok(CalcOutput {
            payload,
            attributes: reply.attributes,
        })
    }
}
