//! Orchestration for `calcplan compute`.
//!
//! Jobs run one at a time in dependency order. Each pending job is checked
//! against the index again right before it runs, so a variant produced
//! earlier in the same pass is never computed twice.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::core::index::ArtifactIndex;
use crate::core::naming::PAYLOAD_EXT;
use crate::core::records::check_passthrough;
use crate::core::types::Job;
use crate::io::executor::{CalcRequest, Calculator, CommandCalculator, UpstreamPayload};
use crate::plan::{Project, Selection};

/// What one compute pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComputeReport {
    /// Stems written, in the order they were produced.
    pub computed: Vec<String>,
    /// Jobs that already had a result.
    pub matched: usize,
}

/// Run every pending job of `selection` with the configured command.
pub fn compute_from_root(root: &Path, selection: &Selection) -> Result<ComputeReport> {
    let project = Project::load(root)?;
    let calculator = CommandCalculator::from_config(&project.config.executor, root);
    run_compute(&project, &calculator, selection)
}

/// Run every pending job of `selection` with `calculator`.
///
/// Stops at the first failing job; results written before it stay on disk.
#[instrument(skip_all)]
pub fn run_compute<C: Calculator>(
    project: &Project,
    calculator: &C,
    selection: &Selection,
) -> Result<ComputeReport> {
    let mut index = project.scan()?;
    let jobs = project.prepare(&index, selection)?;
    let mut report = ComputeReport::default();

    for job in &jobs {
        if !job.is_pending() {
            report.matched += 1;
            continue;
        }
        if let Some(record) = index.find(&job.target())? {
            debug!(stem = %record.stem, calc = %job.calculation.label(), "produced earlier in this pass");
            report.matched += 1;
            continue;
        }
        let stem = run_job(project, calculator, &mut index, job)?;
        report.computed.push(stem);
    }

    info!(
        computed = report.computed.len(),
        matched = report.matched,
        "compute pass finished"
    );
    Ok(report)
}

fn run_job<C: Calculator>(
    project: &Project,
    calculator: &C,
    index: &mut ArtifactIndex,
    job: &Job<'_>,
) -> Result<String> {
    let label = job.calculation.label();
    let member = job.slice.member.clone();
    let request = build_request(project, index, job)?;

    info!(calc = %label, member = %member, "computing");
    let output = calculator
        .compute(&request)
        .with_context(|| format!("compute '{label}' on '{member}'"))?;
    check_passthrough(job.calculation, &member, &output.attributes)?;

    let id = project
        .store
        .write_result(index, job, &output.payload, output.attributes)
        .with_context(|| format!("store result of '{label}' on '{member}'"))?;
    let stem = index.get(id).stem.clone();
    info!(calc = %label, member = %member, stem = %stem, "result stored");
    Ok(stem)
}

fn build_request(project: &Project, index: &ArtifactIndex, job: &Job<'_>) -> Result<CalcRequest> {
    let upstream = project
        .matcher()
        .upstream_inputs(index, job)?
        .into_iter()
        .map(|input| UpstreamPayload {
            key: input.key.to_string(),
            calc: input.calculation.label(),
            payload_path: project.store.payload_path(&input.record.stem),
            attributes: input.record.attributes.clone(),
        })
        .collect();

    let stem = project.store.next_stem(index, job)?;
    Ok(CalcRequest {
        calc: job.calculation.name.clone(),
        member: job.slice.member.clone(),
        slice: job.slice.clone(),
        selection: job
            .slice
            .group
            .as_deref()
            .and_then(|group| project.slices.group_selection(&job.slice.member, group))
            .cloned(),
        params: job.calculation.params().clone(),
        upstream,
        payload_path: project
            .paths
            .scratch_dir
            .join(format!("{stem}.{PAYLOAD_EXT}")),
    })
}
