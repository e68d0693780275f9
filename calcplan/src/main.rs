//! Dependency-aware calculation scheduler.
//!
//! Reads calculation metadata, matches every variant against the records in
//! the artifact directory and runs only what is missing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use calcplan::compute::compute_from_root;
use calcplan::core::types::JobState;
use calcplan::exit_codes;
use calcplan::io::init::{InitOptions, init_project};
use calcplan::logging;
use calcplan::plan::{PlanReport, Project, Selection, plan_from_root};
use calcplan::validate::validate_project;

#[derive(Parser)]
#[command(
    name = "calcplan",
    version,
    about = "Dependency-aware calculation scheduler"
)]
struct Cli {
    /// Project root containing `calcplan.toml`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `calcplan.toml`, a metadata skeleton and the artifact directory.
    Init {
        /// Overwrite existing config and skeleton files.
        #[arg(short, long)]
        force: bool,
    },
    /// Load metadata and scan the artifact directory without running anything.
    Validate,
    /// Print calculation names in dependency order.
    Order,
    /// List every job and whether a matching result already exists.
    Plan {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run every pending job with the configured calculation command.
    Compute {
        #[command(flatten)]
        selection: SelectionArgs,
    },
}

#[derive(Args, Debug, Default)]
struct SelectionArgs {
    /// Only this calculation and its upstream (repeatable).
    #[arg(long = "calc", value_name = "NAME")]
    calcs: Vec<String>,
    /// Run on these collections instead of each calculation's own (repeatable).
    #[arg(long = "collection", value_name = "NAME")]
    collections: Vec<String>,
}

impl From<SelectionArgs> for Selection {
    fn from(args: SelectionArgs) -> Self {
        Selection {
            calcs: args.calcs,
            collections: args.collections,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.root;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Validate => cmd_validate(&root),
        Command::Order => cmd_order(&root),
        Command::Plan { selection, json } => cmd_plan(&root, &selection.into(), json),
        Command::Compute { selection } => cmd_compute(&root, &selection.into()),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialized {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let report = validate_project(root)?;
    println!(
        "ok: {} calculations ({} variants), {} slices, {} collections, {} results",
        report.calculations, report.variants, report.slices, report.collections, report.results
    );
    for name in &report.limbo {
        println!("limbo: {name}");
    }
    Ok(exit_codes::OK)
}

fn cmd_order(root: &Path) -> Result<i32> {
    let project = Project::load(root)?;
    for name in &project.order {
        println!("{name}");
    }
    Ok(exit_codes::OK)
}

fn cmd_plan(root: &Path, selection: &Selection, json: bool) -> Result<i32> {
    let report = plan_from_root(root, selection)?;
    if json {
        print_json(&report)?;
    } else {
        print!("{}", render_plan(&report));
    }
    if report.is_complete() {
        Ok(exit_codes::COMPLETE)
    } else {
        Ok(exit_codes::OK)
    }
}

fn cmd_compute(root: &Path, selection: &Selection) -> Result<i32> {
    let report = compute_from_root(root, selection)?;
    for stem in &report.computed {
        println!("computed {stem}");
    }
    println!(
        "{} computed, {} already present",
        report.computed.len(),
        report.matched
    );
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{rendered}");
    Ok(())
}

/// One tab-separated line per job: state, calculation, member, slice, stem.
fn render_plan(report: &PlanReport) -> String {
    let mut out = String::new();
    for job in &report.jobs {
        let state = match job.state {
            JobState::Matched => "done",
            JobState::Unmatched => "pending",
        };
        let calc = if job.alias.is_empty() {
            job.calc.clone()
        } else {
            format!("{}[{}]", job.calc, job.alias)
        };
        let slice = match &job.group {
            Some(group) => format!("{}/{}", job.slice_name, group),
            None => job.slice_name.clone(),
        };
        out.push_str(&format!(
            "{state}\t{calc}\t{}\t{slice}\t{}\n",
            job.member, job.stem
        ));
    }
    out
}
