//! CLI tests for `calcplan plan`, `validate` and `order`.
//!
//! Spawns the calcplan binary and verifies exit codes for pending, complete
//! and invalid projects.

use std::fs;
use std::process::{Command, Output};

use calcplan::exit_codes;
use calcplan::io::init::{InitOptions, init_project};
use calcplan::test_support::{DENSITY_METADATA, write_legacy_result, write_project};

fn calcplan(root: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_calcplan"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("run calcplan")
}

#[test]
fn plan_after_init_has_pending_jobs() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_project(temp.path(), &InitOptions { force: false }).expect("init");

    let output = calcplan(temp.path(), &["plan"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 2);
    assert!(stdout.lines().all(|line| line.starts_with("pending\tcount[")));
}

#[test]
fn plan_complete_exits_with_complete_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_project(temp.path(), DENSITY_METADATA);
    write_legacy_result(temp.path(), "v1.0-100-10.all.pbcmol.density.n0", "v1", 1.2);
    write_legacy_result(temp.path(), "v2.0-100-10.all.pbcmol.density.n0", "v2", 1.2);

    let output = calcplan(temp.path(), &["plan", "--json"]);
    assert_eq!(output.status.code(), Some(exit_codes::COMPLETE));
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).expect("plan json");
    assert_eq!(plan["jobs"][1]["state"], "matched");
}

#[test]
fn plan_with_orphan_payload_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_project(temp.path(), DENSITY_METADATA);
    let post = temp.path().join("post");
    fs::create_dir_all(&post).expect("post dir");
    fs::write(post.join("v1.0-100-10.all.pbcmol.density.n0.dat"), b"x").expect("dat");

    let output = calcplan(temp.path(), &["plan"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("v1.0-100-10.all.pbcmol.density.n0"));
}

#[test]
fn order_lists_upstream_first() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_project(
        temp.path(),
        r#"
[calculations.rdf]
specs = { upstream = "density" }

[calculations.density]
"#,
    );

    let output = Command::new(env!("CARGO_BIN_EXE_calcplan"))
        .args(["--root", temp.path().to_str().expect("utf-8 path"), "order"])
        .output()
        .expect("calcplan order");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "density\nrdf\n");
}

#[test]
fn validate_reports_cycles() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_project(
        temp.path(),
        "[calculations.a]\nupstream = \"b\"\n[calculations.b]\nupstream = \"a\"\n",
    );

    let output = calcplan(temp.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cycle"));
}
