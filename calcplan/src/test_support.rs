//! Test-only helpers for building projects and scripted calculators.

use std::cell::RefCell;
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use serde_json::json;

use crate::io::config::{CONFIG_FILE, PlanConfig, write_config};
use crate::io::executor::{CalcOutput, CalcRequest, Calculator};

/// Two members sharing a `current` window and one `density` calculation.
pub const DENSITY_METADATA: &str = r#"
[variables]
cutoffs = { short = 1.2 }

[collections]
demo = ["v1", "v2"]

[slices.v1.groups]
all = "all"

[slices.v1.slices.current]
start = 0
end = 100
skip = 10
pbc = "mol"
groups = ["all"]

[slices.v2.groups]
all = "all"

[slices.v2.slices.current]
start = 0
end = 100
skip = 10
pbc = "mol"
groups = ["all"]

[calculations.density]
collections = "demo"
slice_name = "current"
group = "all"
specs = { cutoff = "+cutoffs/short" }
"#;

/// Write a default `calcplan.toml` and `calcs/meta.toml` under `root`.
pub fn write_project(root: &Path, metadata: &str) {
    let config = PlanConfig::default();
    write_config(&root.join(CONFIG_FILE), &config).expect("write config");
    let meta_path = root.join("calcs").join("meta.toml");
    fs::create_dir_all(meta_path.parent().expect("meta parent")).expect("create calcs dir");
    fs::write(&meta_path, metadata).expect("write metadata");
}

/// Write a `density` result pair in the pre-schema `.spec` layout.
pub fn write_legacy_result(root: &Path, stem: &str, member: &str, cutoff: f64) {
    let post = root.join("post");
    fs::create_dir_all(&post).expect("create post dir");
    fs::write(post.join(format!("{stem}.dat")), b"legacy payload").expect("write dat");
    let spec = json!({
        "calc_name": "density",
        "specs": {"cutoff": cutoff},
        "sn": member,
        "group": "all",
        "pbc": "mol",
        "start": 0,
        "end": 100,
        "skip": 10,
        "cutoff": cutoff,
    });
    fs::write(post.join(format!("{stem}.spec")), spec.to_string()).expect("write spec");
}

/// Calculator that echoes parameters back as attributes without spawning anything.
///
/// Every request is recorded so tests can assert on ordering and upstream wiring.
#[derive(Debug, Default)]
pub struct ScriptedCalculator {
    /// Parameter keys left out of the returned attributes.
    pub drop_keys: Vec<String>,
    /// Calculation names that fail instead of producing output.
    pub failing: Vec<String>,
    pub requests: RefCell<Vec<CalcRequest>>,
}

impl ScriptedCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropping(key: &str) -> Self {
        Self {
            drop_keys: vec![key.to_string()],
            ..Self::default()
        }
    }

    pub fn failing_on(calc: &str) -> Self {
        Self {
            failing: vec![calc.to_string()],
            ..Self::default()
        }
    }

    /// `(calc, member)` of every request in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.requests
            .borrow()
            .iter()
            .map(|request| (request.calc.clone(), request.member.clone()))
            .collect()
    }
}

impl Calculator for ScriptedCalculator {
    fn compute(&self, request: &CalcRequest) -> Result<CalcOutput> {
        self.requests.borrow_mut().push(request.clone());
        if self.failing.contains(&request.calc) {
            return Err(anyhow!("scripted failure for '{}'", request.calc));
        }
        let mut attributes = request.params.clone();
        for key in &self.drop_keys {
            attributes.remove(key);
        }
        let payload = format!("{}:{}", request.calc, request.member).into_bytes();
        Ok(CalcOutput {
            payload,
            attributes,
        })
    }
}
