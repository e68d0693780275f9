//! Metadata documents (TOML or JSON) declaring variables, collections,
//! slices and calculations.
//!
//! Several documents may be configured; they are merged section by section
//! in order, and an entry declared by two documents is rejected.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::PlanError;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetadataDoc {
    #[serde(default)]
    variables: Map<String, Value>,
    #[serde(default)]
    collections: BTreeMap<String, Value>,
    #[serde(default)]
    slices: BTreeMap<String, Value>,
    #[serde(default)]
    calculations: BTreeMap<String, Value>,
}

/// Merged metadata, still raw (references and loops unresolved).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub variables: Map<String, Value>,
    pub collections: BTreeMap<String, Vec<String>>,
    pub slices: BTreeMap<String, Value>,
    pub calculations: BTreeMap<String, Value>,
    /// Documents merged, in order.
    pub sources: Vec<PathBuf>,
}

/// Load and merge the documents at `paths`.
pub fn load_metadata(paths: &[PathBuf]) -> Result<Metadata> {
    let mut merged = Metadata::default();
    let mut origins: BTreeMap<(&'static str, String), PathBuf> = BTreeMap::new();

    for path in paths {
        let doc = read_doc(path)?;

        let mut claim = |section: &'static str, key: &str| -> Result<()> {
            if let Some(first) = origins.insert((section, key.to_string()), path.clone()) {
                return Err(PlanError::invalid(
                    format!("{section}/{key}"),
                    format!(
                        "declared in both {} and {}",
                        first.display(),
                        path.display()
                    ),
                )
                .into());
            }
            Ok(())
        };

        for (key, value) in doc.variables {
            claim("variables", &key)?;
            merged.variables.insert(key, value);
        }
        for (name, value) in doc.collections {
            claim("collections", &name)?;
            let members = collection_members(&name, value)
                .with_context(|| format!("in {}", path.display()))?;
            merged.collections.insert(name, members);
        }
        for (member, value) in doc.slices {
            claim("slices", &member)?;
            merged.slices.insert(member, value);
        }
        for (name, value) in doc.calculations {
            claim("calculations", &name)?;
            merged.calculations.insert(name, value);
        }
        merged.sources.push(path.clone());
    }

    debug!(
        documents = merged.sources.len(),
        calculations = merged.calculations.len(),
        collections = merged.collections.len(),
        members = merged.slices.len(),
        "metadata loaded"
    );
    Ok(merged)
}

fn read_doc(path: &Path) -> Result<MetadataDoc> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read metadata {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
    } else {
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
    }
}

fn collection_members(name: &str, value: Value) -> std::result::Result<Vec<String>, PlanError> {
    let location = format!("collections/{name}");
    let items = match value {
        Value::String(member) => return Ok(vec![member]),
        Value::Array(items) => items,
        _ => {
            return Err(PlanError::invalid(
                location,
                "expected a member id or a list of member ids",
            ));
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(member) => Ok(member),
            _ => Err(PlanError::invalid(&location, "member ids must be strings")),
        })
        .collect()
}
