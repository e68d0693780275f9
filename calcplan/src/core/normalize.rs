//! Variable reference substitution.
//!
//! A string leaf starting with [`REF_PREFIX`] names a slash-delimited path in
//! the `variables` section (`+selectors/protein`). Substitution is single-pass:
//! the variable table is normalized against its own raw form once, and a
//! variable that still resolves to another reference is rejected.

use serde_json::{Map, Value};

use crate::core::loops::{PathSeg, render_path};
use crate::core::value::lookup_path;
use crate::error::{PlanError, Result};

/// Reserved prefix marking an internal reference.
pub const REF_PREFIX: char = '+';

/// Normalized `variables` section, the target of every reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableTable {
    root: Value,
}

impl VariableTable {
    /// Normalize the raw `variables` section against itself.
    pub fn build(raw: &Map<String, Value>) -> Result<Self> {
        let raw_root = Value::Object(raw.clone());
        let mut path = vec![PathSeg::Key("variables".to_string())];
        let normalized = substitute(&raw_root, &raw_root, &mut path)?;

        // Chained references are not followed.
        let mut path = vec![PathSeg::Key("variables".to_string())];
        if let Some((location, reference)) = first_reference(&normalized, &mut path) {
            return Err(PlanError::UnresolvedReference {
                reference,
                location: format!("{location} (variable refers to another reference)"),
            });
        }

        Ok(Self { root: normalized })
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.root, path)
    }
}

/// Replace every reference in `spec` with its value from `table`.
///
/// `location` prefixes error paths so messages point at the source entry
/// (for example `calculations/density`).
pub fn normalize(spec: &Value, table: &VariableTable, location: &str) -> Result<Value> {
    let mut path: Vec<PathSeg> = location
        .split('/')
        .filter(|part| !part.is_empty())
        .map(|part| PathSeg::Key(part.to_string()))
        .collect();
    substitute(spec, &table.root, &mut path)
}

fn substitute(value: &Value, table: &Value, path: &mut Vec<PathSeg>) -> Result<Value> {
    match value {
        Value::String(text) => match text.strip_prefix(REF_PREFIX) {
            Some(reference) => lookup_path(table, reference).cloned().ok_or_else(|| {
                PlanError::UnresolvedReference {
                    reference: reference.to_string(),
                    location: render_path(path),
                }
            }),
            None => Ok(value.clone()),
        },
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                path.push(PathSeg::Key(key.clone()));
                out.insert(key.clone(), substitute(child, table, path)?);
                path.pop();
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (idx, child) in items.iter().enumerate() {
                path.push(PathSeg::Index(idx));
                out.push(substitute(child, table, path)?);
                path.pop();
            }
            Ok(Value::Array(out))
        }
        _ => Ok(value.clone()),
    }
}

fn first_reference(value: &Value, path: &mut Vec<PathSeg>) -> Option<(String, String)> {
    match value {
        Value::String(text) => text
            .strip_prefix(REF_PREFIX)
            .map(|reference| (render_path(path), reference.to_string())),
        Value::Object(map) => {
            for (key, child) in map {
                path.push(PathSeg::Key(key.clone()));
                let found = first_reference(child, path);
                path.pop();
                if found.is_some() {
                    return found;
                }
            }
            None
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                path.push(PathSeg::Index(idx));
                let found = first_reference(child, path);
                path.pop();
                if found.is_some() {
                    return found;
                }
            }
            None
        }
        _ => None,
    }
}
