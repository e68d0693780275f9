//! Parameter sweep expansion.
//!
//! Any mapping in a specification may carry the reserved key `loop`. Its value
//! is either a mapping (named branches) or a list (anonymous branches). Every
//! such mapping is one axis; the expansion is the Cartesian product of all
//! axes, with the loop-holding mapping replaced by the chosen branch.
//!
//! Axes are discovered depth-first in sorted key order (lists in index order),
//! and the product varies the last axis fastest, so expansion order is stable
//! for a fixed input.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{PlanError, Result};

/// Reserved key marking a parameter sweep.
pub const LOOP_KEY: &str = "loop";

/// One step of a path into a specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// Render a path as `a/b/0`; the root renders as `<root>`.
pub fn render_path(path: &[PathSeg]) -> String {
    if path.is_empty() {
        return "<root>".to_string();
    }
    path.iter()
        .map(|seg| match seg {
            PathSeg::Key(key) => key.clone(),
            PathSeg::Index(idx) => idx.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Which branch of an axis was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Choice {
    /// Position in an anonymous (list) loop.
    Index(usize),
    /// Key in a named (mapping) loop.
    Name(String),
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Choice::Index(idx) => write!(f, "{idx}"),
            Choice::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasEntry {
    /// Path of the mapping that held the `loop` key.
    pub path: String,
    pub choice: Choice,
}

/// Full trail of branch choices for one expanded combination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Alias {
    pub entries: Vec<AliasEntry>,
}

impl Alias {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|entry| format!("{}={}", entry.path, entry.choice))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// One concrete combination produced by [`expand`].
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub spec: Value,
    pub alias: Alias,
    /// Chosen branch value per axis, in axis order, before any further processing.
    pub choices: Vec<Value>,
}

#[derive(Debug)]
struct LoopAxis {
    parent: Vec<PathSeg>,
    branches: Vec<(Choice, Value)>,
}

/// Expand every `loop` in `spec` into the Cartesian product of its branches.
///
/// A loop-free spec yields exactly one expansion equal to the input with an
/// empty alias.
pub fn expand(spec: &Value) -> Result<Vec<Expansion>> {
    let mut axes = Vec::new();
    let mut path = Vec::new();
    discover(spec, &mut path, &mut axes)?;

    if axes.is_empty() {
        return Ok(vec![Expansion {
            spec: spec.clone(),
            alias: Alias::default(),
            choices: Vec::new(),
        }]);
    }

    let total: usize = axes.iter().map(|axis| axis.branches.len()).product();
    let mut out = Vec::with_capacity(total);
    let mut cursor = vec![0usize; axes.len()];

    loop {
        let mut concrete = spec.clone();
        let mut alias = Alias::default();
        let mut choices = Vec::with_capacity(axes.len());
        for (axis, &pick) in axes.iter().zip(&cursor) {
            let (choice, branch) = &axis.branches[pick];
            replace_at(&mut concrete, &axis.parent, branch.clone())?;
            alias.entries.push(AliasEntry {
                path: render_path(&axis.parent),
                choice: choice.clone(),
            });
            choices.push(branch.clone());
        }
        out.push(Expansion {
            spec: concrete,
            alias,
            choices,
        });

        // Odometer step: last axis varies fastest.
        let mut idx = axes.len();
        loop {
            if idx == 0 {
                return Ok(out);
            }
            idx -= 1;
            cursor[idx] += 1;
            if cursor[idx] < axes[idx].branches.len() {
                break;
            }
            cursor[idx] = 0;
        }
    }
}

/// True if `value` holds a `loop` key anywhere.
pub fn contains_loop(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.contains_key(LOOP_KEY) || map.values().any(contains_loop),
        Value::Array(items) => items.iter().any(contains_loop),
        _ => false,
    }
}

fn discover(value: &Value, path: &mut Vec<PathSeg>, axes: &mut Vec<LoopAxis>) -> Result<()> {
    match value {
        Value::Object(map) => {
            if let Some(target) = map.get(LOOP_KEY) {
                axes.push(loop_axis(map.len(), target, path)?);
                return Ok(());
            }
            for (key, child) in map {
                path.push(PathSeg::Key(key.clone()));
                discover(child, path, axes)?;
                path.pop();
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                path.push(PathSeg::Index(idx));
                discover(child, path, axes)?;
                path.pop();
            }
        }
        _ => {}
    }
    Ok(())
}

fn loop_axis(parent_len: usize, target: &Value, path: &[PathSeg]) -> Result<LoopAxis> {
    let invalid = |reason: &str| PlanError::LoopTargetInvalid {
        path: render_path(path),
        reason: reason.to_string(),
    };

    if parent_len > 1 {
        return Err(invalid(
            "a mapping holding 'loop' must not carry other keys",
        ));
    }

    let branches: Vec<(Choice, Value)> = match target {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| (Choice::Index(idx), item.clone()))
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(name, item)| (Choice::Name(name.clone()), item.clone()))
            .collect(),
        _ => return Err(invalid("loop value must be a mapping or a list")),
    };

    if branches.is_empty() {
        return Err(invalid("loop has no branches"));
    }
    if branches.iter().any(|(_, branch)| contains_loop(branch)) {
        return Err(invalid("loops nested inside loop branches are not supported"));
    }

    Ok(LoopAxis {
        parent: path.to_vec(),
        branches,
    })
}

fn replace_at(root: &mut Value, path: &[PathSeg], replacement: Value) -> Result<()> {
    let mut current = root;
    for seg in path {
        let next = match (seg, current) {
            (PathSeg::Key(key), Value::Object(map)) => map.get_mut(key),
            (PathSeg::Index(idx), Value::Array(items)) => items.get_mut(*idx),
            _ => None,
        };
        current = next.ok_or_else(|| PlanError::LoopTargetInvalid {
            path: render_path(path),
            reason: "loop parent disappeared during expansion".to_string(),
        })?;
    }
    *current = replacement;
    Ok(())
}
