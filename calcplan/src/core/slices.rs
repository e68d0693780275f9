//! Validated slice metadata.
//!
//! The `slices` section maps each member to its groups (opaque selections
//! handed to the external slicer) and its named slice definitions. A slice
//! definition listing groups expands into one group-qualified [`Slice`] per
//! group; one without groups is a single group-less slice.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::core::naming::ShortNamer;
use crate::core::normalize::{VariableTable, normalize};
use crate::core::types::{Slice, SliceKind};
use crate::core::value::as_integral;
use crate::error::{PlanError, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemberSlices {
    #[serde(default)]
    groups: BTreeMap<String, Value>,
    #[serde(default)]
    slices: BTreeMap<String, SliceDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SliceDef {
    #[serde(default)]
    kind: SliceKind,
    start: Option<Value>,
    end: Option<Value>,
    skip: Option<Value>,
    pbc: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
}

type SliceKey = (String, String, Option<String>);

/// Every slice of every member, keyed by `(member, slice_name, group)`.
#[derive(Debug, Clone, Default)]
pub struct SliceTable {
    slices: BTreeMap<SliceKey, Slice>,
    groups: BTreeMap<String, BTreeMap<String, Value>>,
}

impl SliceTable {
    pub fn build(
        raw: &BTreeMap<String, Value>,
        variables: &VariableTable,
        namer: &ShortNamer,
    ) -> Result<Self> {
        let mut table = Self::default();
        let mut owners: BTreeMap<String, String> = BTreeMap::new();

        for (member, raw_member) in raw {
            let location = format!("slices/{member}");
            let normalized = normalize(raw_member, variables, &location)?;
            let parsed: MemberSlices = serde_json::from_value(normalized)
                .map_err(|err| PlanError::invalid(&location, err.to_string()))?;

            let short = namer.short_name(member)?;
            if let Some(other) = owners.insert(short.clone(), member.clone()) {
                return Err(PlanError::invalid(
                    &location,
                    format!("short name '{short}' is also used by member '{other}'"),
                ));
            }

            for group in parsed.groups.keys() {
                check_field(group, &format!("{location}/groups/{group}"))?;
            }
            for (slice_name, def) in &parsed.slices {
                let slice_location = format!("{location}/slices/{slice_name}");
                check_field(slice_name, &slice_location)?;
                for slice in expand_def(member, &short, slice_name, def, &parsed.groups, &slice_location)? {
                    let key = (member.clone(), slice_name.clone(), slice.group.clone());
                    table.slices.insert(key, slice);
                }
            }

            table.groups.insert(member.clone(), parsed.groups);
        }
        Ok(table)
    }

    /// Resolve a slice, trying the group-qualified entry before the
    /// group-less one.
    pub fn lookup(&self, member: &str, slice_name: &str, group: Option<&str>) -> Result<&Slice> {
        let key = |group: Option<&str>| {
            (
                member.to_string(),
                slice_name.to_string(),
                group.map(str::to_string),
            )
        };
        if group.is_some() {
            if let Some(slice) = self.slices.get(&key(group)) {
                return Ok(slice);
            }
        }
        self.slices
            .get(&key(None))
            .ok_or_else(|| PlanError::SliceNotFound {
                member: member.to_string(),
                slice_name: slice_name.to_string(),
                group: group.map(str::to_string),
            })
    }

    /// Opaque selection of a group, as declared for the member.
    pub fn group_selection(&self, member: &str, group: &str) -> Option<&Value> {
        self.groups.get(member)?.get(group)
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

fn expand_def(
    member: &str,
    short: &str,
    slice_name: &str,
    def: &SliceDef,
    groups: &BTreeMap<String, Value>,
    location: &str,
) -> Result<Vec<Slice>> {
    let (start, end, skip) = match def.kind {
        SliceKind::Raw => (None, None, None),
        SliceKind::Standard => {
            let start = bound(def.start.as_ref(), "start", location)?;
            let end = bound(def.end.as_ref(), "end", location)?;
            let skip = bound(def.skip.as_ref(), "skip", location)?;
            if end < start {
                return Err(PlanError::invalid(location, "end must not precede start"));
            }
            if skip == 0 {
                return Err(PlanError::invalid(location, "skip must be positive"));
            }
            (Some(start), Some(end), Some(skip))
        }
    };
    if let Some(pbc) = &def.pbc {
        check_field(pbc, &format!("{location}/pbc"))?;
    }

    let base = Slice {
        member: member.to_string(),
        short_name: short.to_string(),
        slice_name: slice_name.to_string(),
        group: None,
        start,
        end,
        skip,
        pbc: def.pbc.clone(),
        kind: def.kind,
    };

    if def.groups.is_empty() {
        return Ok(vec![base]);
    }
    if def.kind == SliceKind::Standard && def.pbc.is_none() {
        return Err(PlanError::invalid(
            location,
            "group-qualified standard slice needs pbc",
        ));
    }
    def.groups
        .iter()
        .map(|group| {
            if !groups.contains_key(group) {
                return Err(PlanError::invalid(
                    format!("{location}/groups"),
                    format!("group '{group}' is not declared for member '{member}'"),
                ));
            }
            Ok(Slice {
                group: Some(group.clone()),
                ..base.clone()
            })
        })
        .collect()
}

fn bound(value: Option<&Value>, field: &str, location: &str) -> Result<i64> {
    let value = value.ok_or_else(|| {
        PlanError::invalid(location, format!("standard slice needs '{field}'"))
    })?;
    match as_integral(value) {
        Some(n) if n >= 0 => Ok(n),
        _ => Err(PlanError::invalid(
            format!("{location}/{field}"),
            "expected a non-negative integer",
        )),
    }
}

fn check_field(name: &str, location: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') || name.contains('/') {
        return Err(PlanError::invalid(
            location,
            format!("'{name}' must be non-empty and contain no '.' or '/'"),
        ));
    }
    Ok(())
}
