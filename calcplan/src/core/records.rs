//! Result specifications and the on-disk `.spec` schema.
//!
//! A [`ResultSpec`] is what a result record claims to contain and what a job
//! asks for. Spec files carry a `schema` tag; legacy files have none and are
//! upgraded once, on read, before anything compares them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::core::catalog::{Calculation, UPSTREAM_KEY};
use crate::core::types::{Slice, SliceKind};
use crate::core::value::{as_integral, map_is_superset, render, values_equal};
use crate::error::{PlanError, Result};

/// Schema number written by this crate.
pub const SPEC_SCHEMA: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcDescriptor {
    pub name: String,
    #[serde(default)]
    pub specs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceDescriptor {
    pub sn: String,
    pub short_name: String,
    #[serde(default)]
    pub slice_name: Option<String>,
    #[serde(default)]
    pub kind: SliceKind,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub pbc: Option<String>,
    #[serde(default, deserialize_with = "integral")]
    pub start: Option<i64>,
    #[serde(default, deserialize_with = "integral")]
    pub end: Option<i64>,
    #[serde(default, deserialize_with = "integral")]
    pub skip: Option<i64>,
}

impl SliceDescriptor {
    /// Same member and bounds. Slice and short names are labels only.
    pub fn same_slice(&self, other: &Self) -> bool {
        self.sn == other.sn
            && self.group == other.group
            && self.pbc == other.pbc
            && self.start == other.start
            && self.end == other.end
            && self.skip == other.skip
    }
}

impl From<&Slice> for SliceDescriptor {
    fn from(slice: &Slice) -> Self {
        Self {
            sn: slice.member.clone(),
            short_name: slice.short_name.clone(),
            slice_name: Some(slice.slice_name.clone()),
            kind: slice.kind,
            group: slice.group.clone(),
            pbc: slice.pbc.clone(),
            start: slice.start,
            end: slice.end,
            skip: slice.skip,
        }
    }
}

/// Full specification of one result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSpec {
    pub calc: CalcDescriptor,
    pub slice: SliceDescriptor,
}

impl ResultSpec {
    pub fn new(calculation: &Calculation, slice: &Slice) -> Self {
        Self {
            calc: CalcDescriptor {
                name: calculation.name.clone(),
                specs: calculation.params().clone(),
            },
            slice: SliceDescriptor::from(slice),
        }
    }

    /// True if a record with this spec satisfies `target`.
    ///
    /// The slice must be identical and the calculation name equal; the
    /// record's parameters only need to contain the target's.
    pub fn satisfies(&self, target: &ResultSpec) -> bool {
        self.slice.same_slice(&target.slice)
            && self.calc.name == target.calc.name
            && map_is_superset(&self.calc.specs, &target.calc.specs)
    }

    /// True if the parameters equal the target's exactly.
    pub fn same_params(&self, target: &ResultSpec) -> bool {
        values_equal(
            &Value::Object(self.calc.specs.clone()),
            &Value::Object(target.calc.specs.clone()),
        )
    }

    /// One-line description for messages.
    pub fn describe(&self) -> String {
        let slice = &self.slice;
        let bounds = match (slice.start, slice.end, slice.skip) {
            (Some(start), Some(end), Some(skip)) => format!(" {start}-{end}-{skip}"),
            _ => String::new(),
        };
        let group = slice
            .group
            .as_deref()
            .map(|group| format!(" group {group}"))
            .unwrap_or_default();
        let pbc = slice
            .pbc
            .as_deref()
            .map(|pbc| format!(" pbc {pbc}"))
            .unwrap_or_default();
        format!(
            "calculation '{}' {} on '{}'{bounds}{group}{pbc}",
            self.calc.name,
            render(&Value::Object(self.calc.specs.clone())),
            slice.sn
        )
    }
}

/// A result spec plus the attributes the executor returned.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSpec {
    pub spec: ResultSpec,
    pub attributes: Map<String, Value>,
}

/// Current `.spec` file layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecFile {
    pub schema: u32,
    pub calc: CalcDescriptor,
    pub slice: SliceDescriptor,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl SpecFile {
    pub fn new(spec: ResultSpec, attributes: Map<String, Value>) -> Self {
        Self {
            schema: SPEC_SCHEMA,
            calc: spec.calc,
            slice: spec.slice,
            attributes,
        }
    }
}

/// Flat layout written before schema tags existed.
#[derive(Debug, Clone, Deserialize)]
struct LegacySpecFile {
    calc_name: String,
    #[serde(default)]
    specs: Map<String, Value>,
    sn: String,
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    slice_name: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    pbc: Option<String>,
    #[serde(default, deserialize_with = "integral")]
    start: Option<i64>,
    #[serde(default, deserialize_with = "integral")]
    end: Option<i64>,
    #[serde(default, deserialize_with = "integral")]
    skip: Option<i64>,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl LegacySpecFile {
    fn upgrade(self) -> StoredSpec {
        let kind = if self.start.is_some() {
            SliceKind::Standard
        } else {
            SliceKind::Raw
        };
        StoredSpec {
            spec: ResultSpec {
                calc: CalcDescriptor {
                    name: self.calc_name,
                    specs: self.specs,
                },
                slice: SliceDescriptor {
                    short_name: self.short_name.unwrap_or_else(|| self.sn.clone()),
                    sn: self.sn,
                    slice_name: self.slice_name,
                    kind,
                    group: self.group,
                    pbc: self.pbc,
                    start: self.start,
                    end: self.end,
                    skip: self.skip,
                },
            },
            attributes: self.attributes,
        }
    }
}

/// Parse a `.spec` document of any known schema into the current shape.
///
/// `location` names the file in errors.
pub fn read_spec_file(value: Value, location: &str) -> Result<StoredSpec> {
    let invalid = |err: serde_json::Error| PlanError::invalid(location, err.to_string());
    match value.get("schema") {
        None => {
            let legacy: LegacySpecFile = serde_json::from_value(value).map_err(invalid)?;
            Ok(legacy.upgrade())
        }
        Some(schema) if as_integral(schema) == Some(i64::from(SPEC_SCHEMA)) => {
            let file: SpecFile = serde_json::from_value(value).map_err(invalid)?;
            Ok(StoredSpec {
                spec: ResultSpec {
                    calc: file.calc,
                    slice: file.slice,
                },
                attributes: file.attributes,
            })
        }
        Some(other) => Err(PlanError::invalid(
            location,
            format!("unsupported spec schema {}", render(other)),
        )),
    }
}

/// Check that every declared parameter reappears in the result attributes.
pub fn check_passthrough(
    calculation: &Calculation,
    member: &str,
    attributes: &Map<String, Value>,
) -> Result<()> {
    let missing: Vec<String> = calculation
        .params()
        .keys()
        .filter(|key| key.as_str() != UPSTREAM_KEY && !attributes.contains_key(key.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PlanError::AttributesPassthroughMissing {
            calc: calculation.name.clone(),
            member: member.to_string(),
            missing,
        })
    }
}

fn integral<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => as_integral(&value).map(Some).ok_or_else(|| {
            serde::de::Error::custom(format!("expected an integer, found {}", render(&value)))
        }),
    }
}
