//! Concrete calculation variants and their upstream links.
//!
//! The catalog is an arena: every [`Calculation`] lives in one `Vec` and is
//! addressed by [`CalcId`]. Upstream links are ids, never live references, so
//! the catalog can be inspected or serialized without aliasing concerns.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::loops::{Alias, expand};
use crate::core::normalize::{VariableTable, normalize};
use crate::core::value::{map_is_superset, render, values_equal};
use crate::error::{PlanError, Result};

/// Key holding the parameters passed to the executor.
pub const SPECS_KEY: &str = "specs";
/// Key declaring upstream dependencies.
pub const UPSTREAM_KEY: &str = "upstream";

/// Stable index of a calculation variant in the catalog arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CalcId(pub usize);

/// Snapshot of the loop choices that produced a variant.
///
/// Upstream constraints are matched against `specs`, the variant's parameter
/// mapping with its own upstream declaration left as written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stub {
    pub alias: Alias,
    /// Chosen branch value per loop axis, as written before normalization.
    pub choices: Vec<Value>,
    pub specs: Map<String, Value>,
}

/// One resolved upstream edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamLink {
    /// Upstream calculation name as declared.
    pub key: String,
    pub calc: CalcId,
}

/// A concrete calculation variant.
#[derive(Debug, Clone, Serialize)]
pub struct Calculation {
    pub id: CalcId,
    pub name: String,
    /// Normalized entry for this loop combination.
    pub specs: Map<String, Value>,
    /// Raw entry as declared, loops unexpanded.
    pub specs_raw: Value,
    pub stub: Stub,
    pub upstream: Vec<UpstreamLink>,
    params: Map<String, Value>,
}

impl Calculation {
    /// Parameters handed to the executor (`specs["specs"]`).
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn alias(&self) -> &Alias {
        &self.stub.alias
    }

    pub fn slice_name(&self) -> Option<&str> {
        self.specs.get("slice_name").and_then(Value::as_str)
    }

    pub fn group(&self) -> Option<&str> {
        self.specs.get("group").and_then(Value::as_str)
    }

    /// Declared collection names (a single string or a list of strings).
    pub fn collections(&self) -> Result<Vec<String>> {
        let location = format!("calculations/{}/collections", self.name);
        match self.specs.get("collections") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(name)) => Ok(vec![name.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| PlanError::invalid(&location, "collection names must be strings"))
                })
                .collect(),
            Some(_) => Err(PlanError::invalid(
                &location,
                "expected a collection name or a list of names",
            )),
        }
    }

    /// Human label: `name` or `name[alias]`.
    pub fn label(&self) -> String {
        if self.stub.alias.is_empty() {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, self.stub.alias)
        }
    }
}

/// Two variants are the same unit of work when name and parameters agree.
impl PartialEq for Calculation {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && values_equal(
                &Value::Object(self.params.clone()),
                &Value::Object(other.params.clone()),
            )
    }
}

/// A declared upstream dependency before resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRef {
    pub name: String,
    pub constraints: Map<String, Value>,
}

/// Read the upstream declaration of a (concrete) calculation entry.
///
/// Looks in `specs.upstream` first, then a top-level `upstream`. Accepted
/// shapes: a bare name, a list of names and/or mappings, or a mapping from
/// name to constraints (`null` meaning none).
pub fn upstream_refs(entry: &Map<String, Value>, location: &str) -> Result<Vec<UpstreamRef>> {
    let declared = entry
        .get(SPECS_KEY)
        .and_then(|specs| specs.get(UPSTREAM_KEY))
        .or_else(|| entry.get(UPSTREAM_KEY));
    let Some(declared) = declared else {
        return Ok(Vec::new());
    };
    let location = format!("{location}/upstream");

    let mut refs = Vec::new();
    match declared {
        Value::Null => {}
        Value::String(name) => refs.push(bare(name)),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(name) => refs.push(bare(name)),
                    Value::Object(map) => push_mapping(map, &location, &mut refs)?,
                    _ => {
                        return Err(PlanError::invalid(
                            &location,
                            "list entries must be names or mappings",
                        ));
                    }
                }
            }
        }
        Value::Object(map) => push_mapping(map, &location, &mut refs)?,
        _ => {
            return Err(PlanError::invalid(
                &location,
                "expected a name, a list, or a mapping",
            ));
        }
    }
    Ok(refs)
}

fn bare(name: &str) -> UpstreamRef {
    UpstreamRef {
        name: name.to_string(),
        constraints: Map::new(),
    }
}

fn push_mapping(
    map: &Map<String, Value>,
    location: &str,
    refs: &mut Vec<UpstreamRef>,
) -> Result<()> {
    for (name, constraints) in map {
        let constraints = match constraints {
            Value::Null => Map::new(),
            Value::Object(inner) => inner.clone(),
            _ => {
                return Err(PlanError::invalid(
                    format!("{location}/{name}"),
                    "upstream constraints must be a mapping",
                ));
            }
        };
        refs.push(UpstreamRef {
            name: name.clone(),
            constraints,
        });
    }
    Ok(())
}

/// Owner of every calculation variant for one planning pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CalculationCatalog {
    calcs: Vec<Calculation>,
    by_name: BTreeMap<String, Vec<CalcId>>,
}

impl CalculationCatalog {
    /// Expand, normalize, and link every raw calculation.
    pub fn build(raw_calcs: &BTreeMap<String, Value>, variables: &VariableTable) -> Result<Self> {
        let mut catalog = Self::default();

        for (name, raw) in raw_calcs {
            let location = format!("calculations/{name}");
            validate_name(name, &location)?;
            if !raw.is_object() {
                return Err(PlanError::invalid(&location, "calculation entry must be a mapping"));
            }

            let expansions = expand(raw).map_err(|err| prefix_loop_path(err, &location))?;
            for expansion in expansions {
                let normalized = normalize(&expansion.spec, variables, &location)?;
                let Value::Object(specs) = normalized else {
                    return Err(PlanError::invalid(&location, "loop must not replace the whole entry with a non-mapping"));
                };
                let params = match specs.get(SPECS_KEY) {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(_) => {
                        return Err(PlanError::invalid(
                            format!("{location}/{SPECS_KEY}"),
                            "parameters must be a mapping",
                        ));
                    }
                };

                let id = CalcId(catalog.calcs.len());
                catalog.calcs.push(Calculation {
                    id,
                    name: name.clone(),
                    specs,
                    specs_raw: raw.clone(),
                    stub: Stub {
                        alias: expansion.alias,
                        choices: expansion.choices,
                        specs: params.clone(),
                    },
                    upstream: Vec::new(),
                    params,
                });
                catalog.by_name.entry(name.clone()).or_default().push(id);
            }
        }

        let mut links = Vec::with_capacity(catalog.calcs.len());
        for calc in &catalog.calcs {
            let location = format!("calculations/{}", calc.name);
            let mut resolved = Vec::new();
            for reference in upstream_refs(&calc.specs, &location)? {
                let target = catalog.resolve_upstream(&calc.name, &reference)?;
                resolved.push(UpstreamLink {
                    key: reference.name,
                    calc: target,
                });
            }
            links.push(resolved);
        }
        for (calc, resolved) in catalog.calcs.iter_mut().zip(links) {
            calc.upstream = resolved;
        }

        debug!(
            names = catalog.by_name.len(),
            variants = catalog.calcs.len(),
            "calculation catalog built"
        );
        Ok(catalog)
    }

    pub fn get(&self, id: CalcId) -> &Calculation {
        &self.calcs[id.0]
    }

    pub fn len(&self) -> usize {
        self.calcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calcs.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Calculation names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Variants of `name` in expansion order (empty if unknown).
    pub fn variants(&self, name: &str) -> impl Iterator<Item = &Calculation> {
        self.by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|id| self.get(*id))
    }

    /// Upstream variants of `calc`, paired with their edge key.
    pub fn upstream_of<'a>(
        &'a self,
        calc: &'a Calculation,
    ) -> impl Iterator<Item = (&'a str, &'a Calculation)> {
        calc.upstream
            .iter()
            .map(|link| (link.key.as_str(), self.get(link.calc)))
    }

    /// Resolve one upstream reference declared by `calc_name`.
    pub fn resolve_upstream(&self, calc_name: &str, reference: &UpstreamRef) -> Result<CalcId> {
        let ids = self
            .by_name
            .get(&reference.name)
            .ok_or_else(|| PlanError::UnknownCalculation {
                name: reference.name.clone(),
                referenced_by: format!("upstream of calculation '{calc_name}'"),
            })?;

        if reference.constraints.is_empty() && ids.len() == 1 {
            return Ok(ids[0]);
        }

        let matches: Vec<CalcId> = ids
            .iter()
            .copied()
            .filter(|id| map_is_superset(&self.get(*id).stub.specs, &reference.constraints))
            .collect();
        let constraints = render(&Value::Object(reference.constraints.clone()));
        match matches.as_slice() {
            [only] => Ok(*only),
            [] => Err(PlanError::UpstreamNotFound {
                calc: calc_name.to_string(),
                upstream: reference.name.clone(),
                constraints,
            }),
            many => Err(PlanError::UpstreamAmbiguous {
                calc: calc_name.to_string(),
                upstream: reference.name.clone(),
                constraints,
                matches: many.len(),
                aliases: many
                    .iter()
                    .map(|id| self.get(*id).label())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Find the unique variant of `name` whose parameters contain `specs`.
    ///
    /// A single-variant calculation is returned regardless of `specs`: there
    /// is nothing to disambiguate.
    pub fn find_calculation(&self, name: &str, specs: &Map<String, Value>) -> Result<&Calculation> {
        let ids = self
            .by_name
            .get(name)
            .ok_or_else(|| PlanError::UnknownCalculation {
                name: name.to_string(),
                referenced_by: "calculation lookup".to_string(),
            })?;

        let matches: Vec<CalcId> = ids
            .iter()
            .copied()
            .filter(|id| map_is_superset(self.get(*id).params(), specs))
            .collect();
        if let [only] = matches.as_slice() {
            return Ok(self.get(*only));
        }
        if let [only] = ids.as_slice() {
            return Ok(self.get(*only));
        }
        Err(PlanError::CalculationNotFound {
            name: name.to_string(),
            specs: render(&Value::Object(specs.clone())),
            matches: matches.len(),
        })
    }
}

fn validate_name(name: &str, location: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') || name.contains('/') {
        return Err(PlanError::invalid(
            location,
            "calculation names must be non-empty and contain no '.' or '/'",
        ));
    }
    Ok(())
}

/// Prefix the path of a loop error with the entry location.
pub(crate) fn prefix_loop_path(err: PlanError, location: &str) -> PlanError {
    match err {
        PlanError::LoopTargetInvalid { path, reason } => PlanError::LoopTargetInvalid {
            path: format!("{location}/{path}"),
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog(calcs: Value) -> Result<CalculationCatalog> {
        let Value::Object(map) = calcs else {
            panic!("calculations must be a mapping");
        };
        let raw: BTreeMap<String, Value> = map.into_iter().collect();
        CalculationCatalog::build(&raw, &VariableTable::default())
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("mapping")
    }

    #[test]
    fn loop_variants_are_distinct_and_findable() {
        let cat = catalog(json!({
            "density": {"collections": ["demo"], "specs": {"cutoff": {"loop": [1.0, 1.2]}}}
        }))
        .expect("catalog");

        let variants: Vec<&Calculation> = cat.variants("density").collect();
        assert_eq!(variants.len(), 2);
        assert_ne!(variants[0].alias(), variants[1].alias());
        assert_eq!(variants[0].params()["cutoff"], json!(1.0));
        assert_eq!(variants[1].stub.choices, vec![json!(1.2)]);

        let found = cat
            .find_calculation("density", &params(json!({"cutoff": 1.2})))
            .expect("find");
        assert_eq!(found.id, variants[1].id);
        assert_eq!(found.label(), "density[specs/cutoff=1]");
    }

    #[test]
    fn find_falls_back_to_single_variant_and_rejects_ambiguity() {
        let cat = catalog(json!({
            "single": {"specs": {"a": 1}},
            "swept": {"specs": {"a": {"loop": [1, 2]}}},
        }))
        .expect("catalog");

        let found = cat
            .find_calculation("single", &params(json!({"a": 99})))
            .expect("single variant");
        assert_eq!(found.name, "single");

        let err = cat
            .find_calculation("swept", &params(json!({})))
            .expect_err("ambiguous");
        assert_eq!(
            err,
            PlanError::CalculationNotFound {
                name: "swept".to_string(),
                specs: "{}".to_string(),
                matches: 2,
            }
        );

        let err = cat
            .find_calculation("absent", &Map::new())
            .expect_err("unknown");
        assert_eq!(err.kind(), "UnknownCalculation");
    }

    #[test]
    fn upstream_links_follow_constraints() {
        let cat = catalog(json!({
            "base": {"specs": {"cutoff": {"loop": [1.0, 1.2]}}},
            "derived": {"specs": {"upstream": {"base": {"cutoff": 1.2}}}},
            "shorthand": {"specs": {"upstream": "single"}},
            "single": {"specs": {}},
        }))
        .expect("catalog");

        let derived = cat.variants("derived").next().expect("derived");
        let links: Vec<(&str, &Calculation)> = cat.upstream_of(derived).collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0, "base");
        assert_eq!(links[0].1.params()["cutoff"], json!(1.2));

        let shorthand = cat.variants("shorthand").next().expect("shorthand");
        assert_eq!(shorthand.upstream[0].key, "single");
    }

    #[test]
    fn upstream_loops_link_each_variant() {
        let cat = catalog(json!({
            "base": {"specs": {"cutoff": {"loop": [1.0, 1.2]}}},
            "derived": {"specs": {"upstream": {"base": {"cutoff": {"loop": [1.0, 1.2]}}}}},
        }))
        .expect("catalog");

        let targets: Vec<Value> = cat
            .variants("derived")
            .map(|calc| cat.get(calc.upstream[0].calc).params()["cutoff"].clone())
            .collect();
        assert_eq!(targets, vec![json!(1.0), json!(1.2)]);
    }

    #[test]
    fn upstream_resolution_failures_are_named() {
        let missing = catalog(json!({
            "base": {"specs": {"cutoff": {"loop": [1.0, 1.2]}}},
            "derived": {"specs": {"upstream": {"base": {"cutoff": 9.9}}}},
        }))
        .expect_err("not found");
        assert_eq!(missing.kind(), "UpstreamNotFound");

        let ambiguous = catalog(json!({
            "base": {"specs": {"cutoff": {"loop": [1.0, 1.2]}}},
            "derived": {"specs": {"upstream": "base"}},
        }))
        .expect_err("ambiguous");
        assert!(matches!(ambiguous, PlanError::UpstreamAmbiguous { matches: 2, .. }));

        let unknown = catalog(json!({
            "derived": {"specs": {"upstream": ["ghost"]}},
        }))
        .expect_err("unknown");
        assert_eq!(
            unknown,
            PlanError::UnknownCalculation {
                name: "ghost".to_string(),
                referenced_by: "upstream of calculation 'derived'".to_string(),
            }
        );
    }

    #[test]
    fn identity_ignores_bookkeeping_keys() {
        let a = catalog(json!({"c": {"group": "all", "specs": {"x": 1}}})).expect("a");
        let b = catalog(json!({"c": {"group": "protein", "specs": {"x": 1.0}}})).expect("b");
        assert_eq!(a.get(CalcId(0)), b.get(CalcId(0)));
    }

    #[test]
    fn loop_errors_carry_calculation_location() {
        let err = catalog(json!({"c": {"specs": {"x": {"loop": 3}}}})).expect_err("loop");
        assert!(matches!(err, PlanError::LoopTargetInvalid { ref path, .. } if path == "calculations/c/specs/x"));
    }

    #[test]
    fn collections_accept_string_or_list() {
        let cat = catalog(json!({
            "one": {"collections": "demo"},
            "many": {"collections": ["a", "b"]},
        }))
        .expect("catalog");
        let one = cat.variants("one").next().expect("one");
        let many = cat.variants("many").next().expect("many");
        assert_eq!(one.collections().expect("one"), vec!["demo"]);
        assert_eq!(many.collections().expect("many"), vec!["a", "b"]);
    }
}
