//! Execution order over calculation names.
//!
//! The order is computed on the name graph: a name depends on every name its
//! variants declare as upstream. Each raw entry is expanded and normalized the
//! same way the catalog does it, so upstreams inside loop branches or given
//! as variable references count, and only `specs.upstream` (or a top-level
//! `upstream`) is read.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::catalog::{prefix_loop_path, upstream_refs};
use crate::core::loops::expand;
use crate::core::normalize::{VariableTable, normalize};
use crate::error::{PlanError, Result};

/// Map each calculation name to the sorted names it depends on.
pub fn dependencies(
    raw_calcs: &BTreeMap<String, Value>,
    variables: &VariableTable,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut deps = BTreeMap::new();
    for (name, raw) in raw_calcs {
        let location = format!("calculations/{name}");
        let mut found = Vec::new();
        for expansion in expand(raw).map_err(|err| prefix_loop_path(err, &location))? {
            let Value::Object(entry) = normalize(&expansion.spec, variables, &location)? else {
                return Err(PlanError::invalid(&location, "calculation entry must be a mapping"));
            };
            found.extend(
                upstream_refs(&entry, &location)?
                    .into_iter()
                    .map(|reference| reference.name),
            );
        }
        found.sort();
        found.dedup();
        for dep in &found {
            if !raw_calcs.contains_key(dep) {
                return Err(PlanError::UnknownCalculation {
                    name: dep.clone(),
                    referenced_by: format!("upstream of calculation '{name}'"),
                });
            }
        }
        deps.insert(name.clone(), found);
    }
    Ok(deps)
}

/// Order names so that each appears after everything it depends on.
///
/// Names are visited lexically and emitted in depth-first post-order, so the
/// result is deterministic. A back edge is reported as
/// [`PlanError::DependencyCycle`] with the offending path.
pub fn order(
    raw_calcs: &BTreeMap<String, Value>,
    variables: &VariableTable,
) -> Result<Vec<String>> {
    let deps = dependencies(raw_calcs, variables)?;

    let mut marks = BTreeMap::<&str, Mark>::new();
    let mut stack = Vec::<&str>::new();
    let mut ordered = Vec::with_capacity(deps.len());
    for name in deps.keys() {
        visit(name, &deps, &mut marks, &mut stack, &mut ordered)?;
    }
    Ok(ordered)
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Mark {
    Temp,
    Perm,
}

fn visit<'a>(
    name: &'a str,
    deps: &'a BTreeMap<String, Vec<String>>,
    marks: &mut BTreeMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    ordered: &mut Vec<String>,
) -> Result<()> {
    match marks.get(name) {
        Some(Mark::Perm) => return Ok(()),
        Some(Mark::Temp) => {
            // `name` is on the current path: report the loop back to it.
            let start = stack.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return Err(PlanError::DependencyCycle { cycle });
        }
        None => {}
    }

    marks.insert(name, Mark::Temp);
    stack.push(name);
    if let Some(children) = deps.get(name) {
        for dep in children {
            visit(dep, deps, marks, stack, ordered)?;
        }
    }
    stack.pop();
    marks.insert(name, Mark::Perm);
    ordered.push(name.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> BTreeMap<String, Value> {
        value
            .as_object()
            .cloned()
            .expect("mapping")
            .into_iter()
            .collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).expect("present")
    }

    #[test]
    fn chain_orders_dependencies_first() {
        let calcs = raw(json!({
            "c": {"specs": {"upstream": "b"}},
            "a": {"specs": {}},
            "b": {"specs": {"upstream": {"a": null}}},
        }));
        let order = order(&calcs, &VariableTable::default()).expect("order");
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_respects_every_edge() {
        let calcs = raw(json!({
            "top": {"specs": {"upstream": ["left", {"right": {"x": 1}}]}},
            "left": {"upstream": "root"},
            "right": {"specs": {"upstream": "root"}},
            "root": {},
        }));
        let order = order(&calcs, &VariableTable::default()).expect("order");
        assert_eq!(order.len(), 4);
        assert!(position(&order, "root") < position(&order, "left"));
        assert!(position(&order, "root") < position(&order, "right"));
        assert!(position(&order, "left") < position(&order, "top"));
        assert!(position(&order, "right") < position(&order, "top"));
    }

    #[test]
    fn upstream_names_inside_loops_are_dependencies() {
        let calcs = raw(json!({
            "sweep": {"specs": {"upstream": {"loop": [{"a": null}, {"b": null}]}}},
            "a": {},
            "b": {},
        }));
        let deps = dependencies(&calcs, &VariableTable::default()).expect("deps");
        assert_eq!(deps["sweep"], vec!["a", "b"]);
    }

    #[test]
    fn upstream_given_as_a_variable_reference_is_resolved() {
        let calcs = raw(json!({
            "derived": {"specs": {"upstream": "+calcs/base"}},
            "base": {},
        }));
        let vars = VariableTable::build(
            json!({"calcs": {"base": "base"}}).as_object().expect("mapping"),
        )
        .expect("variables");
        assert_eq!(dependencies(&calcs, &vars).expect("deps")["derived"], vec!["base"]);
        assert_eq!(order(&calcs, &vars).expect("order"), vec!["base", "derived"]);
    }

    #[test]
    fn upstream_outside_the_declared_locations_is_not_an_edge() {
        let calcs = raw(json!({
            "a": {"specs": {"upstream": "b", "window": {"upstream": "c"}}},
            "b": {},
            "c": {},
        }));
        assert_eq!(
            dependencies(&calcs, &VariableTable::default()).expect("deps")["a"],
            vec!["b"]
        );
    }

    #[test]
    fn specs_upstream_takes_precedence_over_top_level() {
        let calcs = raw(json!({
            "a": {"upstream": "c", "specs": {"upstream": "b"}},
            "b": {},
            "c": {},
        }));
        assert_eq!(
            dependencies(&calcs, &VariableTable::default()).expect("deps")["a"],
            vec!["b"]
        );
    }

    #[test]
    fn two_cycle_is_reported_with_path() {
        let calcs = raw(json!({
            "a": {"specs": {"upstream": "b"}},
            "b": {"specs": {"upstream": "a"}},
        }));
        let err = order(&calcs, &VariableTable::default()).expect_err("cycle");
        assert_eq!(
            err,
            PlanError::DependencyCycle {
                cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            }
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let calcs = raw(json!({"a": {"upstream": "a"}}));
        assert_eq!(order(&calcs, &VariableTable::default()).expect_err("cycle").kind(), "DependencyCycle");
    }

    #[test]
    fn unknown_dependency_is_named() {
        let calcs = raw(json!({"a": {"upstream": "ghost"}}));
        let err = order(&calcs, &VariableTable::default()).expect_err("unknown");
        assert_eq!(
            err,
            PlanError::UnknownCalculation {
                name: "ghost".to_string(),
                referenced_by: "upstream of calculation 'a'".to_string(),
            }
        );
    }
}
