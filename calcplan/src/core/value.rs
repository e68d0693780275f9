//! Deep comparison helpers for specification values.
//!
//! Specifications are plain `serde_json::Value` trees. Comparisons here apply
//! canonical int/float coercion (`1` equals `1.0`) and nothing else: strings
//! compare exactly, lists compare element-wise in order.

use serde_json::{Map, Value};

/// Deep equality with int/float coercion.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (a.as_u64(), b.as_u64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            },
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

/// True if every key of `subset` is present in `superset` with an equal value.
///
/// Nested mappings are compared recursively with the same rule, so a record
/// carrying extra historical fields at any depth still matches.
pub fn is_superset(superset: &Value, subset: &Value) -> bool {
    match (superset, subset) {
        (Value::Object(sup), Value::Object(sub)) => map_is_superset(sup, sub),
        _ => values_equal(superset, subset),
    }
}

/// [`is_superset`] over two mappings.
pub fn map_is_superset(superset: &Map<String, Value>, subset: &Map<String, Value>) -> bool {
    subset.iter().all(|(key, want)| {
        superset
            .get(key)
            .is_some_and(|have| is_superset(have, want))
    })
}

/// Look up a slash-delimited path (`a/b/0/c`) inside a value.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('/') {
        if part.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Compact single-line rendering for error messages.
pub fn render(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<unprintable>".to_string())
}

/// Read an integral number, accepting integral floats (`100.0`).
pub fn as_integral(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_compare_across_int_and_float() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({"a": [1, 2.0]}), &json!({"a": [1.0, 2]})));
        assert!(!values_equal(&json!(1.2), &json!(1.0)));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn superset_tolerates_extra_fields_at_any_depth() {
        let record = json!({"cutoff": 1.2, "legacy": true, "inner": {"a": 1, "b": 2}});
        assert!(is_superset(&record, &json!({"cutoff": 1.2, "inner": {"a": 1.0}})));
        assert!(is_superset(&record, &json!({})));
        assert!(!is_superset(&record, &json!({"cutoff": 1.0})));
        assert!(!is_superset(&record, &json!({"missing": 1})));
    }

    #[test]
    fn lookup_path_walks_maps_and_lists() {
        let root = json!({"selectors": {"all": "name CA", "list": ["x", "y"]}});
        assert_eq!(lookup_path(&root, "selectors/all"), Some(&json!("name CA")));
        assert_eq!(lookup_path(&root, "selectors/list/1"), Some(&json!("y")));
        assert_eq!(lookup_path(&root, "selectors/none"), None);
        assert_eq!(lookup_path(&root, ""), None);
    }

    #[test]
    fn integral_accepts_whole_floats_only() {
        assert_eq!(as_integral(&json!(100)), Some(100));
        assert_eq!(as_integral(&json!(100.0)), Some(100));
        assert_eq!(as_integral(&json!(1.5)), None);
        assert_eq!(as_integral(&json!("100")), None);
    }
}
