//! Shape similarity between an observed JSON value and its baseline.
//!
//! The score compares *shape*: which keys are present and what JSON kind
//! each matching key holds. Values themselves are ignored, so
//! `{"status": "degraded"}` scores 1.0 against `{"status": "ok"}`.

use std::collections::BTreeSet;

use serde_json::Value;

/// Weight of the key-presence ratio in the final score.
pub const KEY_MATCH_WEIGHT: f64 = 0.7;
/// Weight of the kind-agreement ratio in the final score.
pub const TYPE_MATCH_WEIGHT: f64 = 0.3;

/// JSON kind used for the type-agreement half of the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

/// Score `actual` against `baseline`, returning a value in `[0, 1]`.
///
/// - A missing or `null` side scores 0.
/// - `key_ratio = |baseline keys ∩ actual keys| / |baseline keys|`.
/// - `type_ratio` = share of matching keys whose values have the same kind
///   (0 when nothing matches).
/// - `score = key_ratio * 0.7 + type_ratio * 0.3`.
///
/// Objects are keyed by field name and arrays by index; scalars have no
/// keys. A keyless baseline scores 1 against a keyless actual of the same
/// kind and 0 otherwise, so `42` against `"x"` or `[]` against `{}` is 0.
pub fn score(actual: Option<&Value>, baseline: Option<&Value>) -> f64 {
    let (Some(actual), Some(baseline)) = (actual, baseline) else {
        return 0.0;
    };
    if actual.is_null() || baseline.is_null() {
        return 0.0;
    }

    let baseline_keys = shape_keys(baseline);
    let actual_keys: BTreeSet<String> = shape_keys(actual).into_iter().collect();

    if baseline_keys.is_empty() {
        // Kind is the only shape left to compare.
        let same_kind = ValueKind::of(actual) == ValueKind::of(baseline);
        return if actual_keys.is_empty() && same_kind { 1.0 } else { 0.0 };
    }

    let matching: Vec<&String> = baseline_keys
        .iter()
        .filter(|k| actual_keys.contains(k.as_str()))
        .collect();

    let key_ratio = matching.len() as f64 / baseline_keys.len() as f64;
    let type_ratio = if matching.is_empty() {
        0.0
    } else {
        let same_kind = matching
            .iter()
            .filter(|k| {
                match (child(actual, k), child(baseline, k)) {
                    (Some(a), Some(b)) => ValueKind::of(a) == ValueKind::of(b),
                    _ => false,
                }
            })
            .count();
        same_kind as f64 / matching.len() as f64
    };

    key_ratio * KEY_MATCH_WEIGHT + type_ratio * TYPE_MATCH_WEIGHT
}

/// Convenience wrapper for two present values.
pub fn score_values(actual: &Value, baseline: &Value) -> f64 {
    score(Some(actual), Some(baseline))
}

fn shape_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn child<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}
