//! Deep merge of JSON values.

use serde_json::{Map, Value};

/// Merges `patch` into `base` and returns the result.
///
/// Objects merge key by key, recursively. Every other value in `patch`,
/// arrays included, replaces the value in `base` wholesale. Neither input
/// is modified.
///
/// # Examples
///
/// ```
/// use ayatori::merge::deep_merge;
/// use serde_json::json;
///
/// let base = json!({ "a": 1, "b": [1, 2], "nested": { "x": 1, "y": 2 } });
/// let patch = json!({ "b": [3], "nested": { "y": 5 } });
///
/// assert_eq!(
///     deep_merge(&base, &patch),
///     json!({ "a": 1, "b": [3], "nested": { "x": 1, "y": 5 } })
/// );
/// ```
pub fn deep_merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged: Map<String, Value> = base.clone();
            for (key, value) in patch {
                let next = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, patch) => patch.clone(),
    }
}
