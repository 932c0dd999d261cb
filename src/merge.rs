//! Deep merge of JSON values.

use serde_json::Value;

/// Merge `overlay` into `base`. Objects merge key by key and recurse;
/// anything else (scalars, arrays, null) in `overlay` replaces what `base` had.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Fold a sequence of values left to right; later entries win.
/// Returns `None` for an empty sequence.
pub fn merge_all<I>(values: I) -> Option<Value>
where
    I: IntoIterator<Item = Value>,
{
    values.into_iter().fold(None, |acc, next| match acc {
        None => Some(next),
        Some(mut merged) => {
            deep_merge(&mut merged, next);
            Some(merged)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_later_scalar_wins_and_maps_recurse() {
        let merged = merge_all([
            json!({"replicas": 1, "image": {"tag": "a", "pull": "Always"}}),
            json!({"replicas": 3, "image": {"tag": "b"}}),
        ])
        .unwrap();
        assert_eq!(
            merged,
            json!({"replicas": 3, "image": {"tag": "b", "pull": "Always"}})
        );
    }

    #[test]
    fn test_arrays_are_replaced() {
        let mut base = json!({"args": ["a", "b"]});
        deep_merge(&mut base, json!({"args": ["c"]}));
        assert_eq!(base, json!({"args": ["c"]}));
    }

    #[test]
    fn test_empty_sequence() {
        assert!(merge_all(Vec::<Value>::new()).is_none());
    }
}
