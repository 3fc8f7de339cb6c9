//! Navigation interpreter for nested `serde_json::Value` trees.
//!
//! All three operations are pure functions of `(tree, path)` aside from the
//! mutation itself. A failed operation never leaves a partially-applied
//! change behind: existing nodes are only validated until the first missing
//! point, and the remainder of the path is checked before any container is
//! created.

use serde_json::{Map, Value};

use crate::error::PathError;
use crate::path::{Path, PathStep};

/// Read the value at `path`, if present.
pub fn get<'a>(tree: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut cur = tree;
    for step in path.steps() {
        cur = match (step, cur) {
            (PathStep::Key(key), Value::Object(map)) => map.get(key)?,
            (PathStep::Index(idx), Value::Array(arr)) => arr.get(*idx)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Write `value` at `path`, creating intermediate containers as needed.
///
/// Returns the previous value at the target, if any. Appending to a sequence
/// at exactly its current length is allowed; anything further is
/// [`PathError::IndexOutOfRange`] (no sparse arrays). `Null` nodes count as
/// absent and are replaced by the container the path requires.
pub fn set(tree: &mut Value, path: &Path, value: Value) -> Result<Option<Value>, PathError> {
    let steps = path.steps();
    if steps.is_empty() {
        return Err(PathError::InvalidPath {
            path: String::new(),
            reason: "empty path".to_string(),
        });
    }

    let mut cur = tree;
    for (i, step) in steps.iter().enumerate() {
        let last = i + 1 == steps.len();
        match step {
            PathStep::Key(key) => {
                if cur.is_null() {
                    check_creatable(path, i)?;
                    *cur = Value::Object(Map::new());
                }
                let Value::Object(map) = cur else {
                    return Err(type_mismatch(path, i, "object"));
                };
                if last {
                    return Ok(map.insert(key.clone(), value));
                }
                if !map.contains_key(key) {
                    check_creatable(path, i + 1)?;
                }
                cur = map
                    .entry(key.clone())
                    .or_insert_with(|| empty_container(&steps[i + 1]));
            }
            PathStep::Index(idx) => {
                if cur.is_null() {
                    check_creatable(path, i)?;
                    *cur = Value::Array(Vec::new());
                }
                let Value::Array(arr) = cur else {
                    return Err(type_mismatch(path, i, "array"));
                };
                if *idx > arr.len() {
                    return Err(index_out_of_range(path, i, *idx, arr.len()));
                }
                if last {
                    if *idx == arr.len() {
                        arr.push(value);
                        return Ok(None);
                    }
                    return Ok(Some(std::mem::replace(&mut arr[*idx], value)));
                }
                if *idx == arr.len() {
                    check_creatable(path, i + 1)?;
                    arr.push(empty_container(&steps[i + 1]));
                }
                cur = &mut arr[*idx];
            }
        }
    }

    unreachable!("final step always returns")
}

/// Remove and return the value at `path`.
///
/// A missing target (anywhere along the path) is `Ok(None)`; removing from a
/// sequence shifts the remaining elements left.
pub fn remove(tree: &mut Value, path: &Path) -> Result<Option<Value>, PathError> {
    let steps = path.steps();
    let mut cur = tree;
    for (i, step) in steps.iter().enumerate() {
        let last = i + 1 == steps.len();
        match step {
            PathStep::Key(key) => {
                let map = match cur {
                    Value::Object(map) => map,
                    Value::Null => return Ok(None),
                    _ => return Err(type_mismatch(path, i, "object")),
                };
                if last {
                    return Ok(map.remove(key));
                }
                match map.get_mut(key) {
                    Some(child) => cur = child,
                    None => return Ok(None),
                }
            }
            PathStep::Index(idx) => {
                let arr = match cur {
                    Value::Array(arr) => arr,
                    Value::Null => return Ok(None),
                    _ => return Err(type_mismatch(path, i, "array")),
                };
                if *idx >= arr.len() {
                    return Ok(None);
                }
                if last {
                    return Ok(Some(arr.remove(*idx)));
                }
                cur = &mut arr[*idx];
            }
        }
    }
    Ok(None)
}

/// Verify that every index step from `from` onward targets a fresh slot.
///
/// Containers past the first missing point start empty, so any index other
/// than the first element would create a sparse array.
fn check_creatable(path: &Path, from: usize) -> Result<(), PathError> {
    for (offset, step) in path.steps()[from..].iter().enumerate() {
        if let PathStep::Index(idx) = step
            && *idx > 0
        {
            return Err(index_out_of_range(path, from + offset, *idx, 0));
        }
    }
    Ok(())
}

fn empty_container(next: &PathStep) -> Value {
    match next {
        PathStep::Key(_) => Value::Object(Map::new()),
        PathStep::Index(_) => Value::Array(Vec::new()),
    }
}

fn container_text(path: &Path, step: usize) -> String {
    if step == 0 {
        "<root>".to_string()
    } else {
        path.prefix_text(step)
    }
}

fn type_mismatch(path: &Path, step: usize, expected: &'static str) -> PathError {
    PathError::TypeMismatch {
        at: container_text(path, step),
        expected,
    }
}

// Errors report 1-based indices to match the path syntax.
fn index_out_of_range(path: &Path, step: usize, idx: usize, len: usize) -> PathError {
    PathError::IndexOutOfRange {
        at: container_text(path, step),
        index: idx + 1,
        len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut tree = json!({});
        for (text, value) in [
            ("Coins", json!(100)),
            ("Profile.Name", json!("arden")),
            ("Inventory.Weapons[1].Durability", json!(75)),
        ] {
            let p = path(text);
            set(&mut tree, &p, value.clone()).unwrap();
            assert_eq!(get(&tree, &p), Some(&value), "round trip for `{}`", text);
        }
    }

    #[test]
    fn test_set_creates_intermediate_containers() {
        let mut tree = json!({});
        set(&mut tree, &path("Inventory.Weapons[1].Id"), json!("sword_001")).unwrap();
        assert_eq!(
            tree,
            json!({"Inventory": {"Weapons": [{"Id": "sword_001"}]}})
        );
    }

    #[test]
    fn test_set_returns_old_value() {
        let mut tree = json!({"Coins": 100});
        let old = set(&mut tree, &path("Coins"), json!(150)).unwrap();
        assert_eq!(old, Some(json!(100)));
        assert_eq!(set(&mut tree, &path("Gems"), json!(1)).unwrap(), None);
    }

    #[test]
    fn test_append_semantics() {
        let mut tree = json!({"Items": ["a"]});
        // index == len appends
        set(&mut tree, &path("Items[2]"), json!("b")).unwrap();
        assert_eq!(tree, json!({"Items": ["a", "b"]}));
        // index > len is rejected and the tree is untouched
        let err = set(&mut tree, &path("Items[4]"), json!("d")).unwrap_err();
        assert!(matches!(err, PathError::IndexOutOfRange { index: 4, len: 2, .. }));
        assert_eq!(tree, json!({"Items": ["a", "b"]}));
    }

    #[test]
    fn test_no_sparse_creation_in_fresh_containers() {
        let mut tree = json!({});
        let err = set(&mut tree, &path("Inventory.Weapons[2].Id"), json!("x")).unwrap_err();
        assert!(matches!(err, PathError::IndexOutOfRange { .. }));
        // the failed operation must not leave empty intermediates behind
        assert_eq!(tree, json!({}));
    }

    #[test]
    fn test_type_mismatch_on_scalar() {
        let mut tree = json!({"Coins": 100});
        let err = set(&mut tree, &path("Coins.Nested"), json!(1)).unwrap_err();
        assert!(matches!(err, PathError::TypeMismatch { expected: "object", .. }));

        let err = set(&mut tree, &path("Coins[1]"), json!(1)).unwrap_err();
        assert!(matches!(err, PathError::TypeMismatch { expected: "array", .. }));
        assert_eq!(tree, json!({"Coins": 100}));
    }

    #[test]
    fn test_null_counts_as_absent() {
        let mut tree = json!({"Slot": null});
        set(&mut tree, &path("Slot.Id"), json!(7)).unwrap();
        assert_eq!(tree, json!({"Slot": {"Id": 7}}));
    }

    #[test]
    fn test_remove_shifts_array() {
        let mut tree = json!({"Items": ["a", "b", "c"]});
        let removed = remove(&mut tree, &path("Items[2]")).unwrap();
        assert_eq!(removed, Some(json!("b")));
        assert_eq!(tree, json!({"Items": ["a", "c"]}));
    }

    #[test]
    fn test_remove_missing_is_none() {
        let mut tree = json!({"Items": ["a"]});
        assert_eq!(remove(&mut tree, &path("Items[5]")).unwrap(), None);
        assert_eq!(remove(&mut tree, &path("Nope.Deep")).unwrap(), None);
        assert_eq!(tree, json!({"Items": ["a"]}));
    }

    #[test]
    fn test_remove_type_mismatch() {
        let mut tree = json!({"Coins": 100});
        let err = remove(&mut tree, &path("Coins.Nested")).unwrap_err();
        assert!(matches!(err, PathError::TypeMismatch { .. }));
    }
}
