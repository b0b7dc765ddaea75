//! RFC 6902 patch application against a scratch document.
//!
//! These helpers mutate a `serde_json::Value` in place and report failures
//! as plain reason strings; the store wraps them with the op index to form
//! its atomic `Patch` error.  Nothing here touches shard locks.

use agui_core::patch::{JsonPatchOp, PatchOpKind};
use agui_core::pointer;
use serde_json::Value;

/// Apply one op to `root`.  On error the document may be partially
/// navigated but is never partially mutated: every mutation happens as
/// the final action of its branch.
pub fn apply_op(root: &mut Value, op: &JsonPatchOp) -> Result<(), String> {
    let segments = pointer::parse(&op.path).map_err(|e| e.to_string())?;
    match op.op {
        PatchOpKind::Add => {
            let value = op.value.clone().ok_or("add requires a value")?;
            add(root, &segments, value)
        }
        PatchOpKind::Remove => remove(root, &segments).map(|_| ()),
        PatchOpKind::Replace => {
            let value = op.value.clone().ok_or("replace requires a value")?;
            replace(root, &segments, value)
        }
        PatchOpKind::Move => {
            let from = op.from.as_deref().ok_or("move requires from")?;
            let from_segments = pointer::parse(from).map_err(|e| e.to_string())?;
            if is_prefix(&from_segments, &segments) {
                return Err(format!(
                    "cannot move `{from}` into its own child `{}`",
                    op.path
                ));
            }
            let taken = remove(root, &from_segments)?;
            add(root, &segments, taken)
        }
        PatchOpKind::Copy => {
            let from = op.from.as_deref().ok_or("copy requires from")?;
            let from_segments = pointer::parse(from).map_err(|e| e.to_string())?;
            let copied = pointer::resolve(root, &from_segments)
                .map_err(|e| e.to_string())?
                .clone();
            add(root, &segments, copied)
        }
        PatchOpKind::Test => {
            let expected = op.value.as_ref().ok_or("test requires a value")?;
            let actual = pointer::resolve(root, &segments).map_err(|e| e.to_string())?;
            if actual != expected {
                return Err(format!(
                    "test failed at `{}`: expected {expected}, found {actual}",
                    op.path
                ));
            }
            Ok(())
        }
    }
}

/// True when `a` is a strict prefix of `b`.
fn is_prefix(a: &[String], b: &[String]) -> bool {
    b.len() > a.len() && b[..a.len()] == *a
}

/// Walk to the parent of the addressed node.
fn parent_mut<'v>(root: &'v mut Value, segments: &[String]) -> Result<&'v mut Value, String> {
    let mut current = root;
    for seg in &segments[..segments.len() - 1] {
        current = match current {
            Value::Object(map) => map
                .get_mut(seg.as_str())
                .ok_or_else(|| format!("path segment `{seg}` not found"))?,
            Value::Array(items) => {
                let len = items.len();
                let idx = pointer::array_index(seg, len).map_err(|e| e.to_string())?;
                items
                    .get_mut(idx)
                    .ok_or_else(|| format!("array index `{seg}` out of bounds"))?
            }
            _ => return Err(format!("cannot descend into scalar at `{seg}`")),
        };
    }
    Ok(current)
}

fn add(root: &mut Value, segments: &[String], value: Value) -> Result<(), String> {
    if segments.is_empty() {
        *root = value;
        return Ok(());
    }
    let last = &segments[segments.len() - 1];
    let parent = parent_mut(root, segments)?;
    match parent {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx = pointer::array_index(last, items.len()).map_err(|e| e.to_string())?;
            if idx > items.len() {
                return Err(format!("array index `{last}` out of bounds for insert"));
            }
            items.insert(idx, value);
            Ok(())
        }
        _ => Err("cannot add a child to a scalar".into()),
    }
}

fn remove(root: &mut Value, segments: &[String]) -> Result<Value, String> {
    if segments.is_empty() {
        return Err("cannot remove the document root".into());
    }
    let last = &segments[segments.len() - 1];
    let parent = parent_mut(root, segments)?;
    match parent {
        Value::Object(map) => map
            .remove(last.as_str())
            .ok_or_else(|| format!("key `{last}` not found")),
        Value::Array(items) => {
            let idx = pointer::array_index(last, items.len()).map_err(|e| e.to_string())?;
            if idx >= items.len() {
                return Err(format!("array index `{last}` out of bounds"));
            }
            Ok(items.remove(idx))
        }
        _ => Err("cannot remove a child of a scalar".into()),
    }
}

fn replace(root: &mut Value, segments: &[String], value: Value) -> Result<(), String> {
    if segments.is_empty() {
        *root = value;
        return Ok(());
    }
    let last = &segments[segments.len() - 1];
    let parent = parent_mut(root, segments)?;
    match parent {
        Value::Object(map) => match map.get_mut(last.as_str()) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(format!("key `{last}` not found")),
        },
        Value::Array(items) => {
            let len = items.len();
            let idx = pointer::array_index(last, len).map_err(|e| e.to_string())?;
            match items.get_mut(idx) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(format!("array index `{last}` out of bounds")),
            }
        }
        _ => Err("cannot replace a child of a scalar".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agui_core::JsonPatchOp;
    use serde_json::json;

    #[test]
    fn add_inserts_and_overwrites_object_keys() {
        let mut doc = json!({"a": 1});
        apply_op(&mut doc, &JsonPatchOp::add("/b", json!(2))).unwrap();
        apply_op(&mut doc, &JsonPatchOp::add("/a", json!(9))).unwrap();
        assert_eq!(doc, json!({"a": 9, "b": 2}));
    }

    #[test]
    fn add_inserts_into_arrays() {
        let mut doc = json!({"xs": [1, 3]});
        apply_op(&mut doc, &JsonPatchOp::add("/xs/1", json!(2))).unwrap();
        apply_op(&mut doc, &JsonPatchOp::add("/xs/-", json!(4))).unwrap();
        assert_eq!(doc, json!({"xs": [1, 2, 3, 4]}));
    }

    #[test]
    fn remove_object_key_and_array_element() {
        let mut doc = json!({"a": 1, "xs": [1, 2, 3]});
        apply_op(&mut doc, &JsonPatchOp::remove("/a")).unwrap();
        apply_op(&mut doc, &JsonPatchOp::remove("/xs/1")).unwrap();
        assert_eq!(doc, json!({"xs": [1, 3]}));
    }

    #[test]
    fn remove_missing_key_fails() {
        let mut doc = json!({"a": 1});
        assert!(apply_op(&mut doc, &JsonPatchOp::remove("/b")).is_err());
    }

    #[test]
    fn replace_requires_existing_target() {
        let mut doc = json!({"a": 1});
        apply_op(&mut doc, &JsonPatchOp::replace("/a", json!(2))).unwrap();
        assert_eq!(doc, json!({"a": 2}));
        assert!(apply_op(&mut doc, &JsonPatchOp::replace("/b", json!(3))).is_err());
    }

    #[test]
    fn move_relocates_a_subtree() {
        let mut doc = json!({"a": {"x": 1}, "b": {}});
        apply_op(&mut doc, &JsonPatchOp::mv("/a/x", "/b/y")).unwrap();
        assert_eq!(doc, json!({"a": {}, "b": {"y": 1}}));
    }

    #[test]
    fn move_into_own_child_is_rejected() {
        let mut doc = json!({"a": {"b": {}}});
        let err = apply_op(&mut doc, &JsonPatchOp::mv("/a", "/a/b/c")).unwrap_err();
        assert!(err.contains("own child"));
        assert_eq!(doc, json!({"a": {"b": {}}}));
    }

    #[test]
    fn copy_duplicates_a_subtree() {
        let mut doc = json!({"a": {"x": 1}});
        apply_op(&mut doc, &JsonPatchOp::copy("/a", "/b")).unwrap();
        assert_eq!(doc, json!({"a": {"x": 1}, "b": {"x": 1}}));
    }

    #[test]
    fn test_op_compares_deeply() {
        let mut doc = json!({"users": {"u1": {"age": 30}}});
        assert!(apply_op(&mut doc, &JsonPatchOp::test("/users/u1/age", json!(30))).is_ok());
        let err =
            apply_op(&mut doc, &JsonPatchOp::test("/users/u1/age", json!(999))).unwrap_err();
        assert!(err.contains("test failed"));
    }

    #[test]
    fn escaped_segments_address_literal_keys() {
        let mut doc = json!({"a/b": 1, "c~d": 2});
        assert!(apply_op(&mut doc, &JsonPatchOp::test("/a~1b", json!(1))).is_ok());
        assert!(apply_op(&mut doc, &JsonPatchOp::test("/c~0d", json!(2))).is_ok());
    }
}
