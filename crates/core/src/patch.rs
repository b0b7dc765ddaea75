//! RFC 6902 JSON Patch operation model.
//!
//! Application of patches lives in the state store; this module only
//! defines the wire shape and structural validation, shared by
//! `STATE_DELTA` events and the store's transaction API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ValidationError, ValidationErrorKind};
use crate::pointer;

/// The six RFC 6902 operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

impl PatchOpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchOpKind::Add => "add",
            PatchOpKind::Remove => "remove",
            PatchOpKind::Replace => "replace",
            PatchOpKind::Move => "move",
            PatchOpKind::Copy => "copy",
            PatchOpKind::Test => "test",
        }
    }
}

/// A single JSON Patch operation.
///
/// Structural invariants: `move`/`copy` require `from`; `add`/`replace`/
/// `test` require `value`; `remove` requires neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPatchOp {
    pub op: PatchOpKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub from: Option<String>,
}

impl JsonPatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Add,
            path: path.into(),
            value: Some(value),
            from: None,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Remove,
            path: path.into(),
            value: None,
            from: None,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Replace,
            path: path.into(),
            value: Some(value),
            from: None,
        }
    }

    pub fn mv(from: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Move,
            path: path.into(),
            value: None,
            from: Some(from.into()),
        }
    }

    pub fn copy(from: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Copy,
            path: path.into(),
            value: None,
            from: Some(from.into()),
        }
    }

    pub fn test(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Test,
            path: path.into(),
            value: Some(value),
            from: None,
        }
    }

    /// Check structural well-formedness: field presence per kind plus
    /// pointer syntax on `path` and `from`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if pointer::parse(&self.path).is_err() {
            return Err(ValidationError::new(
                ValidationErrorKind::MalformedPatch,
                "path",
                format!("`{}` is not a valid JSON Pointer", self.path),
            ));
        }
        match self.op {
            PatchOpKind::Add | PatchOpKind::Replace | PatchOpKind::Test => {
                if self.value.is_none() {
                    return Err(ValidationError::new(
                        ValidationErrorKind::MalformedPatch,
                        "value",
                        format!("`{}` requires a value", self.op.as_str()),
                    ));
                }
            }
            PatchOpKind::Move | PatchOpKind::Copy => {
                let Some(from) = &self.from else {
                    return Err(ValidationError::new(
                        ValidationErrorKind::MalformedPatch,
                        "from",
                        format!("`{}` requires a from pointer", self.op.as_str()),
                    ));
                };
                if pointer::parse(from).is_err() {
                    return Err(ValidationError::new(
                        ValidationErrorKind::MalformedPatch,
                        "from",
                        format!("`{from}` is not a valid JSON Pointer"),
                    ));
                }
            }
            PatchOpKind::Remove => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_lowercase() {
        let op = JsonPatchOp::replace("/a", json!(1));
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v, json!({"op": "replace", "path": "/a", "value": 1}));
    }

    #[test]
    fn move_requires_from() {
        let mut op = JsonPatchOp::mv("/a", "/b");
        assert!(op.validate().is_ok());
        op.from = None;
        let err = op.validate().unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::MalformedPatch);
        assert_eq!(err.field, "from");
    }

    #[test]
    fn add_requires_value() {
        let op = JsonPatchOp {
            op: PatchOpKind::Add,
            path: "/a".into(),
            value: None,
            from: None,
        };
        assert_eq!(op.validate().unwrap_err().field, "value");
    }

    #[test]
    fn remove_requires_neither() {
        assert!(JsonPatchOp::remove("/a").validate().is_ok());
    }

    #[test]
    fn bad_pointer_rejected() {
        let op = JsonPatchOp::add("no-slash", json!(1));
        assert_eq!(op.validate().unwrap_err().field, "path");

        let op = JsonPatchOp::mv("bad~2", "/ok");
        assert_eq!(op.validate().unwrap_err().field, "from");
    }

    #[test]
    fn deserializes_from_wire() {
        let op: JsonPatchOp =
            serde_json::from_value(json!({"op": "test", "path": "/users/u1/age", "value": 30}))
                .unwrap();
        assert_eq!(op.op, PatchOpKind::Test);
        assert!(op.validate().is_ok());
    }
}
