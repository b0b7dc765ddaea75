//! Error types shared across the wire model.

/// A frame could not be decoded into an [`Event`](crate::Event).
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("missing eventType discriminator")]
    MissingTag,

    #[error("truncated binary frame: declared {declared} bytes, got {actual}")]
    Truncated { declared: usize, actual: usize },

    #[error("binary frame shorter than length prefix")]
    MissingPrefix,
}

/// What kind of per-variant validation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// A required field is absent.
    MissingField,
    /// A required field is present but empty.
    EmptyField,
    /// A field carries a value outside its allowed set or range.
    InvalidValue,
    /// A JSON Patch operation is structurally invalid.
    MalformedPatch,
    /// The event carries a tag this protocol version does not know.
    UnknownEvent,
}

/// An event failed its per-variant field validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("validation failed on `{field}`: {detail}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// Wire name of the offending field.
    pub field: &'static str,
    pub detail: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, field: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            field,
            detail: detail.into(),
        }
    }
}
