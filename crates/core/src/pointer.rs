//! RFC 6901 JSON Pointer parsing and read-side resolution.
//!
//! Pointers address nodes inside the state tree: `""` is the root,
//! `/users/u1/age` descends through objects, numeric segments index arrays,
//! and `-` addresses the one-past-the-end slot for appends.  `~0` unescapes
//! to `~` and `~1` to `/`.

use serde_json::Value;

/// A pointer that failed to parse or resolve.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    #[error("pointer must start with '/' or be empty, got `{0}`")]
    MissingLeadingSlash(String),

    #[error("invalid escape sequence in segment `{0}`")]
    BadEscape(String),

    #[error("segment `{segment}` does not exist at `{at}`")]
    NotFound { segment: String, at: String },

    #[error("segment `{segment}` is not a valid array index")]
    BadIndex { segment: String },

    #[error("cannot descend into a scalar at `{0}`")]
    Scalar(String),
}

/// Split a pointer into unescaped segments.  The empty pointer yields an
/// empty vector (the root).
pub fn parse(pointer: &str) -> Result<Vec<String>, PointerError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let rest = pointer
        .strip_prefix('/')
        .ok_or_else(|| PointerError::MissingLeadingSlash(pointer.to_string()))?;
    rest.split('/').map(unescape).collect()
}

/// Unescape a single reference token (`~1` → `/`, `~0` → `~`).
pub fn unescape(segment: &str) -> Result<String, PointerError> {
    if !segment.contains('~') {
        return Ok(segment.to_string());
    }
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(PointerError::BadEscape(segment.to_string())),
        }
    }
    Ok(out)
}

/// Escape a single reference token for embedding in a pointer string.
pub fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Join unescaped segments back into a pointer string.
pub fn join(segments: &[String]) -> String {
    if segments.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for seg in segments {
        out.push('/');
        out.push_str(&escape(seg));
    }
    out
}

/// Resolve a parsed pointer against a value, returning a reference to the
/// addressed node.
pub fn resolve<'v>(root: &'v Value, segments: &[String]) -> Result<&'v Value, PointerError> {
    let mut current = root;
    for (depth, seg) in segments.iter().enumerate() {
        let at = join(&segments[..depth].to_vec());
        current = match current {
            Value::Object(map) => map.get(seg).ok_or_else(|| PointerError::NotFound {
                segment: seg.clone(),
                at: at.clone(),
            })?,
            Value::Array(items) => {
                let idx = array_index(seg, items.len())?;
                items.get(idx).ok_or_else(|| PointerError::NotFound {
                    segment: seg.clone(),
                    at: at.clone(),
                })?
            }
            _ => return Err(PointerError::Scalar(at)),
        };
    }
    Ok(current)
}

/// Parse an array-index segment.  `-` means one past the end (only
/// meaningful for inserts; resolves to `len` here and the caller decides
/// whether that is addressable).
pub fn array_index(segment: &str, len: usize) -> Result<usize, PointerError> {
    if segment == "-" {
        return Ok(len);
    }
    // Leading zeros are not valid indices per RFC 6901.
    if segment.len() > 1 && segment.starts_with('0') {
        return Err(PointerError::BadIndex {
            segment: segment.to_string(),
        });
    }
    segment.parse::<usize>().map_err(|_| PointerError::BadIndex {
        segment: segment.to_string(),
    })
}
