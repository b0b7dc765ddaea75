//! Identifier generation.
//!
//! Protocol identifiers follow `<prefix>_<hex>` (e.g. `run_4be1…`,
//! `msg_90af…`).  The suffix is a v4 UUID in simple (dashless) form, which
//! is collision-safe across processes without coordination.

use uuid::Uuid;

/// Generate an identifier with the given prefix.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Generate a `run_…` identifier.
pub fn run_id() -> String {
    new_id("run")
}

/// Generate a `thread_…` identifier.
pub fn thread_id() -> String {
    new_id("thread")
}

/// Generate a `msg_…` identifier.
pub fn message_id() -> String {
    new_id("msg")
}

/// Generate a `tool_…` identifier.
pub fn tool_call_id() -> String {
    new_id("tool")
}
