//! Core wire model for the AG-UI protocol.
//!
//! Defines the typed event union exchanged between agents and user-facing
//! applications, the message/role model, JSON Pointer and JSON Patch
//! primitives, the canonical JSON / binary codecs, and the bounded queue
//! primitive shared by the state store and transport layers.

pub mod codec;
pub mod error;
pub mod event;
pub mod id;
pub mod patch;
pub mod pointer;
pub mod queue;
pub mod types;

pub use codec::{decode_binary, decode_json, encode_binary, encode_json};
pub use error::{DecodeError, ValidationError, ValidationErrorKind};
pub use event::{Event, EventType};
pub use patch::{JsonPatchOp, PatchOpKind};
pub use queue::{BoundedQueue, OverflowPolicy, PushOutcome, QueueError};
pub use types::{Message, Role, ToolCall};
