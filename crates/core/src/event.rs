//! The AG-UI event union: sixteen wire variants plus an `Unknown` catch-all
//! for tags this protocol version does not recognise.
//!
//! Wire shape: a JSON object with an `eventType` discriminator in
//! SCREAMING_SNAKE_CASE, camelCase payload fields, and an optional
//! `timestampMs` (milliseconds since epoch) on every variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ValidationError, ValidationErrorKind};
use crate::patch::JsonPatchOp;
use crate::types::{Message, Role};

/// Discriminator for [`Event`] variants, used as handler-registry and
/// subscription keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    RunStarted,
    RunFinished,
    RunError,
    StepStarted,
    StepFinished,
    TextMessageStart,
    TextMessageContent,
    TextMessageEnd,
    ToolCallStart,
    ToolCallArgs,
    ToolCallEnd,
    StateSnapshot,
    StateDelta,
    MessagesSnapshot,
    Raw,
    Custom,
    /// A tag outside the known set.  Never produced for known tags.
    Unknown,
}

impl EventType {
    /// The wire tag, or `None` for [`EventType::Unknown`].
    pub fn as_tag(self) -> Option<&'static str> {
        Some(match self {
            EventType::RunStarted => "RUN_STARTED",
            EventType::RunFinished => "RUN_FINISHED",
            EventType::RunError => "RUN_ERROR",
            EventType::StepStarted => "STEP_STARTED",
            EventType::StepFinished => "STEP_FINISHED",
            EventType::TextMessageStart => "TEXT_MESSAGE_START",
            EventType::TextMessageContent => "TEXT_MESSAGE_CONTENT",
            EventType::TextMessageEnd => "TEXT_MESSAGE_END",
            EventType::ToolCallStart => "TOOL_CALL_START",
            EventType::ToolCallArgs => "TOOL_CALL_ARGS",
            EventType::ToolCallEnd => "TOOL_CALL_END",
            EventType::StateSnapshot => "STATE_SNAPSHOT",
            EventType::StateDelta => "STATE_DELTA",
            EventType::MessagesSnapshot => "MESSAGES_SNAPSHOT",
            EventType::Raw => "RAW",
            EventType::Custom => "CUSTOM",
            EventType::Unknown => return None,
        })
    }

    /// Map a wire tag to its known type.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "RUN_STARTED" => EventType::RunStarted,
            "RUN_FINISHED" => EventType::RunFinished,
            "RUN_ERROR" => EventType::RunError,
            "STEP_STARTED" => EventType::StepStarted,
            "STEP_FINISHED" => EventType::StepFinished,
            "TEXT_MESSAGE_START" => EventType::TextMessageStart,
            "TEXT_MESSAGE_CONTENT" => EventType::TextMessageContent,
            "TEXT_MESSAGE_END" => EventType::TextMessageEnd,
            "TOOL_CALL_START" => EventType::ToolCallStart,
            "TOOL_CALL_ARGS" => EventType::ToolCallArgs,
            "TOOL_CALL_END" => EventType::ToolCallEnd,
            "STATE_SNAPSHOT" => EventType::StateSnapshot,
            "STATE_DELTA" => EventType::StateDelta,
            "MESSAGES_SNAPSHOT" => EventType::MessagesSnapshot,
            "RAW" => EventType::Raw,
            "CUSTOM" => EventType::Custom,
            _ => return None,
        })
    }
}

/// One event on the protocol wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    RunStarted {
        thread_id: String,
        run_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    RunFinished {
        thread_id: String,
        run_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    RunError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        run_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    StepStarted {
        step_name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    StepFinished {
        step_name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    TextMessageStart {
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        role: Option<Role>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    TextMessageContent {
        message_id: String,
        delta: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    TextMessageEnd {
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        parent_message_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallArgs {
        tool_call_id: String,
        delta: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallEnd {
        tool_call_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    StateSnapshot {
        snapshot: Value,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    StateDelta {
        ops: Vec<JsonPatchOp>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    MessagesSnapshot {
        messages: Vec<Message>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    Raw {
        payload: Value,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        source: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    #[serde(rename_all = "camelCase")]
    Custom {
        name: String,
        value: Value,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp_ms: Option<i64>,
    },

    /// An event whose `eventType` is outside the known set.  Produced only
    /// by the decoder; always fails [`Event::validate`] and is never
    /// remapped to a known variant.
    #[serde(skip)]
    Unknown {
        event_type: String,
        /// The full original object, preserved for re-encoding.
        payload: Value,
    },
}

impl Event {
    /// The discriminator of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            Event::RunStarted { .. } => EventType::RunStarted,
            Event::RunFinished { .. } => EventType::RunFinished,
            Event::RunError { .. } => EventType::RunError,
            Event::StepStarted { .. } => EventType::StepStarted,
            Event::StepFinished { .. } => EventType::StepFinished,
            Event::TextMessageStart { .. } => EventType::TextMessageStart,
            Event::TextMessageContent { .. } => EventType::TextMessageContent,
            Event::TextMessageEnd { .. } => EventType::TextMessageEnd,
            Event::ToolCallStart { .. } => EventType::ToolCallStart,
            Event::ToolCallArgs { .. } => EventType::ToolCallArgs,
            Event::ToolCallEnd { .. } => EventType::ToolCallEnd,
            Event::StateSnapshot { .. } => EventType::StateSnapshot,
            Event::StateDelta { .. } => EventType::StateDelta,
            Event::MessagesSnapshot { .. } => EventType::MessagesSnapshot,
            Event::Raw { .. } => EventType::Raw,
            Event::Custom { .. } => EventType::Custom,
            Event::Unknown { .. } => EventType::Unknown,
        }
    }

    /// The event timestamp in epoch milliseconds, when present.
    pub fn timestamp_ms(&self) -> Option<i64> {
        match self {
            Event::RunStarted { timestamp_ms, .. }
            | Event::RunFinished { timestamp_ms, .. }
            | Event::RunError { timestamp_ms, .. }
            | Event::StepStarted { timestamp_ms, .. }
            | Event::StepFinished { timestamp_ms, .. }
            | Event::TextMessageStart { timestamp_ms, .. }
            | Event::TextMessageContent { timestamp_ms, .. }
            | Event::TextMessageEnd { timestamp_ms, .. }
            | Event::ToolCallStart { timestamp_ms, .. }
            | Event::ToolCallArgs { timestamp_ms, .. }
            | Event::ToolCallEnd { timestamp_ms, .. }
            | Event::StateSnapshot { timestamp_ms, .. }
            | Event::StateDelta { timestamp_ms, .. }
            | Event::MessagesSnapshot { timestamp_ms, .. }
            | Event::Raw { timestamp_ms, .. }
            | Event::Custom { timestamp_ms, .. } => *timestamp_ms,
            Event::Unknown { .. } => None,
        }
    }

    /// Set the timestamp, returning the event (builder style).
    pub fn with_timestamp_ms(mut self, ts: i64) -> Self {
        match &mut self {
            Event::RunStarted { timestamp_ms, .. }
            | Event::RunFinished { timestamp_ms, .. }
            | Event::RunError { timestamp_ms, .. }
            | Event::StepStarted { timestamp_ms, .. }
            | Event::StepFinished { timestamp_ms, .. }
            | Event::TextMessageStart { timestamp_ms, .. }
            | Event::TextMessageContent { timestamp_ms, .. }
            | Event::TextMessageEnd { timestamp_ms, .. }
            | Event::ToolCallStart { timestamp_ms, .. }
            | Event::ToolCallArgs { timestamp_ms, .. }
            | Event::ToolCallEnd { timestamp_ms, .. }
            | Event::StateSnapshot { timestamp_ms, .. }
            | Event::StateDelta { timestamp_ms, .. }
            | Event::MessagesSnapshot { timestamp_ms, .. }
            | Event::Raw { timestamp_ms, .. }
            | Event::Custom { timestamp_ms, .. } => *timestamp_ms = Some(ts),
            Event::Unknown { .. } => {}
        }
        self
    }

    // ── Constructors ─────────────────────────────────────────────────

    pub fn run_started(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Event::RunStarted {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            timestamp_ms: None,
        }
    }

    pub fn run_finished(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Event::RunFinished {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            result: None,
            timestamp_ms: None,
        }
    }

    pub fn run_error(message: impl Into<String>) -> Self {
        Event::RunError {
            message: message.into(),
            code: None,
            run_id: None,
            timestamp_ms: None,
        }
    }

    pub fn step_started(step_name: impl Into<String>) -> Self {
        Event::StepStarted {
            step_name: step_name.into(),
            timestamp_ms: None,
        }
    }

    pub fn step_finished(step_name: impl Into<String>) -> Self {
        Event::StepFinished {
            step_name: step_name.into(),
            timestamp_ms: None,
        }
    }

    pub fn text_message_start(message_id: impl Into<String>) -> Self {
        Event::TextMessageStart {
            message_id: message_id.into(),
            role: Some(Role::Assistant),
            timestamp_ms: None,
        }
    }

    pub fn text_message_content(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Event::TextMessageContent {
            message_id: message_id.into(),
            delta: delta.into(),
            timestamp_ms: None,
        }
    }

    pub fn text_message_end(message_id: impl Into<String>) -> Self {
        Event::TextMessageEnd {
            message_id: message_id.into(),
            timestamp_ms: None,
        }
    }

    pub fn tool_call_start(
        tool_call_id: impl Into<String>,
        tool_call_name: impl Into<String>,
    ) -> Self {
        Event::ToolCallStart {
            tool_call_id: tool_call_id.into(),
            tool_call_name: tool_call_name.into(),
            parent_message_id: None,
            timestamp_ms: None,
        }
    }

    pub fn tool_call_args(tool_call_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Event::ToolCallArgs {
            tool_call_id: tool_call_id.into(),
            delta: delta.into(),
            timestamp_ms: None,
        }
    }

    pub fn tool_call_end(tool_call_id: impl Into<String>) -> Self {
        Event::ToolCallEnd {
            tool_call_id: tool_call_id.into(),
            timestamp_ms: None,
        }
    }

    pub fn state_snapshot(snapshot: Value) -> Self {
        Event::StateSnapshot {
            snapshot,
            timestamp_ms: None,
        }
    }

    pub fn state_delta(ops: Vec<JsonPatchOp>) -> Self {
        Event::StateDelta {
            ops,
            timestamp_ms: None,
        }
    }

    pub fn messages_snapshot(messages: Vec<Message>) -> Self {
        Event::MessagesSnapshot {
            messages,
            timestamp_ms: None,
        }
    }

    pub fn custom(name: impl Into<String>, value: Value) -> Self {
        Event::Custom {
            name: name.into(),
            value,
            timestamp_ms: None,
        }
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Per-variant field validation: required IDs non-empty, deltas
    /// non-empty, patch ops well-formed, timestamps non-negative.
    /// Lifecycle ordering is the sequence validator's concern, not this
    /// method's.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(ts) = self.timestamp_ms() {
            if ts < 0 {
                return Err(ValidationError::new(
                    ValidationErrorKind::InvalidValue,
                    "timestampMs",
                    format!("timestamp must be non-negative, got {ts}"),
                ));
            }
        }

        match self {
            Event::RunStarted {
                thread_id, run_id, ..
            } => {
                require_non_empty("threadId", thread_id)?;
                require_non_empty("runId", run_id)
            }
            Event::RunFinished {
                thread_id, run_id, ..
            } => {
                require_non_empty("threadId", thread_id)?;
                require_non_empty("runId", run_id)
            }
            Event::RunError { message, .. } => require_non_empty("message", message),
            Event::StepStarted { step_name, .. } | Event::StepFinished { step_name, .. } => {
                require_non_empty("stepName", step_name)
            }
            Event::TextMessageStart { message_id, .. } => require_non_empty("messageId", message_id),
            Event::TextMessageContent {
                message_id, delta, ..
            } => {
                require_non_empty("messageId", message_id)?;
                if delta.is_empty() {
                    return Err(ValidationError::new(
                        ValidationErrorKind::EmptyField,
                        "delta",
                        "text message delta must not be empty",
                    ));
                }
                Ok(())
            }
            Event::TextMessageEnd { message_id, .. } => require_non_empty("messageId", message_id),
            Event::ToolCallStart {
                tool_call_id,
                tool_call_name,
                ..
            } => {
                require_non_empty("toolCallId", tool_call_id)?;
                require_non_empty("toolCallName", tool_call_name)
            }
            Event::ToolCallArgs {
                tool_call_id, delta, ..
            } => {
                require_non_empty("toolCallId", tool_call_id)?;
                if delta.is_empty() {
                    return Err(ValidationError::new(
                        ValidationErrorKind::EmptyField,
                        "delta",
                        "tool call argument delta must not be empty",
                    ));
                }
                Ok(())
            }
            Event::ToolCallEnd { tool_call_id, .. } => require_non_empty("toolCallId", tool_call_id),
            Event::StateSnapshot { .. } => Ok(()),
            Event::StateDelta { ops, .. } => {
                if ops.is_empty() {
                    return Err(ValidationError::new(
                        ValidationErrorKind::EmptyField,
                        "ops",
                        "state delta must carry at least one operation",
                    ));
                }
                for op in ops {
                    op.validate()?;
                }
                Ok(())
            }
            Event::MessagesSnapshot { messages, .. } => {
                for msg in messages {
                    require_non_empty("messages[].id", &msg.id)?;
                }
                Ok(())
            }
            Event::Raw { .. } => Ok(()),
            Event::Custom { name, .. } => require_non_empty("name", name),
            Event::Unknown { event_type, .. } => Err(ValidationError::new(
                ValidationErrorKind::UnknownEvent,
                "eventType",
                format!("unknown event tag `{event_type}`"),
            )),
        }
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(
            ValidationErrorKind::EmptyField,
            field,
            format!("{field} must not be empty"),
        ));
    }
    Ok(())
}
