//! Sequence-rule violation reporting.

use agui_core::EventType;

/// What protocol rule a violating event broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceErrorKind {
    /// End/content event for an ID that was never started.
    OrphanEnd,
    /// Start event for an ID that is already active.
    DuplicateStart,
    /// Start event for an ID that already finished.
    AlreadyFinished,
    /// Lifecycle event with no enclosing active run.
    NoActiveRun,
    /// Step finished out of LIFO order.
    NonLifoStep,
    /// A run finished while messages or tools were still open.
    UnterminatedChild,
    /// Concatenated tool-call argument deltas do not parse as JSON.
    InvalidToolArgs,
    /// Required ID missing or empty under the active policy.
    MissingId,
    /// Required timestamp missing under the active policy.
    MissingTimestamp,
    /// Per-variant field validation failed.
    InvalidField,
    /// The event tag is outside the known set.
    UnknownEvent,
}

impl SequenceErrorKind {
    /// Stable kebab-case name used in logs and error payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            SequenceErrorKind::OrphanEnd => "orphan-end",
            SequenceErrorKind::DuplicateStart => "duplicate-start",
            SequenceErrorKind::AlreadyFinished => "already-finished",
            SequenceErrorKind::NoActiveRun => "no-active-run",
            SequenceErrorKind::NonLifoStep => "non-lifo-step",
            SequenceErrorKind::UnterminatedChild => "unterminated-child",
            SequenceErrorKind::InvalidToolArgs => "invalid-tool-args",
            SequenceErrorKind::MissingId => "missing-id",
            SequenceErrorKind::MissingTimestamp => "missing-timestamp",
            SequenceErrorKind::InvalidField => "invalid-field",
            SequenceErrorKind::UnknownEvent => "unknown-event",
        }
    }
}

/// A single protocol violation observed by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceError {
    pub kind: SequenceErrorKind,
    /// The event type that triggered the violation.
    pub event_type: EventType,
    /// The run/message/tool ID involved, when there is one.
    pub id: Option<String>,
    pub detail: String,
    /// Fatal violations reset the affected run's bookkeeping.
    pub fatal: bool,
}

impl SequenceError {
    pub fn new(
        kind: SequenceErrorKind,
        event_type: EventType,
        id: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            event_type,
            id,
            detail: detail.into(),
            fatal: false,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl std::fmt::Display for SequenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {:?}", self.kind.as_str(), self.event_type)?;
        if let Some(id) = &self.id {
            write!(f, " ({id})")?;
        }
        write!(f, ": {}", self.detail)
    }
}

impl std::error::Error for SequenceError {}
