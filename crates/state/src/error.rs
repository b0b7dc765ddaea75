//! State store errors.

use agui_core::pointer::PointerError;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("path `{0}` not found")]
    NotFound(String),

    #[error("invalid pointer: {0}")]
    Path(#[from] PointerError),

    /// An atomic patch aborted; state is unchanged.
    #[error("patch aborted at op {at}: {reason}")]
    Patch { at: usize, reason: String },

    #[error("subscription `{0}` not found")]
    SubscriptionNotFound(String),

    #[error("transaction already completed")]
    TransactionDone,
}
