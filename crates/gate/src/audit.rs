//! Audit reporting for gate decisions.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Whether the gate let the connection through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Accepted,
    Rejected,
}

/// One gate decision, accepted or rejected.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event: AuditOutcome,
    pub client_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Injected destination for audit records.  Implementations must not
/// block; the gate calls this inline on the accept path.
pub trait AuditSink: Send + Sync {
    fn report(&self, record: &AuditRecord);
}

/// Default sink: structured log lines.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn report(&self, record: &AuditRecord) {
        match record.event {
            AuditOutcome::Accepted => tracing::info!(
                client_addr = %record.client_addr,
                subject = record.subject.as_deref().unwrap_or("-"),
                "connection accepted"
            ),
            AuditOutcome::Rejected => tracing::warn!(
                client_addr = %record.client_addr,
                reason = record.reason.as_deref().unwrap_or("-"),
                "connection rejected"
            ),
        }
    }
}
