//! The gate itself: the ordered check sequence applied to each upgrade.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::audit::{AuditOutcome, AuditRecord, AuditSink, TracingAuditSink};
use crate::auth::{AuthContext, AuthError, TokenValidator};
use crate::config::{parse_tls_version, SecurityConfig};
use crate::limiter::{RateLimiterMap, TokenBucket};

/// What the gate needs to know about an upgrade attempt.  Hosts build
/// this from their HTTP layer (see [`crate::axum_gate`]).
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Whether the request arrived over TLS.
    pub secure: bool,
    /// Negotiated TLS version, when the host knows it (e.g. `"1.3"`).
    pub tls_version: Option<String>,
    pub origin: Option<String>,
    pub client_addr: IpAddr,
    pub bearer_token: Option<String>,
}

/// Why an upgrade was refused.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    #[error("TLS is required")]
    TlsRequired,

    #[error("TLS version {0} is below the configured minimum")]
    TlsVersionTooOld(String),

    #[error("origin `{0}` is not allowed")]
    OriginForbidden(String),

    #[error("connection limit reached")]
    ConnectionLimit,

    #[error("rate limited")]
    GlobalRateLimited,

    #[error("client rate limited")]
    ClientRateLimited,

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
}

impl GateRejection {
    /// HTTP status the host should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GateRejection::TlsRequired
            | GateRejection::TlsVersionTooOld(_)
            | GateRejection::OriginForbidden(_) => 403,
            GateRejection::ConnectionLimit => 503,
            GateRejection::GlobalRateLimited | GateRejection::ClientRateLimited => 429,
            GateRejection::Auth(_) => 401,
        }
    }
}

/// An approved upgrade.  Holds the connection slot: dropping this (or
/// the connection that owns it) releases the active-connection count.
#[derive(Debug)]
pub struct GateApproval {
    pub auth: Option<AuthContext>,
    _slot: ConnectionSlot,
}

/// RAII active-connection slot.
#[derive(Debug)]
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The inbound security gate.  Stateless across requests except for the
/// rate-limit buckets and the active-connection counter.
pub struct SecurityGate {
    config: SecurityConfig,
    global: Option<TokenBucket>,
    clients: RateLimiterMap,
    active: Arc<AtomicUsize>,
    validator: Option<Arc<dyn TokenValidator>>,
    audit: Arc<dyn AuditSink>,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig) -> Self {
        let global = (config.global_rate_limit > 0.0)
            .then(|| TokenBucket::new(config.global_rate_limit, config.global_rate_limit));
        let clients = RateLimiterMap::new(config.client_burst_size, config.client_rate_limit);
        Self {
            config,
            global,
            clients,
            active: Arc::new(AtomicUsize::new(0)),
            validator: None,
            audit: Arc::new(TracingAuditSink),
        }
    }

    /// Inject the bearer-token validator used when `require_auth` is on.
    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Replace the default tracing audit sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Connections currently holding a slot.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Drop idle per-client buckets.  Returns how many were removed.
    pub fn sweep_limiters(&self) -> usize {
        self.clients.sweep(self.config.limiter_ttl())
    }

    /// Run the full check sequence and audit the outcome.  On success
    /// the returned approval holds the connection slot until dropped.
    pub fn check(&self, request: &UpgradeRequest) -> Result<GateApproval, GateRejection> {
        let result = self.evaluate(request);
        let record = match &result {
            Ok(approval) => AuditRecord {
                event: AuditOutcome::Accepted,
                client_addr: request.client_addr.to_string(),
                subject: approval.auth.as_ref().map(|a| a.subject.clone()),
                reason: None,
                at: Utc::now(),
            },
            Err(rejection) => AuditRecord {
                event: AuditOutcome::Rejected,
                client_addr: request.client_addr.to_string(),
                subject: None,
                reason: Some(rejection.to_string()),
                at: Utc::now(),
            },
        };
        self.audit.report(&record);
        result
    }

    fn evaluate(&self, request: &UpgradeRequest) -> Result<GateApproval, GateRejection> {
        // 1. TLS requirement.
        if self.config.require_tls {
            if !request.secure {
                return Err(GateRejection::TlsRequired);
            }
            if let Some(version) = &request.tls_version {
                let negotiated = parse_tls_version(version).unwrap_or((0, 0));
                if negotiated < self.config.min_tls() {
                    return Err(GateRejection::TlsVersionTooOld(version.clone()));
                }
            }
        }

        // 2. Origin allowlist: exact match, never prefix.
        if self.config.strict_origin_check {
            let origin = request.origin.as_deref().unwrap_or("");
            if !self.config.allowed_origins.iter().any(|o| o == origin) {
                return Err(GateRejection::OriginForbidden(origin.to_string()));
            }
        }

        // 3. Connection cap.  The slot is reserved here and released by
        //    the approval's drop; a rejection below releases it at once.
        let reserved = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.config.max_connections).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(GateRejection::ConnectionLimit);
        }
        let slot = ConnectionSlot {
            active: self.active.clone(),
        };

        // 4. Global rate limit.
        if let Some(bucket) = &self.global {
            if !bucket.try_acquire() {
                return Err(GateRejection::GlobalRateLimited);
            }
        }

        // 5. Per-client rate limit.
        if self.config.client_rate_limit > 0.0 {
            let bucket = self.clients.get_or_create(request.client_addr);
            if !bucket.try_acquire() {
                return Err(GateRejection::ClientRateLimited);
            }
        }

        // 6. Authentication.
        let auth = if self.config.require_auth {
            let token = request
                .bearer_token
                .as_deref()
                .ok_or(GateRejection::Auth(AuthError::MissingToken))?;
            let validator = self
                .validator
                .as_ref()
                .ok_or(GateRejection::Auth(AuthError::Invalid))?;
            Some(validator.validate(token, request.client_addr)?)
        } else {
            None
        };

        Ok(GateApproval { auth, _slot: slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenValidator;
    use parking_lot::Mutex;

    fn request() -> UpgradeRequest {
        UpgradeRequest {
            secure: true,
            tls_version: Some("1.3".into()),
            origin: Some("https://app.example.com".into()),
            client_addr: "10.0.0.1".parse().unwrap(),
            bearer_token: None,
        }
    }

    /// Audit sink capturing records for assertions.
    #[derive(Default)]
    struct CapturingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl AuditSink for CapturingSink {
        fn report(&self, record: &AuditRecord) {
            self.records.lock().push(record.clone());
        }
    }

    #[test]
    fn open_gate_accepts() {
        let gate = SecurityGate::new(SecurityConfig::default());
        let approval = gate.check(&request()).unwrap();
        assert!(approval.auth.is_none());
        assert_eq!(gate.active_connections(), 1);
        drop(approval);
        assert_eq!(gate.active_connections(), 0);
    }

    #[test]
    fn tls_requirement_rejects_plaintext_with_403() {
        let gate = SecurityGate::new(SecurityConfig {
            require_tls: true,
            ..SecurityConfig::default()
        });
        let mut req = request();
        req.secure = false;
        let rejection = gate.check(&req).unwrap_err();
        assert_eq!(rejection, GateRejection::TlsRequired);
        assert_eq!(rejection.status_code(), 403);
        // Nothing reserved on rejection.
        assert_eq!(gate.active_connections(), 0);
    }

    #[test]
    fn old_tls_version_rejected() {
        let gate = SecurityGate::new(SecurityConfig {
            require_tls: true,
            min_tls_version: "1.3".into(),
            ..SecurityConfig::default()
        });
        let mut req = request();
        req.tls_version = Some("1.2".into());
        assert!(matches!(
            gate.check(&req).unwrap_err(),
            GateRejection::TlsVersionTooOld(_)
        ));
    }

    #[test]
    fn origin_check_is_exact_match() {
        let gate = SecurityGate::new(SecurityConfig {
            strict_origin_check: true,
            allowed_origins: vec!["https://app.example.com".into()],
            ..SecurityConfig::default()
        });
        assert!(gate.check(&request()).is_ok());

        // Prefix extensions of an allowed origin do not pass.
        let mut req = request();
        req.origin = Some("https://app.example.com.evil.io".into());
        let rejection = gate.check(&req).unwrap_err();
        assert!(matches!(rejection, GateRejection::OriginForbidden(_)));
        assert_eq!(rejection.status_code(), 403);

        // So does a missing Origin header.
        let mut req = request();
        req.origin = None;
        assert!(gate.check(&req).is_err());
    }

    #[test]
    fn connection_cap_returns_503_and_frees_on_drop() {
        let gate = SecurityGate::new(SecurityConfig {
            max_connections: 2,
            ..SecurityConfig::default()
        });
        let first = gate.check(&request()).unwrap();
        let _second = gate.check(&request()).unwrap();
        let rejection = gate.check(&request()).unwrap_err();
        assert_eq!(rejection, GateRejection::ConnectionLimit);
        assert_eq!(rejection.status_code(), 503);

        drop(first);
        assert!(gate.check(&request()).is_ok());
    }

    #[test]
    fn client_rate_limit_returns_429() {
        let gate = SecurityGate::new(SecurityConfig {
            client_rate_limit: 1.0,
            client_burst_size: 2.0,
            global_rate_limit: 0.0, // isolate the per-client bucket
            ..SecurityConfig::default()
        });
        // Burst of two passes; the third is limited.
        let _a = gate.check(&request()).unwrap();
        let _b = gate.check(&request()).unwrap();
        let rejection = gate.check(&request()).unwrap_err();
        assert_eq!(rejection, GateRejection::ClientRateLimited);
        assert_eq!(rejection.status_code(), 429);

        // Another client address is unaffected.
        let mut other = request();
        other.client_addr = "10.0.0.2".parse().unwrap();
        assert!(gate.check(&other).is_ok());
    }

    #[test]
    fn auth_required_flows_through_validator() {
        let gate = SecurityGate::new(SecurityConfig {
            require_auth: true,
            ..SecurityConfig::default()
        })
        .with_validator(Arc::new(StaticTokenValidator::new("hunter2", "ops")));

        // Missing token.
        let rejection = gate.check(&request()).unwrap_err();
        assert_eq!(rejection, GateRejection::Auth(AuthError::MissingToken));
        assert_eq!(rejection.status_code(), 401);

        // Wrong token.
        let mut req = request();
        req.bearer_token = Some("wrong".into());
        assert!(matches!(
            gate.check(&req).unwrap_err(),
            GateRejection::Auth(_)
        ));

        // Right token: AuthContext attached.
        let mut req = request();
        req.bearer_token = Some("hunter2".into());
        let approval = gate.check(&req).unwrap();
        let auth = approval.auth.as_ref().unwrap();
        assert_eq!(auth.subject, "ops");
        assert_eq!(auth.client_addr, req.client_addr);
    }

    #[test]
    fn every_decision_is_audited() {
        let sink = Arc::new(CapturingSink::default());
        let gate = SecurityGate::new(SecurityConfig {
            require_tls: true,
            ..SecurityConfig::default()
        })
        .with_audit(sink.clone());

        let _ok = gate.check(&request()).unwrap();
        let mut bad = request();
        bad.secure = false;
        let _ = gate.check(&bad);

        let records = sink.records.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, AuditOutcome::Accepted);
        assert_eq!(records[1].event, AuditOutcome::Rejected);
        assert!(records[1].reason.as_deref().unwrap().contains("TLS"));
    }

    #[test]
    fn rejected_rate_limited_request_releases_its_slot() {
        let gate = SecurityGate::new(SecurityConfig {
            client_rate_limit: 1.0,
            client_burst_size: 1.0,
            ..SecurityConfig::default()
        });
        let _ok = gate.check(&request()).unwrap();
        let _ = gate.check(&request()).unwrap_err();
        // Only the accepted connection holds a slot.
        assert_eq!(gate.active_connections(), 1);
    }
}
