//! Bearer-token validation.
//!
//! Two validators ship with the gate: HS256 JWTs with standard claim
//! checks (`exp`, `nbf`, `iss`, `aud`), and a constant-time static token
//! for pre-shared-secret deployments.  Both compare secrets through a
//! SHA-256 digest or an HMAC so no comparison leaks timing.

use std::net::IpAddr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Identity attached to a connection once the gate approves it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    /// The token's `sub` claim (or the validator's fixed subject).
    pub subject: String,
    /// The full decoded claim set.
    pub claims: Value,
    pub client_addr: IpAddr,
    pub established_at: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported algorithm `{0}`")]
    UnsupportedAlgorithm(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("issuer mismatch")]
    WrongIssuer,

    #[error("audience mismatch")]
    WrongAudience,

    #[error("invalid token")]
    Invalid,
}

/// Pluggable token validation.  The gate calls this with the raw bearer
/// token when `require_auth` is on.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str, client_addr: IpAddr) -> Result<AuthContext, AuthError>;
}

/// HS256 JWT validation with standard claim checks.
pub struct HmacJwtValidator {
    secret: Vec<u8>,
    expected_issuer: Option<String>,
    expected_audience: Option<String>,
    /// Clock-skew allowance, seconds.
    leeway_secs: i64,
}

impl HmacJwtValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            expected_issuer: None,
            expected_audience: None,
            leeway_secs: 30,
        }
    }

    pub fn issuer(mut self, iss: impl Into<String>) -> Self {
        self.expected_issuer = Some(iss.into());
        self
    }

    pub fn audience(mut self, aud: impl Into<String>) -> Self {
        self.expected_audience = Some(aud.into());
        self
    }

    pub fn leeway_secs(mut self, secs: i64) -> Self {
        self.leeway_secs = secs;
        self
    }

    fn decode_segment(segment: &str) -> Result<Vec<u8>, AuthError> {
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| AuthError::Malformed(e.to_string()))
    }
}

impl TokenValidator for HmacJwtValidator {
    fn validate(&self, token: &str, client_addr: IpAddr) -> Result<AuthContext, AuthError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, sig_b64) = match (parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(c), Some(s)) if parts.next().is_none() => (h, c, s),
            _ => return Err(AuthError::Malformed("expected three segments".into())),
        };

        let header: Value = serde_json::from_slice(&Self::decode_segment(header_b64)?)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        let alg = header.get("alg").and_then(Value::as_str).unwrap_or("");
        if alg != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm(alg.to_string()));
        }

        // Verify the signature over `header.claims` before trusting any
        // claim.
        let signature = Self::decode_segment(sig_b64)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Value = serde_json::from_slice(&Self::decode_segment(claims_b64)?)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        let now = Utc::now().timestamp();

        // exp is mandatory; a token that cannot expire is rejected.
        let exp = claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| AuthError::Malformed("missing exp claim".into()))?;
        if now > exp + self.leeway_secs {
            return Err(AuthError::Expired);
        }

        if let Some(nbf) = claims.get("nbf").and_then(Value::as_i64) {
            if now + self.leeway_secs < nbf {
                return Err(AuthError::NotYetValid);
            }
        }

        if let Some(expected) = &self.expected_issuer {
            let iss = claims.get("iss").and_then(Value::as_str).unwrap_or("");
            if iss != expected {
                return Err(AuthError::WrongIssuer);
            }
        }

        if let Some(expected) = &self.expected_audience {
            let matched = match claims.get("aud") {
                Some(Value::String(aud)) => aud == expected,
                Some(Value::Array(auds)) => {
                    auds.iter().any(|a| a.as_str() == Some(expected.as_str()))
                }
                _ => false,
            };
            if !matched {
                return Err(AuthError::WrongAudience);
            }
        }

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(AuthContext {
            subject,
            claims,
            client_addr,
            established_at: Utc::now(),
        })
    }
}

/// Pre-shared token validation.  Hashing both sides to SHA-256 digests
/// normalises lengths so the constant-time comparison never leaks the
/// token length.
pub struct StaticTokenValidator {
    expected_digest: [u8; 32],
    subject: String,
}

impl StaticTokenValidator {
    pub fn new(token: &str, subject: impl Into<String>) -> Self {
        Self {
            expected_digest: Sha256::digest(token.as_bytes()).into(),
            subject: subject.into(),
        }
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str, client_addr: IpAddr) -> Result<AuthContext, AuthError> {
        let provided = Sha256::digest(token.as_bytes());
        if !bool::from(provided.ct_eq(&self.expected_digest)) {
            return Err(AuthError::Invalid);
        }
        Ok(AuthContext {
            subject: self.subject.clone(),
            claims: Value::Null,
            client_addr,
            established_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    /// Mint an HS256 token for tests.
    fn sign(secret: &[u8], claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{header}.{body}.{sig}")
    }

    #[test]
    fn valid_token_yields_auth_context() {
        let secret = b"test-secret";
        let token = sign(
            secret,
            &serde_json::json!({
                "sub": "agent-7",
                "iss": "agui",
                "aud": "transport",
                "exp": Utc::now().timestamp() + 600,
            }),
        );
        let validator = HmacJwtValidator::new(&secret[..])
            .issuer("agui")
            .audience("transport");
        let ctx = validator.validate(&token, addr()).unwrap();
        assert_eq!(ctx.subject, "agent-7");
        assert_eq!(ctx.claims["iss"], "agui");
    }

    #[test]
    fn expired_token_rejected() {
        let secret = b"test-secret";
        let token = sign(
            secret,
            &serde_json::json!({"exp": Utc::now().timestamp() - 3600}),
        );
        let validator = HmacJwtValidator::new(&secret[..]).leeway_secs(0);
        assert_eq!(validator.validate(&token, addr()), Err(AuthError::Expired));
    }

    #[test]
    fn nbf_in_the_future_rejected() {
        let secret = b"test-secret";
        let now = Utc::now().timestamp();
        let token = sign(
            secret,
            &serde_json::json!({"exp": now + 600, "nbf": now + 300}),
        );
        let validator = HmacJwtValidator::new(&secret[..]).leeway_secs(0);
        assert_eq!(
            validator.validate(&token, addr()),
            Err(AuthError::NotYetValid)
        );
    }

    #[test]
    fn tampered_signature_rejected() {
        let secret = b"test-secret";
        let token = sign(
            secret,
            &serde_json::json!({"exp": Utc::now().timestamp() + 600}),
        );
        let forged = sign(
            b"other-secret",
            &serde_json::json!({"exp": Utc::now().timestamp() + 600}),
        );
        // Splice the forged signature onto the honest body.
        let tampered = format!(
            "{}.{}",
            token.rsplit_once('.').unwrap().0,
            forged.rsplit('.').next().unwrap()
        );
        let validator = HmacJwtValidator::new(&secret[..]);
        assert_eq!(
            validator.validate(&tampered, addr()),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn wrong_issuer_and_audience_rejected() {
        let secret = b"test-secret";
        let token = sign(
            secret,
            &serde_json::json!({
                "exp": Utc::now().timestamp() + 600,
                "iss": "someone-else",
                "aud": ["other"],
            }),
        );
        let validator = HmacJwtValidator::new(&secret[..]).issuer("agui");
        assert_eq!(
            validator.validate(&token, addr()),
            Err(AuthError::WrongIssuer)
        );

        let validator = HmacJwtValidator::new(&secret[..]).audience("transport");
        assert_eq!(
            validator.validate(&token, addr()),
            Err(AuthError::WrongAudience)
        );
    }

    #[test]
    fn audience_array_matches_any_entry() {
        let secret = b"test-secret";
        let token = sign(
            secret,
            &serde_json::json!({
                "exp": Utc::now().timestamp() + 600,
                "aud": ["dashboard", "transport"],
            }),
        );
        let validator = HmacJwtValidator::new(&secret[..]).audience("transport");
        assert!(validator.validate(&token, addr()).is_ok());
    }

    #[test]
    fn missing_exp_is_malformed() {
        let secret = b"test-secret";
        let token = sign(secret, &serde_json::json!({"sub": "x"}));
        let validator = HmacJwtValidator::new(&secret[..]);
        assert!(matches!(
            validator.validate(&token, addr()),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn non_hs256_algorithm_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let body = URL_SAFE_NO_PAD.encode(br#"{"exp": 9999999999}"#);
        let token = format!("{header}.{body}.");
        let validator = HmacJwtValidator::new(b"secret".to_vec());
        assert!(matches!(
            validator.validate(&token, addr()),
            Err(AuthError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn static_token_round_trip() {
        let validator = StaticTokenValidator::new("hunter2", "ops");
        assert_eq!(validator.validate("hunter2", addr()).unwrap().subject, "ops");
        assert_eq!(
            validator.validate("hunter3", addr()),
            Err(AuthError::Invalid)
        );
    }
}
