//! Connection-token issuer/verifier — out of scope per spec §1 ("external
//! collaborator, treated as interface only"). `TokenBroker` (§2.2) is the
//! in-scope thin facade the admission controller actually calls; it owns a
//! `ConnectionTokenIssuer` trait object so the concrete signing scheme stays
//! swappable without touching admission logic.
//!
//! The concrete implementation here is a JWT, grounded on the teacher's
//! `auth/mod.rs` (`jsonwebtoken` encode/decode of a `Claims` struct) — with
//! the subject set to the connection record id and the report URL carried
//! in the payload, per §3/§4.1.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload embedded in a connection token beyond the bare subject — today
/// just the report URL (§3 `reportUrl`, §9 JWT payload decoding note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    #[serde(rename = "reportUrl")]
    pub report_url: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: Uuid,
    pub expires: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenVerification {
    pub ok: bool,
    pub subject: Option<Uuid>,
    pub payload: Option<TokenPayload>,
    pub reason: Option<String>,
}

#[async_trait]
pub trait ConnectionTokenIssuer: Send + Sync {
    async fn issue(&self, subject: Uuid, payload: TokenPayload) -> IssuedToken;
    async fn verify(&self, token: &str) -> TokenVerification;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    jti: Uuid,
    exp: i64,
    iat: i64,
    #[serde(rename = "reportUrl")]
    report_url: String,
}

/// JWT-backed connection-token issuer. Tokens expire `ttl_secs` after
/// issuance (60s default per §5).
pub struct JwtTokenIssuer {
    secret: String,
    ttl_secs: i64,
}

impl JwtTokenIssuer {
    pub fn new(secret: impl Into<String>, ttl_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
        }
    }
}

#[async_trait]
impl ConnectionTokenIssuer for JwtTokenIssuer {
    async fn issue(&self, subject: Uuid, payload: TokenPayload) -> IssuedToken {
        let now = Utc::now();
        let expires = now + Duration::seconds(self.ttl_secs);
        let token_id = Uuid::new_v4();

        let claims = Claims {
            sub: subject.to_string(),
            jti: token_id,
            exp: expires.timestamp(),
            iat: now.timestamp(),
            report_url: payload.report_url,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("encoding a connection token with a well-formed secret never fails");

        IssuedToken {
            token,
            token_id,
            expires,
        }
    }

    async fn verify(&self, token: &str) -> TokenVerification {
        let result = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        );

        match result {
            Ok(data) => match Uuid::parse_str(&data.claims.sub) {
                Ok(subject) => TokenVerification {
                    ok: true,
                    subject: Some(subject),
                    payload: Some(TokenPayload {
                        report_url: data.claims.report_url,
                    }),
                    reason: None,
                },
                Err(_) => TokenVerification {
                    ok: false,
                    subject: None,
                    payload: None,
                    reason: Some("Invalid token subject.".into()),
                },
            },
            Err(e) => TokenVerification {
                ok: false,
                subject: None,
                payload: None,
                reason: Some(format!("Invalid or expired token: {e}")),
            },
        }
    }
}

/// Thin facade the admission controller calls (§2.2). Keeping this as a
/// separate type from `ConnectionTokenIssuer` lets the admission code stay
/// oblivious to whichever concrete issuer is wired in.
pub struct TokenBroker {
    issuer: std::sync::Arc<dyn ConnectionTokenIssuer>,
}

impl TokenBroker {
    pub fn new(issuer: std::sync::Arc<dyn ConnectionTokenIssuer>) -> Self {
        Self { issuer }
    }

    pub async fn issue(&self, subject: Uuid, report_url: String) -> IssuedToken {
        self.issuer
            .issue(subject, TokenPayload { report_url })
            .await
    }

    pub async fn verify(&self, token: &str) -> TokenVerification {
        self.issuer.verify(token).await
    }
}
