//! Capability identifiers exposed by the connection provider's HTTP surface
//! (§6). The authorization middleware that populates a caller's capability
//! set is an external collaborator (supplied by `req.authenticated.
//! functions` in the source system); in production that middleware is
//! swapped in ahead of this crate's routes. For standalone operation a
//! minimal header-based stand-in is provided below, grounded on the
//! teacher's `AuthUser: FromRequestParts` extractor in `auth/mod.rs`.

use std::collections::HashSet;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

/// Baseline capability granting access to the provider's HTTP API at all.
pub const API: &str = "api";

/// Capability granting read access to connection records.
pub const CONNECTION: &str = "connection";

/// Capability required to send an outbound frame via
/// `POST /:connectionId/send` (§4.7).
pub const CONNECTION_SEND: &str = "connection.send";

/// The caller's resolved capability set. Populated here from the
/// `X-Connection-Capabilities` header (comma-separated); a production
/// deployment replaces this extractor's source, not the callers that
/// depend on it.
pub struct Capabilities(HashSet<String>);

impl Capabilities {
    pub fn has(&self, capability: &str) -> bool {
        self.0.contains(capability)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Capabilities
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let set = parts
            .headers
            .get("X-Connection-Capabilities")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        Ok(Capabilities(set))
    }
}
