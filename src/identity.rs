//! Identity provider — out of scope per spec §1 ("external collaborator,
//! treated as interface only"). This module defines the contract the
//! admission controller depends on:
//!
//! - `VerifyIdentity(token) -> {ok, clientId, reason}`
//! - `GetClient(clientId) -> descriptor | absent`
//!
//! and ships two concrete adapters: an in-memory double for tests and the
//! standalone binary, and an HTTP adapter for wiring to a real identity
//! service (grounded on the teacher's outbound `reqwest` usage in
//! `handlers/giphy.rs` and `handlers/link_preview.rs`).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of `VerifyIdentity`.
#[derive(Debug, Clone)]
pub struct IdentityVerification {
    pub ok: bool,
    pub client_id: Option<String>,
    pub reason: Option<String>,
}

impl IdentityVerification {
    pub fn accepted(client_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            client_id: Some(client_id.into()),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            client_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// Descriptor returned by `GetClient`. Only the fields cleanup (§4.6) and
/// admission (§4.1) actually consult are modeled; a real identity provider
/// is free to carry more.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub client_id: String,
    /// Used by cleanup (§4.6): if this does not start with `"stopped"`,
    /// cleanup advises the identity provider that the client's state is
    /// now unknown.
    pub state: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_identity(&self, token: &str) -> IdentityVerification;
    async fn get_client(&self, client_id: &str) -> Option<ClientDescriptor>;
}

/// In-memory identity provider. Useful for the standalone binary and for
/// tests; tokens map directly to client ids and descriptors are mutable so
/// tests can observe the advisory `state := "unknown"` write from cleanup.
#[derive(Default)]
pub struct InMemoryIdentityProvider {
    tokens: RwLock<HashMap<String, String>>,
    clients: RwLock<HashMap<String, ClientDescriptor>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, client_id: impl Into<String>) {
        let client_id = client_id.into();
        self.tokens.write().unwrap().insert(token.into(), client_id.clone());
        self.clients
            .write()
            .unwrap()
            .entry(client_id.clone())
            .or_insert(ClientDescriptor {
                client_id,
                state: "active".to_string(),
            });
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn verify_identity(&self, token: &str) -> IdentityVerification {
        match self.tokens.read().unwrap().get(token) {
            Some(client_id) => IdentityVerification::accepted(client_id.clone()),
            None => IdentityVerification::rejected("Identity token not recognized."),
        }
    }

    async fn get_client(&self, client_id: &str) -> Option<ClientDescriptor> {
        self.clients.read().unwrap().get(client_id).cloned()
    }
}

/// HTTP-backed identity provider for production deployments: delegates to
/// an external identity service over `reqwest`, the same client library the
/// teacher uses for its own outbound calls.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct VerifyResponse {
    ok: bool,
    #[serde(rename = "clientId")]
    client_id: Option<String>,
    reason: Option<String>,
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify_identity(&self, token: &str) -> IdentityVerification {
        let url = format!("{}/verify", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .send()
            .await;

        match resp {
            Ok(r) => match r.json::<VerifyResponse>().await {
                Ok(v) => IdentityVerification {
                    ok: v.ok,
                    client_id: v.client_id,
                    reason: v.reason,
                },
                Err(e) => IdentityVerification::rejected(format!("malformed identity response: {e}")),
            },
            Err(e) => IdentityVerification::rejected(format!("identity provider unreachable: {e}")),
        }
    }

    async fn get_client(&self, client_id: &str) -> Option<ClientDescriptor> {
        let url = format!(
            "{}/clients/{}",
            self.base_url.trim_end_matches('/'),
            client_id
        );
        self.client
            .get(&url)
            .send()
            .await
            .ok()?
            .json::<ClientDescriptor>()
            .await
            .ok()
    }
}
