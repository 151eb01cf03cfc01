//! Sender (§4.7): the only path by which the provider writes frames to a
//! live socket. Grounded on the teacher's `ConnectionManager::send_to_user`
//! ownership-and-presence checks, generalized with the server-ownership
//! check required by I4 and the string-vs-JSON encoding distinction the
//! source got wrong (§9 open question 2 — fixed here: a string payload is
//! sent as-is, never re-encoded).

use std::sync::Arc;

use axum::extract::ws::Message;
use serde::Serialize;

use super::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    Failed(&'static str),
}

pub struct SendResult {
    pub status: SendOutcome,
    pub reason: Option<String>,
}

pub struct Sender {
    registry: Arc<Registry>,
    server_id: String,
}

impl Sender {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            server_id: String::new(),
        }
    }

    pub fn with_server_id(registry: Arc<Registry>, server_id: impl Into<String>) -> Self {
        Self {
            registry,
            server_id: server_id.into(),
        }
    }

    /// Serialize `payload` per §4.7: a plain string is sent verbatim; any
    /// other serializable value is JSON-encoded. The source conflated these
    /// two paths and always re-encoded, corrupting strings that were
    /// already the wire payload — that bug is not reproduced here.
    fn encode(payload: &OutboundPayload) -> String {
        match payload {
            OutboundPayload::Text(s) => s.clone(),
            OutboundPayload::Json(v) => v.to_string(),
        }
    }

    pub async fn send(&self, connection_id: uuid::Uuid, payload: OutboundPayload) -> SendResult {
        let record = match self.registry.find_by_id(connection_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return SendResult {
                    status: SendOutcome::Failed("not_found"),
                    reason: Some("No such connection.".into()),
                }
            }
            Err(_) => {
                return SendResult {
                    status: SendOutcome::Failed("store_error"),
                    reason: Some("No such connection.".into()),
                }
            }
        };

        if !record.alive || !record.open {
            return SendResult {
                status: SendOutcome::Failed("not_live"),
                reason: Some("Connection closed or client not live.".into()),
            };
        }

        if let Some(owner) = record.server_id.as_deref() {
            if owner != self.server_id {
                return SendResult {
                    status: SendOutcome::Failed("wrong_server"),
                    reason: Some(format!(
                        "Connection '{}' does not belong to this server ('{}').",
                        connection_id, self.server_id
                    )),
                };
            }
        }

        let Some(socket) = self.registry.get_socket(connection_id) else {
            return SendResult {
                status: SendOutcome::Failed("not_live"),
                reason: Some("Connection closed or client not live.".into()),
            };
        };

        let text = Self::encode(&payload);
        if socket.send(Message::Text(text.into())).is_err() {
            return SendResult {
                status: SendOutcome::Failed("not_live"),
                reason: Some("Connection closed or client not live.".into()),
            };
        }

        SendResult {
            status: SendOutcome::Success,
            reason: None,
        }
    }
}

/// Distinguishes an already-serialized text payload from a structured value
/// still needing JSON encoding (§4.7, §9 open question 2).
pub enum OutboundPayload {
    Text(String),
    Json(serde_json::Value),
}

impl OutboundPayload {
    pub fn from_json<T: Serialize>(value: &T) -> Self {
        OutboundPayload::Json(serde_json::to_value(value).unwrap_or(serde_json::Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::record::ConnectionRecord;
    use crate::connection::store::InMemoryConnectionStore;
    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(Arc::new(InMemoryConnectionStore::new())))
    }

    async fn active_record(registry: &Registry, server_id: &str) -> ConnectionRecord {
        let mut record = ConnectionRecord::issued(
            Uuid::new_v4(),
            "cliX".into(),
            "127.0.0.1".into(),
            "https://example.test/connection/connect".into(),
            Uuid::new_v4(),
            Utc::now() + chrono::Duration::seconds(60),
        );
        record.promote(server_id.into(), "127.0.0.1".into(), Utc::now());
        registry.upsert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn send_fails_with_no_such_connection_when_record_is_absent() {
        let registry = registry();
        let sender = Sender::with_server_id(registry, "srvA");

        let result = sender
            .send(Uuid::new_v4(), OutboundPayload::Text("hi".into()))
            .await;

        assert_eq!(result.status, SendOutcome::Failed("not_found"));
        assert_eq!(result.reason.as_deref(), Some("No such connection."));
    }

    #[tokio::test]
    async fn send_fails_when_connection_is_not_live() {
        let registry = registry();
        let record = ConnectionRecord::issued(
            Uuid::new_v4(),
            "cliX".into(),
            "127.0.0.1".into(),
            "https://example.test/connection/connect".into(),
            Uuid::new_v4(),
            Utc::now() + chrono::Duration::seconds(60),
        );
        registry.upsert(&record).await.unwrap();

        let sender = Sender::with_server_id(registry, "srvA");
        let result = sender
            .send(record.id, OutboundPayload::Text("hi".into()))
            .await;

        assert_eq!(result.status, SendOutcome::Failed("not_live"));
        assert_eq!(
            result.reason.as_deref(),
            Some("Connection closed or client not live.")
        );
    }

    #[tokio::test]
    async fn send_fails_when_record_belongs_to_a_different_server() {
        let registry = registry();
        let record = active_record(&registry, "srvB").await;

        let sender = Sender::with_server_id(registry, "srvA");
        let result = sender
            .send(record.id, OutboundPayload::Text("hi".into()))
            .await;

        assert_eq!(result.status, SendOutcome::Failed("wrong_server"));
        assert!(result.reason.unwrap().contains("does not belong"));
    }

    #[tokio::test]
    async fn send_succeeds_and_forwards_a_string_payload_as_is() {
        let registry = registry();
        let record = active_record(&registry, "srvA").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register_socket(record.id, tx);

        let sender = Sender::with_server_id(registry, "srvA");
        let result = sender
            .send(record.id, OutboundPayload::Text("raw-string".into()))
            .await;

        assert_eq!(result.status, SendOutcome::Success);
        let frame = rx.recv().await.unwrap();
        match frame {
            Message::Text(text) => assert_eq!(text, "raw-string"),
            _ => panic!("expected a text frame"),
        }
    }

    #[tokio::test]
    async fn send_json_encodes_structured_payloads() {
        let registry = registry();
        let record = active_record(&registry, "srvA").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register_socket(record.id, tx);

        let sender = Sender::with_server_id(registry, "srvA");
        let payload = OutboundPayload::from_json(&serde_json::json!({"type": "x.y"}));
        sender.send(record.id, payload).await;

        let frame = rx.recv().await.unwrap();
        match frame {
            Message::Text(text) => assert_eq!(text, r#"{"type":"x.y"}"#),
            _ => panic!("expected a text frame"),
        }
    }
}
