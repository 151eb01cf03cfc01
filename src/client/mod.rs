//! Client Connector (§4.10): the counterpart consumer-side component that
//! obtains a connection token, opens the WebSocket, and manages
//! reconnection. Grounded on the `ResilientClient` reconnect-with-backoff
//! shape from the pack's `emotiv-cortex-v2::reconnect` module, narrowed to
//! the spec's fixed-interval (not exponential-backoff) reconnect policy,
//! and on the teacher's `reqwest`-based outbound HTTP usage for the initial
//! token request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, warn};

type WsOutbound = mpsc::UnboundedSender<WsMessage>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no socket is open")]
    NotConnected,
    #[error("socket is not open")]
    NotOpen,
    #[error("message.type must be a string")]
    InvalidMessageType,
    #[error("report request failed: {0}")]
    ReportRequest(String),
    #[error("malformed connection token: {0}")]
    MalformedToken(String),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Serialize)]
struct ReportBody<'a> {
    idtoken: &'a str,
    #[serde(rename = "traceId")]
    trace_id: String,
}

#[derive(Deserialize)]
struct ReportResponse {
    token: String,
}

#[derive(Deserialize)]
struct TokenPayload {
    #[serde(rename = "reportUrl")]
    report_url: String,
}

pub trait ConnectSubscriber: Send + Sync {
    fn on_connect(&self);
}

pub trait DisconnectSubscriber: Send + Sync {
    fn on_disconnect(&self, reason: Option<&str>);
}

pub trait MessageSubscriber: Send + Sync {
    fn on_message(&self, message: &serde_json::Value);
}

struct Subscribers {
    connect: Mutex<Vec<Arc<dyn ConnectSubscriber>>>,
    disconnect: Mutex<Vec<Arc<dyn DisconnectSubscriber>>>,
    message: Mutex<Vec<Arc<dyn MessageSubscriber>>>,
}

impl Default for Subscribers {
    fn default() -> Self {
        Self {
            connect: Mutex::new(Vec::new()),
            disconnect: Mutex::new(Vec::new()),
            message: Mutex::new(Vec::new()),
        }
    }
}

/// `provider.messageType` validator shared with the server dispatcher
/// (§4.10 step 4 reuses the server's discriminator format verbatim).
fn message_discriminator() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+\.[A-Za-z0-9._-]+$").unwrap())
}

/// Decodes the middle (payload) segment of a JWT, tolerating a missing
/// base64url padding — the source's client never pads before decoding
/// (§9 design note).
fn decode_jwt_payload(token: &str) -> Result<TokenPayload, ClientError> {
    let segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ClientError::MalformedToken("token has no payload segment".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| ClientError::MalformedToken(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| ClientError::MalformedToken(e.to_string()))
}

/// §4.10. One instance manages a single logical connection across any
/// number of reconnect attempts.
pub struct Connector {
    identity_token: String,
    report_url: String,
    reconnect_interval_secs: u64,
    always_reconnect: AtomicBool,
    socket: Mutex<Option<WsOutbound>>,
    subscribers: Subscribers,
    http: reqwest::Client,
}

impl Connector {
    pub fn new(identity_token: impl Into<String>, report_url: impl Into<String>) -> Arc<Self> {
        Self::with_reconnect(identity_token, report_url, true, 30)
    }

    pub fn with_reconnect(
        identity_token: impl Into<String>,
        report_url: impl Into<String>,
        always_reconnect: bool,
        reconnect_interval_secs: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity_token: identity_token.into(),
            report_url: report_url.into(),
            reconnect_interval_secs,
            always_reconnect: AtomicBool::new(always_reconnect),
            socket: Mutex::new(None),
            subscribers: Subscribers::default(),
            http: reqwest::Client::new(),
        })
    }

    pub fn on_connect(&self, subscriber: Arc<dyn ConnectSubscriber>) {
        self.subscribers.connect.lock().unwrap().push(subscriber);
    }

    pub fn on_disconnect(&self, subscriber: Arc<dyn DisconnectSubscriber>) {
        self.subscribers
            .disconnect
            .lock()
            .unwrap()
            .push(subscriber);
    }

    pub fn on_message(&self, subscriber: Arc<dyn MessageSubscriber>) {
        self.subscribers.message.lock().unwrap().push(subscriber);
    }

    fn emit_connect(&self) {
        for subscriber in self.subscribers.connect.lock().unwrap().iter() {
            subscriber.on_connect();
        }
    }

    fn emit_disconnect(&self, reason: Option<&str>) {
        for subscriber in self.subscribers.disconnect.lock().unwrap().iter() {
            subscriber.on_disconnect(reason);
        }
    }

    fn emit_message(&self, message: &serde_json::Value) {
        for subscriber in self.subscribers.message.lock().unwrap().iter() {
            subscriber.on_message(message);
        }
    }

    /// Runs the connect protocol once (§4.10 steps 1-4). On socket close,
    /// schedules another attempt if `alwaysReconnect` is still set (step
    /// 5). Intended to be spawned as its own task.
    pub async fn connect(self: Arc<Self>) {
        let trace_id = uuid::Uuid::new_v4().to_string();

        let response = match self
            .http
            .post(&self.report_url)
            .header("Authorization", &self.identity_token)
            .json(&ReportBody {
                idtoken: &self.identity_token,
                trace_id: trace_id.clone(),
            })
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                error!(trace_id, status = %r.status(), "report request rejected");
                return;
            }
            Err(e) => {
                error!(trace_id, error = %e, "report request failed");
                return;
            }
        };

        let report: ReportResponse = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                error!(trace_id, error = %e, "malformed report response");
                return;
            }
        };

        let payload = match decode_jwt_payload(&report.token) {
            Ok(p) => p,
            Err(e) => {
                error!(trace_id, error = %e, "failed to decode connection token payload");
                return;
            }
        };

        self.run_socket(payload.report_url, report.token).await;
    }

    async fn run_socket(self: &Arc<Self>, ws_url: String, origin_token: String) {
        let mut request = match ws_url.clone().into_client_request() {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "invalid websocket url");
                return;
            }
        };
        let origin_value = match HeaderValue::from_str(&origin_token) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "connection token is not a valid header value");
                return;
            }
        };
        request.headers_mut().insert("origin", origin_value);

        let (ws_stream, _) = match tokio_tungstenite::connect_async(request).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "websocket connect failed");
                self.schedule_reconnect();
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        *self.socket.lock().unwrap() = Some(tx);

        self.emit_connect();

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let mut close_reason = None;
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => self.handle_inbound_text(&text),
                Ok(WsMessage::Close(frame)) => {
                    close_reason = frame.map(|f| f.reason.to_string());
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    close_reason = Some(e.to_string());
                    break;
                }
            }
        }

        writer_task.abort();
        *self.socket.lock().unwrap() = None;
        self.emit_disconnect(close_reason.as_deref());

        if self.always_reconnect.load(Ordering::SeqCst) {
            self.schedule_reconnect();
        }
    }

    fn handle_inbound_text(&self, text: &str) {
        let parsed: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                debug!("dropping inbound frame that is not valid JSON");
                return;
            }
        };
        let Some(raw_type) = parsed.get("type").and_then(|v| v.as_str()) else {
            debug!("dropping inbound frame with no string type field");
            return;
        };
        if !message_discriminator().is_match(raw_type) {
            debug!(raw_type, "dropping inbound frame with malformed discriminator");
            return;
        }
        self.emit_message(&parsed);
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let this = self.clone();
        let delay = std::time::Duration::from_secs(self.reconnect_interval_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.always_reconnect.load(Ordering::SeqCst) {
                this.connect().await;
            }
        });
    }

    /// §4.10 `send`: rejects without a socket, a closed socket, or a
    /// non-string `type`; otherwise JSON-encodes and sends.
    pub fn send(&self, message: &serde_json::Value) -> Result<(), ClientError> {
        if !message
            .get("type")
            .map(|v| v.is_string())
            .unwrap_or(false)
        {
            return Err(ClientError::InvalidMessageType);
        }

        let socket = self.socket.lock().unwrap();
        let Some(socket) = socket.as_ref() else {
            return Err(ClientError::NotConnected);
        };

        socket
            .send(WsMessage::Text(message.to_string().into()))
            .map_err(|_| ClientError::NotOpen)
    }

    /// §4.10 `disconnect`: stops reconnection; if the socket is OPEN, sends
    /// a final `client.state` frame, closes the socket, and synchronously
    /// invokes `disconnect` subscribers (the underlying runtime may not
    /// otherwise deliver a close event back to this caller). All three of
    /// those actions are gated on the socket actually being open — calling
    /// `disconnect` with no open socket is a no-op beyond halting reconnect.
    pub fn disconnect(&self, reason: &str) {
        self.always_reconnect.store(false, Ordering::SeqCst);

        let socket = self.socket.lock().unwrap().take();
        if let Some(socket) = socket {
            let frame = serde_json::json!({
                "type": "client.state",
                "state": format!("stopped.{reason}"),
            });
            let _ = socket.send(WsMessage::Text(frame.to_string().into()));
            let _ = socket.send(WsMessage::Close(None));

            self.emit_disconnect(Some(reason));
        }
    }
}
