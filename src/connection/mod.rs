//! The Connection Provider: admission, dispatch, heartbeat, events, sends,
//! and lifecycle for long-lived WebSocket sessions (§2, §4).

pub mod admission;
pub mod dispatcher;
pub mod events;
pub mod heartbeat;
pub mod lifecycle;
pub mod record;
pub mod registry;
pub mod routes;
pub mod sender;
pub mod store;
pub mod token;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Built-in `client.state` handler (§4.10 last paragraph): replies `ready`
/// to an `accepted` promotion frame, logs and stops on `rejected`.
pub struct ClientStateHandler;

#[async_trait::async_trait]
impl dispatcher::MessageHandler for ClientStateHandler {
    async fn handle(&self, ctx: &dispatcher::MessageContext, body: &serde_json::Value) {
        match body.get("state").and_then(|v| v.as_str()) {
            Some("accepted") => {
                let reply = sender::OutboundPayload::from_json(&serde_json::json!({
                    "type": "client.state",
                    "state": "ready",
                }));
                ctx.sender.send(ctx.connection_id, reply).await;
            }
            Some(state) if state.starts_with("rejected") => {
                tracing::warn!(connection_id = %ctx.connection_id, state, "client rejected connection state");
            }
            _ => {}
        }
    }
}

/// Registers every built-in message handler. Callers may register
/// additional providers before this returns a [`dispatcher::Dispatcher`],
/// since the dispatcher itself has no notion of "built-in" vs. "custom".
pub fn default_dispatcher() -> dispatcher::Dispatcher {
    let mut dispatcher = dispatcher::Dispatcher::new();
    dispatcher.register("client", "state", std::sync::Arc::new(ClientStateHandler));
    dispatcher
}

/// Mounts the provider's HTTP/WS surface under the caller's chosen prefix
/// (§6). `POST /` and `GET/WS /connect` are the admission endpoints; the
/// remaining three are operator-facing reads and the Sender route.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(admission::issue_token).get(routes::list_records))
        .route("/connect", get(admission::connect))
        .route("/:connection_id", get(routes::get_record))
        .route("/:connection_id/send", post(routes::send_message))
}
