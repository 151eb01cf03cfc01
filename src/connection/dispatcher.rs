//! Dispatcher (§4.3): routes an inbound `provider.message` frame to the
//! handler registered for its `(provider, messageType)` pair. Grounded on
//! the teacher's `websocket/handler.rs::handle_client_message`
//! match-on-discriminator shape, generalized to an open, two-level
//! provider→type registry instead of a fixed enum, since the spec allows
//! arbitrary providers to register handlers at startup.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, warn};
use uuid::Uuid;

use super::registry::Registry;
use super::sender::Sender;

/// `provider.messageType`, both halves `[A-Za-z0-9._-]+`, split on the
/// first dot (§4.3 discriminator format).
static DISCRIMINATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_-]+)\.([A-Za-z0-9._-]+)$").unwrap());

/// Context handed to a handler: the connection the frame arrived on, plus
/// access back into the registry/sender so a handler can look up state or
/// reply.
pub struct MessageContext {
    pub connection_id: Uuid,
    pub registry: Arc<Registry>,
    pub sender: Arc<Sender>,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &MessageContext, body: &serde_json::Value);
}

/// Split a raw `type` string into `(provider, messageType)`, rejecting
/// anything that doesn't match the discriminator format.
pub fn split_discriminator(raw: &str) -> Option<(String, String)> {
    let captures = DISCRIMINATOR.captures(raw)?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

/// Two-level provider → message-type → handler map (§4.3). Lookup misses
/// and handler panics are both logged and swallowed — one misbehaving
/// handler must never take down the socket's receive loop or any other
/// handler.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, HashMap<String, Arc<dyn MessageHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        provider: impl Into<String>,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.handlers
            .entry(provider.into())
            .or_default()
            .insert(message_type.into(), handler);
    }

    /// Dispatch a raw inbound frame. `raw_type` is the frame's `type` field;
    /// `body` is everything else. Per-socket dispatch is sequential (one
    /// frame fully handled before the next is read); dispatch across
    /// distinct sockets runs independently since each socket owns its own
    /// receive task.
    pub async fn dispatch(&self, ctx: &MessageContext, raw_type: &str, body: &serde_json::Value) {
        let Some((provider, message_type)) = split_discriminator(raw_type) else {
            warn!(raw_type, "dropping frame with malformed type discriminator");
            return;
        };

        let Some(handler) = self
            .handlers
            .get(&provider)
            .and_then(|by_type| by_type.get(&message_type))
        else {
            warn!(provider, message_type, "no handler registered for message type");
            return;
        };

        // §4.3 step 5 / §7: a handler panic is caught and logged here, not
        // allowed to unwind into the socket's receive task — one bad
        // handler must never tear down the connection or its peers.
        let outcome = AssertUnwindSafe(handler.handle(ctx, body))
            .catch_unwind()
            .await;
        if let Err(payload) = outcome {
            let message = panic_message(&payload);
            error!(provider, message_type, message, "message handler panicked");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
