//! Heartbeat Monitor (§4.4): a repeating 30s ping/pong liveness probe per
//! connection. Grounded on the teacher's `tokio::spawn` + `tokio::select!`
//! per-socket task pattern in `websocket/handler.rs::handle_socket`,
//! narrowed here to just the ping/pong timer since the read/write split is
//! owned by the admission controller.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use super::registry::Registry;

pub const DEFAULT_INTERVAL_MS: u64 = 30_000;

/// Spawns the repeating probe for `connection_id`. Each tick: if the
/// previous tick's pong never arrived (`alive == false`), log the miss and
/// persist; then flip `alive := false` and send a ping, leaving it to
/// `record_pong` to flip it back. A two-state Bernoulli detector — one
/// missed tick marks the connection *silent*, nothing here disconnects it.
pub fn spawn(registry: Arc<Registry>, connection_id: Uuid, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            ticker.tick().await;

            let Ok(Some(mut record)) = registry.find_by_id(connection_id).await else {
                return;
            };
            if !record.open {
                return;
            }

            if !record.alive {
                warn!(%connection_id, "heartbeat missed since previous tick");
            }
            record.alive = false;
            if registry.upsert(&record).await.is_err() {
                return;
            }

            let Some(socket) = registry.get_socket(connection_id) else {
                return;
            };
            if socket.send(Message::Ping(Vec::new().into())).is_err() {
                return;
            }
        }
    })
}

/// Applies a received pong (§4.4 third bullet): `lastHeartbeat := now`,
/// `alive := true`, persisted.
pub async fn record_pong(registry: &Registry, connection_id: Uuid) {
    if let Ok(Some(mut record)) = registry.find_by_id(connection_id).await {
        record.alive = true;
        record.last_heartbeat = Some(Utc::now());
        let _ = registry.upsert(&record).await;
    }
}
