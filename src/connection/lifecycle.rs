//! Lifecycle & Cleanup (§4.6) and graceful shutdown. Grounded on the
//! teacher's `tokio::select!`-joined send/recv tasks in
//! `websocket/handler.rs`, which already implies "when either task ends,
//! tear the connection down" — this module is the explicit, idempotent
//! version of that teardown shared by socket close, redundant-connection
//! rejection, and process shutdown.

use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

/// `cleanup(connectionId)` — §4.6. Idempotent; tolerates a missing record.
pub async fn cleanup(state: &AppState, connection_id: Uuid, closed_by_server: bool) {
    state.registry.unregister_socket(connection_id);
    state.registry.unregister_heartbeat(connection_id);

    let Ok(Some(mut record)) = state.registry.find_by_id(connection_id).await else {
        return;
    };

    let now = chrono::Utc::now();
    let token_id = record.token_id;
    record.close(closed_by_server, now);
    if let Err(e) = state.registry.upsert(&record).await {
        warn!(%connection_id, error = ?e, "failed to persist cleanup");
        return;
    }
    if let Some(token_id) = token_id {
        // I5: every record with tokenId set has a corresponding token
        // record; cleanup deletes both.
        let _ = state.registry.delete_token(token_id).await;
    }

    state.event_bus.emit_disconnect(connection_id).await;

    if let Some(descriptor) = state.identity.get_client(&record.client_id).await {
        if !descriptor.state.starts_with("stopped") {
            // Advisory only: the identity provider owns persistence of its
            // own `state` field, this crate does not write it back.
            warn!(client_id = %record.client_id, "client state is now unknown after disconnect");
        }
    }
}

/// Closes every locally-registered connection and runs `cleanup` for each,
/// per §5's shutdown guarantee. Returns once every session has been torn
/// down.
pub async fn shutdown(state: &AppState) {
    let records = match state.registry.find_all().await {
        Ok(records) => records,
        Err(_) => return,
    };

    for record in records {
        if record.server_id.as_deref() == Some(&*state.config.server_id) && record.open {
            if let Some(socket) = state.registry.get_socket(record.id) {
                let _ = socket.send(axum::extract::ws::Message::Close(None));
            }
            cleanup(state, record.id, true).await;
        }
    }
}

/// Waits for SIGTERM, SIGINT, or SIGHUP (Unix) — or Ctrl+C alone on other
/// platforms — then runs [`shutdown`]. Intended as the future passed to
/// `axum::serve(...).with_graceful_shutdown(...)`.
pub async fn shutdown_signal(state: AppState) {
    wait_for_shutdown_signal().await;
    warn!("shutdown signal received, closing all live sessions");
    shutdown(&state).await;
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut hup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
        _ = hup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::dispatcher::Dispatcher;
    use crate::connection::events::EventBus;
    use crate::connection::record::ConnectionRecord;
    use crate::connection::registry::Registry;
    use crate::connection::sender::Sender;
    use crate::connection::store::InMemoryConnectionStore;
    use crate::connection::token::{JwtTokenIssuer, TokenBroker};
    use crate::identity::InMemoryIdentityProvider;
    use chrono::Utc;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let registry = Arc::new(Registry::new(Arc::new(InMemoryConnectionStore::new())));
        let config = Arc::new(Config {
            database_url: String::new(),
            server_host: "127.0.0.1".into(),
            server_port: 0,
            server_id: Arc::from("srvA"),
            endpoint_base: "https://example.test".into(),
            provider_route: "connection".into(),
            connection_token_secret: Arc::from("secret"),
            connection_token_ttl_secs: 60,
            heartbeat_interval_ms: 30_000,
            reconnect_interval_secs: 30,
        });
        AppState {
            registry: registry.clone(),
            token_broker: Arc::new(TokenBroker::new(Arc::new(JwtTokenIssuer::new(
                "secret", 60,
            )))),
            identity: Arc::new(InMemoryIdentityProvider::new()),
            event_bus: Arc::new(EventBus::new()),
            dispatcher: Arc::new(Dispatcher::new()),
            sender: Arc::new(Sender::with_server_id(registry, "srvA")),
            config,
        }
    }

    async fn active_record(state: &AppState) -> ConnectionRecord {
        let mut record = ConnectionRecord::issued(
            Uuid::new_v4(),
            "cliX".into(),
            "127.0.0.1".into(),
            "https://example.test/connection/connect".into(),
            Uuid::new_v4(),
            Utc::now() + chrono::Duration::seconds(60),
        );
        record.promote("srvA".into(), "127.0.0.1".into(), Utc::now());
        state.registry.upsert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn cleanup_marks_the_record_closed_and_sets_disconnected() {
        let state = test_state();
        let record = active_record(&state).await;

        cleanup(&state, record.id, true).await;

        let updated = state.registry.find_by_id(record.id).await.unwrap().unwrap();
        assert!(!updated.open);
        assert!(!updated.alive);
        assert!(updated.disconnected.is_some());
    }

    #[tokio::test]
    async fn cleanup_clears_token_id_and_deletes_the_token_record() {
        use crate::connection::store::ConnectionTokenRecord;

        let state = test_state();
        let record = active_record(&state).await;
        let token_id = record.token_id.unwrap();
        state
            .registry
            .insert_token(&ConnectionTokenRecord {
                token_id,
                connection_id: record.id,
                expires: Utc::now() + chrono::Duration::seconds(60),
            })
            .await
            .unwrap();

        cleanup(&state, record.id, true).await;

        let updated = state.registry.find_by_id(record.id).await.unwrap().unwrap();
        assert!(updated.token_id.is_none());
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let state = test_state();
        let record = active_record(&state).await;

        cleanup(&state, record.id, true).await;
        cleanup(&state, record.id, true).await;

        let updated = state.registry.find_by_id(record.id).await.unwrap().unwrap();
        assert!(!updated.open);
    }

    #[tokio::test]
    async fn cleanup_tolerates_a_missing_record() {
        let state = test_state();
        cleanup(&state, Uuid::new_v4(), true).await;
    }

    #[tokio::test]
    async fn cleanup_unregisters_local_socket_and_heartbeat() {
        let state = test_state();
        let record = active_record(&state).await;

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        state.registry.register_socket(record.id, tx);
        assert!(state.registry.is_connected_locally(record.id));

        cleanup(&state, record.id, true).await;
        assert!(!state.registry.is_connected_locally(record.id));
    }

    #[tokio::test]
    async fn shutdown_closes_every_locally_owned_open_record() {
        let state = test_state();
        let record = active_record(&state).await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        state.registry.register_socket(record.id, tx);

        shutdown(&state).await;

        let updated = state.registry.find_by_id(record.id).await.unwrap().unwrap();
        assert!(!updated.open);
    }
}
