//! The Registry (§4.5): the single point of contact between the rest of the
//! provider and both the authoritative store and the process-local state
//! that cannot be persisted — live socket handles and heartbeat timers.
//!
//! Grounded on the teacher's `websocket/connection_manager.rs`
//! (`Arc<RwLock<HashMap<Uuid, UnboundedSender<_>>>>` keyed socket table),
//! generalized here to also own the document store and the heartbeat
//! timer handles so cleanup (§4.6) has one place to reach for both.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AppResult;

use super::record::ConnectionRecord;
use super::store::{ConnectionStore, ConnectionTokenRecord};

pub type SocketHandle = mpsc::UnboundedSender<Message>;

pub struct Registry {
    store: Arc<dyn ConnectionStore>,
    sockets: RwLock<HashMap<Uuid, SocketHandle>>,
    heartbeats: RwLock<HashMap<Uuid, JoinHandle<()>>>,
}

impl Registry {
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self {
            store,
            sockets: RwLock::new(HashMap::new()),
            heartbeats: RwLock::new(HashMap::new()),
        }
    }

    // -- store delegation ---------------------------------------------

    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<ConnectionRecord>> {
        self.store.find_by_id(id).await
    }

    pub async fn find_by_client_id(&self, client_id: &str) -> AppResult<Option<ConnectionRecord>> {
        self.store.find_by_client_id(client_id).await
    }

    pub async fn find_all(&self) -> AppResult<Vec<ConnectionRecord>> {
        self.store.find_all().await
    }

    pub async fn upsert(&self, record: &ConnectionRecord) -> AppResult<()> {
        self.store.upsert(record).await
    }

    pub async fn delete_by_id(&self, id: Uuid) -> AppResult<()> {
        self.store.delete_by_id(id).await
    }

    pub async fn insert_token(&self, token: &ConnectionTokenRecord) -> AppResult<()> {
        self.store.insert_token(token).await
    }

    pub async fn delete_token(&self, token_id: Uuid) -> AppResult<()> {
        self.store.delete_token(token_id).await
    }

    // -- local socket table ---------------------------------------------

    /// §4.5: `registerSocket` — records the live, unserializable handle for
    /// an upgraded connection. Replaces any existing handle for the id.
    pub fn register_socket(&self, connection_id: Uuid, handle: SocketHandle) {
        self.sockets.write().unwrap().insert(connection_id, handle);
    }

    /// §4.5: `unregisterSocket` — drops the local handle. Idempotent.
    pub fn unregister_socket(&self, connection_id: Uuid) {
        self.sockets.write().unwrap().remove(&connection_id);
    }

    pub fn get_socket(&self, connection_id: Uuid) -> Option<SocketHandle> {
        self.sockets.read().unwrap().get(&connection_id).cloned()
    }

    pub fn is_connected_locally(&self, connection_id: Uuid) -> bool {
        self.sockets.read().unwrap().contains_key(&connection_id)
    }

    // -- local heartbeat timer table --------------------------------------

    /// Registers the heartbeat task spawned for this connection (§4.4). Any
    /// previous timer for the id is aborted first, since only one heartbeat
    /// loop may run per live connection.
    pub fn register_heartbeat(&self, connection_id: Uuid, handle: JoinHandle<()>) {
        let previous = self
            .heartbeats
            .write()
            .unwrap()
            .insert(connection_id, handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// §4.6 step 2: stop the heartbeat timer. Idempotent.
    pub fn unregister_heartbeat(&self, connection_id: Uuid) {
        if let Some(handle) = self.heartbeats.write().unwrap().remove(&connection_id) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::store::InMemoryConnectionStore;
    use chrono::Utc;

    fn registry() -> Registry {
        Registry::new(Arc::new(InMemoryConnectionStore::new()))
    }

    #[tokio::test]
    async fn store_delegation_round_trips_a_record() {
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
        let found = registry.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(found.client_id, "cliX");
    }

    #[test]
    fn register_and_unregister_socket_is_idempotent() {
        let registry = registry();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register_socket(id, tx);
        assert!(registry.is_connected_locally(id));

        registry.unregister_socket(id);
        registry.unregister_socket(id);
        assert!(!registry.is_connected_locally(id));
    }

    #[tokio::test]
    async fn registering_a_new_heartbeat_aborts_the_previous_one() {
        let registry = registry();
        let id = Uuid::new_v4();

        let first = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        registry.register_heartbeat(id, first);

        let second = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        registry.register_heartbeat(id, second);

        registry.unregister_heartbeat(id);
    }
}
