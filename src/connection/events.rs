//! Event Bus (§4.8): three fixed channels (`authenticate`, `connect`,
//! `disconnect`). Grounded on the teacher's handler registration pattern in
//! `websocket/mod.rs`, generalized to a reusable synchronous pub/sub with
//! registration-order delivery and catch-and-log semantics.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::error;
use uuid::Uuid;

use super::record::ConnectionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    Authenticate,
    Connect,
    Disconnect,
}

/// Handler invoked for the `authenticate` channel. Per §4.2 step 5 and §9
/// open question 1, a handler may mutate the record in place, but the bus
/// never re-persists it — the admission step already wrote the canonical
/// copy, and the source's behavior is preserved here deliberately.
#[async_trait]
pub trait AuthenticateSubscriber: Send + Sync {
    async fn on_authenticate(&self, record: &mut ConnectionRecord, connection_id: Uuid);
}

#[async_trait]
pub trait ConnectSubscriber: Send + Sync {
    async fn on_connect(&self, connection_id: Uuid);
}

#[async_trait]
pub trait DisconnectSubscriber: Send + Sync {
    async fn on_disconnect(&self, connection_id: Uuid);
}

/// Synchronous, registration-ordered dispatcher for the three fixed
/// channels. "Synchronous" here means subscribers within a channel are
/// awaited one at a time in order, matching §5's "handlers called
/// synchronously in the caller's execution context" — it does not mean the
/// bus blocks the async runtime.
#[derive(Default)]
pub struct EventBus {
    authenticate: RwLock<Vec<Arc<dyn AuthenticateSubscriber>>>,
    connect: RwLock<Vec<Arc<dyn ConnectSubscriber>>>,
    disconnect: RwLock<Vec<Arc<dyn DisconnectSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_authenticate(&self, subscriber: Arc<dyn AuthenticateSubscriber>) {
        self.authenticate.write().unwrap().push(subscriber);
    }

    pub fn on_connect(&self, subscriber: Arc<dyn ConnectSubscriber>) {
        self.connect.write().unwrap().push(subscriber);
    }

    pub fn on_disconnect(&self, subscriber: Arc<dyn DisconnectSubscriber>) {
        self.disconnect.write().unwrap().push(subscriber);
    }

    pub fn off_authenticate(&self, subscriber: &Arc<dyn AuthenticateSubscriber>) {
        let mut list = self.authenticate.write().unwrap();
        if let Some(pos) = list.iter().position(|s| Arc::ptr_eq(s, subscriber)) {
            list.remove(pos);
        }
    }

    pub fn off_connect(&self, subscriber: &Arc<dyn ConnectSubscriber>) {
        let mut list = self.connect.write().unwrap();
        if let Some(pos) = list.iter().position(|s| Arc::ptr_eq(s, subscriber)) {
            list.remove(pos);
        }
    }

    pub fn off_disconnect(&self, subscriber: &Arc<dyn DisconnectSubscriber>) {
        let mut list = self.disconnect.write().unwrap();
        if let Some(pos) = list.iter().position(|s| Arc::ptr_eq(s, subscriber)) {
            list.remove(pos);
        }
    }

    /// Runs `authenticate` subscribers in registration order, each able to
    /// mutate `record` in place. No persistence happens here (§9 open
    /// question 1). A subscriber that panics is caught and logged (§4.8); it
    /// never prevents the remaining subscribers from running.
    pub async fn emit_authenticate(&self, record: &mut ConnectionRecord, connection_id: Uuid) {
        let subscribers: Vec<_> = self.authenticate.read().unwrap().clone();
        for subscriber in subscribers {
            let outcome = AssertUnwindSafe(subscriber.on_authenticate(record, connection_id))
                .catch_unwind()
                .await;
            log_subscriber_panic(outcome, "authenticate");
        }
    }

    pub async fn emit_connect(&self, connection_id: Uuid) {
        let subscribers: Vec<_> = self.connect.read().unwrap().clone();
        for subscriber in subscribers {
            let outcome = AssertUnwindSafe(subscriber.on_connect(connection_id))
                .catch_unwind()
                .await;
            log_subscriber_panic(outcome, "connect");
        }
    }

    pub async fn emit_disconnect(&self, connection_id: Uuid) {
        let subscribers: Vec<_> = self.disconnect.read().unwrap().clone();
        for subscriber in subscribers {
            let outcome = AssertUnwindSafe(subscriber.on_disconnect(connection_id))
                .catch_unwind()
                .await;
            log_subscriber_panic(outcome, "disconnect");
        }
    }
}

fn log_subscriber_panic(outcome: std::thread::Result<()>, channel: &str) {
    if let Err(payload) = outcome {
        let message = panic_message(&payload);
        error!(channel, message, "event-bus subscriber panicked");
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

/// Wraps a fallible subscriber so a panic-free error path still logs and
/// continues (§4.8 catch-and-log). Async closures can't easily implement
/// the subscriber traits directly in tests, so this adapter is also handy
/// there.
pub struct LoggingConnectSubscriber<F>(pub F);

#[async_trait]
impl<F> ConnectSubscriber for LoggingConnectSubscriber<F>
where
    F: Fn(Uuid) -> Result<(), String> + Send + Sync,
{
    async fn on_connect(&self, connection_id: Uuid) {
        if let Err(e) = (self.0)(connection_id) {
            error!(error = %e, "connect subscriber failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingAuth {
        order: Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    }

    #[async_trait]
    impl AuthenticateSubscriber for RecordingAuth {
        async fn on_authenticate(&self, record: &mut ConnectionRecord, _connection_id: Uuid) {
            self.order.lock().unwrap().push(self.tag);
            record.client_address = format!("{}/{}", record.client_address, self.tag);
        }
    }

    fn sample_record() -> ConnectionRecord {
        ConnectionRecord::issued(
            Uuid::new_v4(),
            "cliX".into(),
            "orig".into(),
            "https://example.test/connection/connect".into(),
            Uuid::new_v4(),
            chrono::Utc::now() + chrono::Duration::seconds(60),
        )
    }

    #[tokio::test]
    async fn authenticate_subscribers_fire_in_registration_order_and_mutate_record() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        bus.on_authenticate(Arc::new(RecordingAuth {
            order: order.clone(),
            tag: "first",
        }));
        bus.on_authenticate(Arc::new(RecordingAuth {
            order: order.clone(),
            tag: "second",
        }));

        let mut record = sample_record();
        bus.emit_authenticate(&mut record, Uuid::new_v4()).await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(record.client_address, "orig/first/second");
    }

    struct PanickingConnect;

    #[async_trait]
    impl ConnectSubscriber for PanickingConnect {
        async fn on_connect(&self, _connection_id: Uuid) {
            panic!("boom");
        }
    }

    struct CountingConnect(Arc<AtomicUsize>);

    #[async_trait]
    impl ConnectSubscriber for CountingConnect {
        async fn on_connect(&self, _connection_id: Uuid) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn a_panicking_subscriber_does_not_prevent_the_next_one_from_running() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.on_connect(Arc::new(PanickingConnect));
        bus.on_connect(Arc::new(CountingConnect(calls.clone())));

        bus.emit_connect(Uuid::new_v4()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_subscriber_errors_are_caught_and_logged_not_propagated() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        bus.on_connect(Arc::new(LoggingConnectSubscriber(move |_id| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Err("boom".to_string())
        })));

        bus.emit_connect(Uuid::new_v4()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_connect_removes_the_subscriber_by_identity() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let subscriber: Arc<dyn ConnectSubscriber> =
            Arc::new(LoggingConnectSubscriber(move |_id| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        bus.on_connect(subscriber.clone());
        bus.off_connect(&subscriber);

        bus.emit_connect(Uuid::new_v4()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
