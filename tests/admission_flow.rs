//! End-to-end admission flow: issue a connection token over HTTP, upgrade
//! to a WebSocket with it, and observe the promotion frame — scenario 1
//! from the connection lifecycle's testable properties.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use connection_provider::config::Config;
use connection_provider::connection::events::EventBus;
use connection_provider::connection::registry::Registry;
use connection_provider::connection::sender::Sender;
use connection_provider::connection::store::InMemoryConnectionStore;
use connection_provider::connection::token::{JwtTokenIssuer, TokenBroker};
use connection_provider::connection::{default_dispatcher, router};
use connection_provider::identity::InMemoryIdentityProvider;
use connection_provider::state::AppState;

async fn spawn_test_server() -> (SocketAddr, AppState) {
    let registry = Arc::new(Registry::new(Arc::new(InMemoryConnectionStore::new())));
    let config = Arc::new(Config {
        database_url: String::new(),
        server_host: "127.0.0.1".into(),
        server_port: 0,
        server_id: Arc::from("srvA"),
        endpoint_base: "http://127.0.0.1".into(),
        provider_route: "connection".into(),
        connection_token_secret: Arc::from("test-secret"),
        connection_token_ttl_secs: 60,
        heartbeat_interval_ms: 30_000,
        reconnect_interval_secs: 30,
    });

    let identity = InMemoryIdentityProvider::new();
    identity.register("idtoken-cliX", "cliX");

    let state = AppState {
        config,
        registry: registry.clone(),
        token_broker: Arc::new(TokenBroker::new(Arc::new(JwtTokenIssuer::new(
            "test-secret",
            60,
        )))),
        identity: Arc::new(identity),
        event_bus: Arc::new(EventBus::new()),
        dispatcher: Arc::new(default_dispatcher()),
        sender: Arc::new(Sender::with_server_id(registry, "srvA")),
    };

    let app = Router::new()
        .nest("/connection", router())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

#[tokio::test]
async fn happy_path_issues_a_token_and_promotes_on_upgrade() {
    let (addr, state) = spawn_test_server().await;
    let base = format!("http://{addr}");

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/connection/"))
        .header("Authorization", "idtoken-cliX")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["state"], "success");
    let token = body["token"].as_str().unwrap().to_string();

    let ws_url = format!("ws://{addr}/connection/connect");
    let mut request = ws_url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_str(&token).unwrap());

    let (mut socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let frame = socket.next().await.unwrap().unwrap();
    match frame {
        WsMessage::Text(text) => {
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed["type"], "connection.state");
            assert_eq!(parsed["state"], "accepted");
        }
        other => panic!("expected the promotion frame, got {other:?}"),
    }

    let records = state.registry.find_all().await.unwrap();
    let record = records.iter().find(|r| r.client_id == "cliX").unwrap();
    assert!(record.alive);
    assert_eq!(record.server_id.as_deref(), Some("srvA"));

    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn duplicate_active_client_is_rejected_with_400() {
    let (addr, _state) = spawn_test_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base}/connection/"))
        .header("Authorization", "idtoken-cliX")
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let second = client
        .post(format!("{base}/connection/"))
        .header("Authorization", "idtoken-cliX")
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 400);

    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["state"], "requestError");
    assert!(body["reason"]
        .as_str()
        .unwrap()
        .contains("already has an open connection"));
}

#[tokio::test]
async fn invalid_connection_token_closes_without_upgrading_a_record() {
    let (addr, _state) = spawn_test_server().await;

    let ws_url = format!("ws://{addr}/connection/connect");
    let mut request = ws_url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_str("not-a-real-token").unwrap());

    let result = tokio_tungstenite::connect_async(request).await;
    match result {
        Ok((mut socket, _)) => {
            let next = socket.next().await;
            assert!(next.is_none() || matches!(next, Some(Ok(WsMessage::Close(_)))));
        }
        Err(_) => {}
    }
}
