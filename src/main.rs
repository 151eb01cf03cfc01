use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use connection_provider::config::Config;
use connection_provider::connection::lifecycle::shutdown_signal;
use connection_provider::connection::store::PgConnectionStore;
use connection_provider::connection::token::{JwtTokenIssuer, TokenBroker};
use connection_provider::connection::{default_dispatcher, router};
use connection_provider::connection::{events::EventBus, registry::Registry, sender::Sender};
use connection_provider::db;
use connection_provider::identity::HttpIdentityProvider;
use connection_provider::state::AppState;

/// Restricts `/metrics` to loopback connections, matching the teacher's
/// `require_loopback` middleware.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "connection_provider=info,tower_http=info,sqlx=warn".parse().unwrap());

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("🚀 connection provider starting...");

    let config = Config::from_env().expect("failed to load configuration");
    info!(server_id = %config.server_id, "📝 configuration loaded");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");
    db::health_check(&pool).await.expect("database health check failed");
    info!("✅ database health check passed");

    let store = PgConnectionStore::new(pool);
    store
        .ensure_schema()
        .await
        .expect("failed to ensure connection store schema");
    info!("✅ connection store schema ready");

    let registry = Arc::new(Registry::new(Arc::new(store)));
    let token_broker = Arc::new(TokenBroker::new(Arc::new(JwtTokenIssuer::new(
        config.connection_token_secret.to_string(),
        config.connection_token_ttl_secs,
    ))));
    let identity_base_url =
        std::env::var("IDENTITY_PROVIDER_URL").unwrap_or_else(|_| "http://127.0.0.1:9000".into());
    let identity = Arc::new(HttpIdentityProvider::new(identity_base_url));
    let sender = Arc::new(Sender::with_server_id(
        registry.clone(),
        config.server_id.to_string(),
    ));

    let app_state = AppState {
        config: Arc::new(config.clone()),
        registry,
        token_broker,
        identity,
        event_bus: Arc::new(EventBus::new()),
        dispatcher: Arc::new(default_dispatcher()),
        sender,
    };

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    // Admission endpoints are the only ones a client calls without first
    // holding a live session, so they get the stricter per-IP limit.
    let admission_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(5)
            .burst_size(10)
            .finish()
            .expect("invalid admission governor configuration"),
    );
    let global_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(40)
            .finish()
            .expect("invalid global governor configuration"),
    );

    let provider_prefix = format!("/{}", config.provider_route);
    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        .nest(
            &provider_prefix,
            router().route_layer(GovernorLayer {
                config: admission_governor_conf,
            }),
        )
        .layer(GovernorLayer {
            config: global_governor_conf,
        })
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state.clone());

    let addr: SocketAddr = config.server_addr().parse().expect("invalid SERVER_HOST/SERVER_PORT");
    info!(%addr, "🎧 connection provider listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(app_state))
    .await
    .expect("server failed to start");
}

async fn health_check() -> &'static str {
    "ok"
}
