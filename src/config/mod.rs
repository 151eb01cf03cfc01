use std::env;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for environment variable {0}: {1}")]
    Invalid(&'static str, String),
}

/// Startup configuration, loaded once from the environment (`.env` is
/// loaded first if present, matching the teacher's `dotenvy` bootstrap).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,

    /// This server instance's id — stamped into every `ConnectionRecord`
    /// it owns (§3 `serverId`), and used to reject foreign-owned sends.
    pub server_id: Arc<str>,

    /// Base URL this server is externally reachable at, used to build each
    /// connection's `reportUrl` (§3, §4.1 step 4).
    pub endpoint_base: String,

    /// Path segment the connection provider is mounted under, e.g. `connection`.
    pub provider_route: String,

    /// Secret used to sign/verify connection tokens (the Token Broker's
    /// facade over the external connection-token issuer/verifier, §2.2).
    pub connection_token_secret: Arc<str>,

    /// Connection-token lifetime in seconds — 60 per §5.
    pub connection_token_ttl_secs: i64,

    /// Heartbeat tick interval in milliseconds — 30000 per §4.4.
    pub heartbeat_interval_ms: u64,

    /// Default client-side reconnect interval in seconds — 30 per §4.10.
    pub reconnect_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: require("DATABASE_URL")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: parse_or("SERVER_PORT", 8080)?,
            server_id: Arc::from(
                env::var("SERVER_ID").unwrap_or_else(|_| format!("srv-{}", uuid::Uuid::new_v4())),
            ),
            endpoint_base: env::var("ENDPOINT_BASE")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            provider_route: env::var("PROVIDER_ROUTE").unwrap_or_else(|_| "connection".to_string()),
            connection_token_secret: Arc::from(
                env::var("CONNECTION_TOKEN_SECRET")
                    .unwrap_or_else(|_| "dev_secret_change_in_production".to_string()),
            ),
            connection_token_ttl_secs: parse_or("CONNECTION_TOKEN_TTL_SECS", 60)?,
            heartbeat_interval_ms: parse_or("HEARTBEAT_INTERVAL_MS", 30_000)?,
            reconnect_interval_secs: parse_or("RECONNECT_INTERVAL_SECS", 30)?,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// The absolute URL a connection token's `reportUrl` points at for the
    /// WebSocket upgrade endpoint (§4.1 step 4).
    pub fn report_url(&self) -> String {
        format!(
            "{}/{}/connect",
            self.endpoint_base.trim_end_matches('/'),
            self.provider_route
        )
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name, v.clone())),
        Err(_) => Ok(default),
    }
}
