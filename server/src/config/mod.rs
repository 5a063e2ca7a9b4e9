use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub mod cors;
pub mod security;

pub use cors::{create_cors_layer, DEFAULT_ALLOWED_ORIGINS};
pub use security::SecurityHeadersLayer;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_KEEPALIVE_SECS: u64 = 15;
const DEFAULT_SWEEP_SECS: u64 = 60;
const DEFAULT_MAX_NOTIFICATION_PAGE: usize = 100;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means the process keeps everything in memory.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub sse_keepalive: Duration,
    pub start_sweep_every: Duration,
    pub max_notification_page: usize,
    pub cors_allowed_origins: String,
    /// `RUST_ENV=production` turns on HSTS.
    pub production: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            sse_keepalive: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            start_sweep_every: Duration::from_secs(DEFAULT_SWEEP_SECS),
            max_notification_page: DEFAULT_MAX_NOTIFICATION_PAGE,
            cors_allowed_origins: DEFAULT_ALLOWED_ORIGINS.to_string(),
            production: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let bind = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind.parse().unwrap_or_else(|e| {
            tracing::warn!("Config: invalid BIND_ADDR '{}': {}, using {}", bind, e, DEFAULT_BIND_ADDR);
            Config::default().bind_addr
        });

        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            bind_addr,
            sse_keepalive: Duration::from_secs(
                parse_or("SSE_KEEPALIVE_SECS", DEFAULT_KEEPALIVE_SECS).max(1),
            ),
            start_sweep_every: Duration::from_secs(
                parse_or("START_SWEEP_SECS", DEFAULT_SWEEP_SECS).max(1),
            ),
            max_notification_page: parse_or("MAX_NOTIFICATION_PAGE", DEFAULT_MAX_NOTIFICATION_PAGE)
                .max(1),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string()),
            production: env::var("RUST_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Config: ignoring invalid {}='{}'", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.database_url.is_none());
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.sse_keepalive, Duration::from_secs(15));
        assert_eq!(config.max_notification_page, 100);
    }

    #[test]
    fn test_parse_or_falls_back_on_garbage() {
        std::env::set_var("SEGUNDA_TEST_GARBAGE", "soon");
        assert_eq!(parse_or("SEGUNDA_TEST_GARBAGE", 7u64), 7);
        std::env::set_var("SEGUNDA_TEST_GARBAGE", " 9 ");
        assert_eq!(parse_or("SEGUNDA_TEST_GARBAGE", 7u64), 9);
        std::env::remove_var("SEGUNDA_TEST_GARBAGE");
        assert_eq!(parse_or("SEGUNDA_TEST_GARBAGE", 7u64), 7);
    }
}
