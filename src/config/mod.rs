use std::env;
use std::time::Duration;

use once_cell::sync::Lazy;

/// Process configuration, read once from the environment. `DATABASE_URL` is
/// deliberately not here: the connection layer reads it so that a missing
/// value fails at connect time with a useful error.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub query_timeout: Duration,
    pub acquire_timeout: Duration,
    pub pool_size: u32,
    pub dedicated_pool_size: u32,
    pub default_max_rows: i32,
    pub admin_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self::defaults();
        if let Ok(v) = env::var("POSTGATE_HOST") {
            config.host = v;
        }
        if let Ok(v) = env::var("POSTGATE_PORT") {
            config.port = v.parse().unwrap_or(config.port);
        }
        if let Ok(v) = env::var("POSTGATE_QUERY_TIMEOUT_SECS") {
            config.query_timeout = v
                .parse()
                .map(Duration::from_secs)
                .unwrap_or(config.query_timeout);
        }
        if let Ok(v) = env::var("POSTGATE_ACQUIRE_TIMEOUT_SECS") {
            config.acquire_timeout = v
                .parse()
                .map(Duration::from_secs)
                .unwrap_or(config.acquire_timeout);
        }
        if let Ok(v) = env::var("POSTGATE_POOL_SIZE") {
            config.pool_size = v.parse().unwrap_or(config.pool_size);
        }
        if let Ok(v) = env::var("POSTGATE_DEDICATED_POOL_SIZE") {
            config.dedicated_pool_size = v.parse().unwrap_or(config.dedicated_pool_size);
        }
        if let Ok(v) = env::var("POSTGATE_DEFAULT_MAX_ROWS") {
            config.default_max_rows = v.parse().unwrap_or(config.default_max_rows);
        }
        if let Ok(v) = env::var("POSTGATE_ADMIN_TOKEN") {
            if !v.is_empty() {
                config.admin_token = Some(v);
            }
        }
        config
    }

    fn defaults() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            query_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(5),
            pool_size: 10,
            dedicated_pool_size: 2,
            default_max_rows: 1000,
            admin_token: None,
        }
    }
}

pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}
