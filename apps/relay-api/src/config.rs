use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;

/// Relay configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC secret used to sign bearer tokens.
    pub secret_key: String,
    /// PostgreSQL connection string. In-memory stores are used when unset.
    pub database_url: Option<String>,
    /// Lifetime of issued bearer tokens.
    pub token_ttl: Duration,
    /// Whether `POST /register` is mounted.
    pub enable_register: bool,
    /// Origins allowed by the CORS layer. Empty disables CORS entirely.
    pub allow_origins: Vec<String>,
    /// Directory of static frontend assets served as the router fallback.
    pub frontend_dir: Option<PathBuf>,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Frames buffered per gateway connection before it counts as backlogged.
    pub outbox_capacity: usize,
    /// A single socket write slower than this fails the connection.
    pub send_timeout: StdDuration,
    /// A message log append slower than this drops the message.
    pub store_timeout: StdDuration,
}

impl Config {
    /// Defaults for everything except the signing secret.
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            database_url: None,
            token_ttl: Duration::minutes(30),
            enable_register: true,
            allow_origins: Vec::new(),
            frontend_dir: None,
            port: 8000,
            outbox_capacity: 256,
            send_timeout: StdDuration::from_secs(10),
            store_timeout: StdDuration::from_secs(10),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let mut config = Self::new(required_var("SECRET_KEY"));

        config.database_url = optional_var("DATABASE_URL");
        if let Some(minutes) = optional_var("ACCESS_TOKEN_EXPIRE_MINUTES").and_then(|v| v.parse().ok()) {
            config.token_ttl = Duration::minutes(minutes);
        }
        if let Some(flag) = optional_var("ENABLE_REGISTER") {
            config.enable_register = flag.eq_ignore_ascii_case("true");
        }
        config.allow_origins = optional_var("ALLOW_ORIGINS")
            .map(|v| parse_origins(&v))
            .unwrap_or_default();
        config.frontend_dir = optional_var("FRONTEND_DIR").map(PathBuf::from);
        if let Some(port) = optional_var("PORT").and_then(|v| v.parse().ok()) {
            config.port = port;
        }
        if let Some(capacity) = optional_var("WS_OUTBOX_CAPACITY")
            .and_then(|v| v.parse().ok())
            .filter(|c: &usize| *c > 0)
        {
            config.outbox_capacity = capacity;
        }
        if let Some(secs) = optional_var("WS_SEND_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.send_timeout = StdDuration::from_secs(secs);
        }
        if let Some(secs) = optional_var("STORE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.store_timeout = StdDuration::from_secs(secs);
        }

        config
    }
}

fn required_var(name: &str) -> String {
    optional_var(name).unwrap_or_else(|| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
