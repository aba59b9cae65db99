pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use auth::tokens::TokenIssuer;
use config::Config;
use db::message_log::MessageLog;
use db::users::UserStore;
use gateway::fanout::Broadcaster;
use gateway::registry::ConnectionRegistry;
use relay_common::SnowflakeGenerator;
use tokio::sync::watch;

/// Shared application state available to all route handlers and gateway
/// sessions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenIssuer>,
    pub users: Arc<dyn UserStore>,
    pub log: Arc<dyn MessageLog>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Broadcaster,
    pub snowflake: Arc<SnowflakeGenerator>,
    /// Flips to `true` once the server starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        config: Config,
        users: Arc<dyn UserStore>,
        log: Arc<dyn MessageLog>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let tokens = TokenIssuer::new(&config.secret_key, config.token_ttl);
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        Self {
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            users,
            log,
            registry,
            broadcaster,
            snowflake: Arc::new(SnowflakeGenerator::new(0)),
            shutdown,
        }
    }
}
