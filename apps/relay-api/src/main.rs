use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::config::Config;
use relay_api::db::message_log::{MemoryMessageLog, MessageLog, PgMessageLog};
use relay_api::db::users::{MemoryUserStore, PgUserStore, UserStore};
use relay_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let (users, log): (Arc<dyn UserStore>, Arc<dyn MessageLog>) = match &config.database_url {
        Some(url) => {
            let pool = relay_api::db::pool::connect(url);
            (
                Arc::new(PgUserStore::new(pool.clone())),
                Arc::new(PgMessageLog::new(pool)),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set; accounts and messages are kept in memory");
            (Arc::new(MemoryUserStore::new()), Arc::new(MemoryMessageLog::new()))
        }
    };

    tracing::info!(
        register_enabled = config.enable_register,
        token_ttl_minutes = config.token_ttl.num_minutes(),
        frontend_dir = ?config.frontend_dir,
        "relay-api configured"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(config, users, log, shutdown_rx);
    let app = relay_api::routes::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "relay-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested; closing gateway sessions");
            let _ = shutdown_tx.send(true);
        })
        .await
        .expect("server error");
}
