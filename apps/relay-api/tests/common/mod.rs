#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;

use relay_api::config::Config;
use relay_api::db::message_log::{MemoryMessageLog, MessageLog};
use relay_api::db::users::MemoryUserStore;
use relay_api::AppState;

pub const TEST_SECRET: &str = "relay-test-secret";

/// Build a test AppState backed by in-memory stores.
///
/// The returned sender is the shutdown switch; keep it alive for as long as
/// the state is in use.
pub fn test_state_with(config: Config) -> (AppState, watch::Sender<bool>) {
    test_state_with_log(config, Arc::new(MemoryMessageLog::new()))
}

/// Like [`test_state_with`], with a caller-supplied message log.
pub fn test_state_with_log(
    config: Config,
    log: Arc<dyn MessageLog>,
) -> (AppState, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(config, Arc::new(MemoryUserStore::new()), log, shutdown_rx);
    (state, shutdown_tx)
}

pub fn test_state() -> (AppState, watch::Sender<bool>) {
    test_state_with(Config::new(TEST_SECRET))
}

/// Build the full application router wired to a fresh test state.
pub fn test_app() -> (Router, AppState, watch::Sender<bool>) {
    let (state, shutdown) = test_state();
    let app = relay_api::routes::app(state.clone());
    (app, state, shutdown)
}

/// Register an account and log it in, returning the access token.
pub async fn register_and_login(
    server: &axum_test::TestServer,
    username: &str,
    password: &str,
) -> String {
    server
        .post("/register")
        .json(&serde_json::json!({ "username": username, "password": password }))
        .await
        .assert_status_ok();

    let resp = server
        .post("/login")
        .json(&serde_json::json!({ "username": username, "password": password }))
        .await;
    resp.assert_status_ok();
    resp.json::<serde_json::Value>()["access_token"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background until the test's runtime shuts down.
pub async fn start_ws_server() -> (SocketAddr, AppState, watch::Sender<bool>) {
    let (state, shutdown) = test_state();
    let addr = serve(state.clone()).await;
    (addr, state, shutdown)
}

/// Serve `state` on an ephemeral local port.
pub async fn serve(state: AppState) -> SocketAddr {
    let app = relay_api::routes::app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}
