//! WebSocket upgrade handler and per-connection transport loop.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::AppState;

use super::registry::Outbound;
use super::session::{Session, SessionError};

/// How long the writer gets to flush a close frame after teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocket, Message>;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{token}", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(token): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, token, state))
}

/// Something that ends an active session from outside its receive loop.
enum Interrupt {
    Evicted,
    Shutdown,
}

async fn handle_connection(socket: WebSocket, token: String, state: AppState) {
    let send_timeout = state.config.send_timeout;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox_tx, outbox_rx) = mpsc::channel(state.config.outbox_capacity.max(1));

    let session = match Session::connect(&state, &token, outbox_tx) {
        Ok(session) => session,
        Err(err) => {
            tracing::debug!(%err, "gateway handshake rejected");
            let _ = send_close(
                &mut ws_tx,
                close_code::POLICY,
                "Invalid or expired token",
                send_timeout,
            )
            .await;
            return;
        }
    };

    let mut writer = tokio::spawn(write_outbox(ws_tx, outbox_rx, send_timeout));
    let mut writer_done = false;
    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // A slow append must not hold off eviction or shutdown.
                        tokio::select! {
                            result = session.handle_text(text.as_str()) => {
                                if let Err(err) = result {
                                    tracing::warn!(
                                        connection_id = %session.id(),
                                        username = %session.username(),
                                        %err,
                                        "inbound message dropped"
                                    );
                                }
                            }
                            interrupt = interrupted(&session, &mut shutdown) => {
                                close_for(&session, interrupt);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.id(), "ws read error");
                        break;
                    }
                }
            }

            result = &mut writer => {
                writer_done = true;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::debug!(%err, connection_id = %session.id(), "ws write failed");
                    }
                    Err(err) => {
                        tracing::warn!(?err, connection_id = %session.id(), "writer task aborted");
                    }
                }
                break;
            }

            interrupt = interrupted(&session, &mut shutdown) => {
                close_for(&session, interrupt);
                break;
            }
        }
    }

    session.teardown();
    // Dropping the session releases its outbox sender so the writer can finish.
    drop(session);

    if !writer_done && time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

async fn interrupted(session: &Session, shutdown: &mut watch::Receiver<bool>) -> Interrupt {
    tokio::select! {
        _ = session.evicted() => Interrupt::Evicted,
        _ = wait_for_shutdown(shutdown) => Interrupt::Shutdown,
    }
}

fn close_for(session: &Session, interrupt: Interrupt) {
    match interrupt {
        Interrupt::Evicted => session.request_close(close_code::AGAIN, "Connection too slow"),
        Interrupt::Shutdown => session.request_close(close_code::AWAY, "Server shutting down"),
    };
}

/// Drain a connection's outbox into its socket until the outbox closes, a
/// close frame is requested, or a write fails.
async fn write_outbox(
    mut ws_tx: WsSink,
    mut outbox: mpsc::Receiver<Outbound>,
    send_timeout: Duration,
) -> Result<(), SessionError> {
    while let Some(frame) = outbox.recv().await {
        match frame {
            Outbound::Text(text) => {
                let msg = Message::Text(text.to_string().into());
                match time::timeout(send_timeout, ws_tx.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(SessionError::Transport(e.to_string())),
                    Err(_) => return Err(SessionError::Transport("send timed out".to_string())),
                }
            }
            Outbound::Close { code, reason } => {
                let _ = send_close(&mut ws_tx, code, reason, send_timeout).await;
                return Ok(());
            }
        }
    }

    let _ = send_close(&mut ws_tx, close_code::NORMAL, "", send_timeout).await;
    Ok(())
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stopping| *stopping).await.is_ok();
    if !signalled {
        // Sender gone without a shutdown: never fire.
        std::future::pending::<()>().await;
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut WsSink,
    code: u16,
    reason: &str,
    send_timeout: Duration,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    time::timeout(send_timeout, ws_tx.send(close_msg))
        .await
        .unwrap_or_else(|_| Err(axum::Error::new("close frame timed out")))
}
