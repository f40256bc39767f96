//! WebSocket transport for the tutoring session engine (spec §4.6): one
//! socket per session, `hello` as the literal first frame — no separate
//! connect/challenge handshake, no fan-out broadcaster. The per-connection
//! task shape (split socket, `tokio::select!` between inbound and
//! outbound, drop on either side closing) follows the teacher's
//! `ws/connection.rs`; everything auth- and broadcast-related is gone
//! because the new protocol doesn't have it.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use recall_protocol::{ClientFrame, ServerFrame};
use recall_session::SubmitOutcome;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;

const OUTBOUND_BUFFER: usize = 64;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut tx, mut rx) = socket.split();

    let hello = match rx.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(err) => {
                send_error(&mut tx, "invalid_frame", &err.to_string()).await;
                return;
            }
        },
        _ => return,
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);
    let handle = match recall_session::start(hello, state.collaborators(), outbound_tx).await {
        Ok(handle) => handle,
        Err(err) => {
            send_error(&mut tx, err.code(), &err.to_string()).await;
            return;
        }
    };

    info!("session connection established");

    loop {
        tokio::select! {
            inbound = rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let frame: ClientFrame = match serde_json::from_str(&text) {
                            Ok(f) => f,
                            Err(err) => {
                                send_error(&mut tx, "invalid_frame", &err.to_string()).await;
                                continue;
                            }
                        };
                        if let SubmitOutcome::Busy = handle.submit(frame) {
                            send_frame(&mut tx, &ServerFrame::Busy).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "websocket read error");
                        break;
                    }
                    _ => {}
                }
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if !send_frame(&mut tx, &frame).await {
                            break;
                        }
                    }
                    // engine task ended (session completed/abandoned/errored)
                    None => break,
                }
            }
        }
    }

    info!("session connection closed");
}

async fn send_frame(tx: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => tx.send(Message::Text(json.into())).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to encode outbound frame");
            false
        }
    }
}

async fn send_error(tx: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), code: &str, message: &str) {
    send_frame(tx, &ServerFrame::Error { code: code.to_string(), message: message.to_string() }).await;
}
