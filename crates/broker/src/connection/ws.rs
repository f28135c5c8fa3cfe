// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket upgrade handler and the per-connection read/write loops.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Connection, ConnectionAgent, Outbound};

/// `GET /` (any path): upgrade to a broker client connection.
pub async fn ws_handler(
    State(agent): State<Arc<ConnectionAgent>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, agent))
}

async fn handle_ws(socket: WebSocket, agent: Arc<ConnectionAgent>) {
    let (sink, mut stream) = socket.split();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let conn = agent.accept(frames_tx);
    let writer = tokio::spawn(write_loop(Arc::clone(&conn), sink, frames_rx));

    loop {
        tokio::select! {
            _ = conn.cancelled() => break,

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => agent.on_frame(&conn, text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => agent.on_frame(&conn, text),
                        Err(_) => tracing::debug!(client_id = conn.id(), "dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Pong(_))) => conn.mark_alive(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(client_id = conn.id(), err = %e, "websocket read failed");
                        break;
                    }
                    // Pings are answered by the transport.
                    Some(Ok(Message::Ping(_))) => {}
                }
            }
        }
    }

    agent.disconnect(&conn);
    let _ = writer.await;
}

/// Owns the socket sink; writes frames in order and reports batch completion.
async fn write_loop(
    conn: Arc<Connection>,
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::UnboundedReceiver<Outbound>,
) {
    loop {
        let frame = tokio::select! {
            _ = conn.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match frame {
            Outbound::Batch { payload, count, size } => {
                let started = Instant::now();
                let sent = sink.send(Message::Text(payload.into())).await;
                conn.complete_send(size, count, started.elapsed());
                if let Err(e) = sent {
                    tracing::debug!(client_id = conn.id(), err = %e, "websocket write failed");
                    break;
                }
            }
            Outbound::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Ping => {
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    // Wake the reader so the connection is torn down.
    conn.terminate();
}
