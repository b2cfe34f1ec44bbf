//! WebSocket session lifecycle: one upgraded subscriber from upgrade
//! through disconnect.

use std::io::Cursor;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::protocol::{InboundFrame, WebSocketHandle};
use crate::broadcast::OutboundFrame;
use crate::context::{ConnectionGuard, PushContext};

/// Run a WebSocket session for a bound connection.
///
/// Outbound frames from `rx` are written as text messages, with periodic
/// pings; a client silent for longer than the heartbeat timeout is
/// dropped. Inbound frames are normalized and dispatched as publishes.
/// Dropping `guard` at the end detaches the connection everywhere.
#[instrument(skip_all, fields(conn_id = %guard.connection().id))]
pub async fn run_ws_session(
    socket: WebSocket,
    ctx: Arc<PushContext>,
    guard: ConnectionGuard,
    mut rx: mpsc::Receiver<OutboundFrame>,
) {
    let conn = Arc::clone(guard.connection());
    let ws = WebSocketHandle::new(&conn);
    let (mut ws_tx, mut ws_rx) = socket.split();
    ctx.normalizer.on_open(&ws);

    let outbound_conn = Arc::clone(&conn);
    let cancel = ctx.shutdown_token();
    let ping_every = ctx.config.heartbeat_interval;
    let pong_timeout = ctx.config.heartbeat_timeout;
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let text = String::clone(&frame.payload);
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive() && outbound_conn.last_pong_elapsed() > pong_timeout {
                        warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                () = cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let stream_frames = ctx.config.normalizer.stream_frames;
    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = &mut outbound => break,
        };
        let frame = match msg {
            Some(Ok(Message::Text(text))) => {
                let text = text.as_str().to_owned();
                if stream_frames {
                    InboundFrame::TextStream(Box::pin(Cursor::new(text.into_bytes())))
                } else {
                    InboundFrame::TextMessage(text)
                }
            }
            Some(Ok(Message::Binary(data))) => {
                if stream_frames {
                    InboundFrame::BinaryStream(Box::pin(Cursor::new(data)))
                } else {
                    let length = data.len();
                    InboundFrame::BinaryMessage {
                        data,
                        offset: 0,
                        length,
                    }
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                conn.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!("client sent close");
                break;
            }
            Some(Err(e)) => {
                ctx.normalizer.on_error(&ws, &e.to_string());
                break;
            }
        };

        for request in ctx.normalizer.on_frame(&ws, frame) {
            if let Err(e) = ctx.dispatch(request).await {
                warn!(error = %e, "websocket message rejected");
            }
        }
    }

    ctx.normalizer.on_close(&ws);
    outbound.abort();
    drop(guard);
}
