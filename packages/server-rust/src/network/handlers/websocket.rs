//! WebSocket endpoint carrying STOMP frames.
//!
//! Each WebSocket message holds exactly one frame. A channel gets one writer
//! task draining its outbound queue; inbound frames are read and handled in
//! order on the upgrade task itself.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_core::codec::is_heartbeat;
use relay_core::Frame;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::AppState;
use crate::network::{ChannelId, Outbound};
use crate::session::{Flow, Session};

/// Upgrades to a STOMP WebSocket, or answers 503 while the server is not ready.
pub async fn ws_upgrade_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if !state.shutdown.is_accepting() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    // The transport limit sits above `max_frame_size` so an oversized frame
    // still arrives and can be answered with ERROR.
    let limits = &state.config.connection;
    let transport_limit = limits.transport_message_limit();
    ws.max_message_size(transport_limit)
        .max_frame_size(transport_limit)
        .write_buffer_size(limits.ws_write_buffer_size)
        .max_write_buffer_size(limits.ws_max_write_buffer_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (handle, outbound) = state.channels.register();
    let id = handle.id;
    state.channels.open(id);
    info!(channel = %id, "channel opened");

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_outbound(sink, outbound, id));
    let mut writer_done = false;

    let mut session = Session::new(
        Arc::clone(&handle),
        Arc::clone(&state.broker),
        Arc::clone(&state.dispatcher),
    );
    let mut shutdown = state.shutdown.shutdown_receiver();

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = &mut writer => {
                // The socket failed or a close was sent; nothing more reaches the client.
                debug!(channel = %id, "writer stopped");
                writer_done = true;
                break;
            }
            _ = shutdown.wait_for(|stop| *stop) => {
                debug!(channel = %id, "shutdown, no longer reading");
                break;
            }
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(channel = %id, error = %e, "websocket receive error");
                if handle.try_send(Frame::error("receive failed", e.to_string())).is_err() {
                    debug!(channel = %id, "receive error not reported");
                }
                break;
            }
            None => break,
        };

        let flow = match message {
            Message::Text(text) => handle_raw(&state, &mut session, text.as_str().as_bytes()).await,
            Message::Binary(bytes) => handle_raw(&state, &mut session, &bytes).await,
            Message::Close(_) => break,
            // Pings are answered by axum.
            Message::Ping(_) | Message::Pong(_) => Flow::Continue,
        };
        if flow == Flow::Disconnect {
            break;
        }
    }
    drop(session);

    // Stop accepting frames, then let the writer flush what is queued.
    state.channels.begin_close(id);
    handle.request_close(None);
    if !writer_done {
        let flush_timeout = state.config.connection.flush_timeout;
        if tokio::time::timeout(flush_timeout, &mut writer).await.is_err() {
            debug!(channel = %id, "flush timed out");
            writer.abort();
        }
    }

    state.channels.close(id);
    let session = handle.metadata.read().session.clone();
    info!(channel = %id, session = session.as_deref().unwrap_or("-"), "channel closed");
}

async fn handle_raw(state: &AppState, session: &mut Session, raw: &[u8]) -> Flow {
    if is_heartbeat(raw) {
        return Flow::Continue;
    }
    let limit = state.config.connection.max_frame_size;
    if raw.len() > limit {
        session.reject_oversized(raw.len(), limit);
        return Flow::Continue;
    }
    let _in_flight = state.shutdown.in_flight_guard();

    match Frame::parse(raw) {
        Ok(frame) => {
            debug!(channel = %session.id(), command = %frame.command(), "frame received");
            session.handle(frame).await
        }
        Err(e) => {
            session.reject_malformed(&e);
            Flow::Continue
        }
    }
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    id: ChannelId,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(encode(&frame)).await {
                    debug!(channel = %id, error = %e, "websocket send failed");
                    return;
                }
            }
            Outbound::Close(reason) => {
                let close = reason.map(|reason| CloseFrame {
                    code: close_code::AWAY,
                    reason: reason.into(),
                });
                // The peer may already be gone.
                let _ = sink.send(Message::Close(close)).await;
                return;
            }
        }
    }
}

/// Frames go out as text messages unless a body makes them invalid UTF-8.
fn encode(frame: &Frame) -> Message {
    let bytes = frame.serialize();
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(bytes),
    }
}
