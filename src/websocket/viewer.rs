//! Viewer (browser) WebSocket handler.
//!
//! A viewer attaches to one session, identified by the URL path; the path
//! is authoritative over whatever session id the Join payload carries. Only
//! the session owner may attach. Viewer input reaches the producer only in
//! pty mode; pipe sessions drop it silently.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Path};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{resolve_identity, Verifier};
use crate::config::RelaySettings;
use crate::protocol::{self, ErrorCode, FrameType, Join, Joined, SessionMode};
use crate::relay::{Hub, Outbound, Session};

use super::{read_handshake_frame, send_error, PING_INTERVAL, SUBPROTOCOL};

/// Viewer frames are small (keystrokes, resizes).
const MAX_FRAME_BYTES: usize = 64 << 10;

/// WebSocket upgrade handler for `GET /ws/view/{id}`.
pub async fn viewer_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Extension(hub): Extension<Arc<Hub>>,
    Extension(verifier): Extension<Arc<Verifier>>,
    Extension(settings): Extension<RelaySettings>,
) -> impl IntoResponse {
    ws.protocols([SUBPROTOCOL])
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_viewer(socket, session_id, hub, verifier, settings))
}

async fn handle_viewer(
    socket: WebSocket,
    session_id: String,
    hub: Arc<Hub>,
    verifier: Arc<Verifier>,
    settings: RelaySettings,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let data = match read_handshake_frame(&mut ws_rx).await {
        Some(data) => data,
        None => {
            send_error(&mut ws_tx, ErrorCode::InvalidMessage, "expected Join message").await;
            return;
        }
    };

    let mut join: Join = {
        let (tag, payload) = match protocol::decode(&data) {
            Ok(decoded) => decoded,
            Err(_) => {
                send_error(&mut ws_tx, ErrorCode::InvalidMessage, "expected Join message").await;
                return;
            }
        };
        if FrameType::from_byte(tag) != Some(FrameType::Join) {
            send_error(&mut ws_tx, ErrorCode::InvalidMessage, "expected Join message").await;
            return;
        }
        match protocol::decode_json(payload) {
            Ok(join) => join,
            Err(_) => {
                send_error(&mut ws_tx, ErrorCode::InvalidPayload, "invalid Join payload").await;
                return;
            }
        }
    };

    // The URL path names the session; the payload field is advisory.
    join.session_id = session_id.clone();

    let identity = match resolve_identity(&verifier, settings.dev_mode, &join.token) {
        Ok(identity) => identity,
        Err(e) => {
            let message = format!("authentication failed: {e}");
            send_error(&mut ws_tx, ErrorCode::AuthFailed, &message).await;
            return;
        }
    };

    let session = match hub.get(&join.session_id) {
        Some(session) => session,
        None => {
            send_error(&mut ws_tx, ErrorCode::SessionNotFound, "session not found").await;
            return;
        }
    };

    if identity.provider != session.owner_provider || identity.sub != session.owner_sub {
        send_error(&mut ws_tx, ErrorCode::Forbidden, "you do not own this session").await;
        return;
    }

    let viewer_id = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    if !session.add_viewer(viewer_id, out_tx) {
        send_error(&mut ws_tx, ErrorCode::SessionFull, "maximum viewers reached").await;
        return;
    }

    let (cols, rows) = session.dimensions();
    let joined = Joined {
        mode: session.mode,
        cols,
        rows,
        command: session.command.clone(),
    };
    if let Ok(frame) = protocol::encode_json(FrameType::Joined, &joined) {
        let _ = ws_tx.send(Message::Binary(frame.into())).await;
    }

    session.notify_viewer_count();
    info!(session = %session_id, viewer = %viewer_id, "viewer joined");

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => handle_viewer_frame(&session, &data),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session = %session_id, viewer = %viewer_id, error = %e, "viewer read error");
                        break;
                    }
                }
            }
            out = out_rx.recv() => {
                match out {
                    Some(Outbound::Frame(frame)) => {
                        if ws_tx.send(Message::Binary(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                let frame = protocol::encode_empty(FrameType::Ping);
                if ws_tx.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.remove_viewer(&viewer_id);
    session.notify_viewer_count();
    info!(session = %session_id, viewer = %viewer_id, "viewer left");
}

/// Dispatches one inbound viewer frame. Unknown tags and decode errors are
/// skipped.
fn handle_viewer_frame(session: &Session, data: &[u8]) {
    let (tag, payload) = match protocol::decode(data) {
        Ok(decoded) => decoded,
        Err(_) => return,
    };

    match FrameType::from_byte(tag) {
        Some(FrameType::Stdin) => {
            // Input only flows back in pty mode; pipe sessions are view-only.
            if session.mode == SessionMode::Pty {
                if let Err(e) = session.send_to_producer_raw(FrameType::Stdin, payload) {
                    debug!(session = %session.id, error = %e, "stdin forward failed");
                }
            }
        }
        Some(FrameType::Resize) => {
            if let Err(e) = session.send_to_producer_raw(FrameType::Resize, payload) {
                debug!(session = %session.id, error = %e, "resize forward failed");
            }
        }
        Some(FrameType::Pong) => {}
        _ => {}
    }
}
