//! Producer (CLI) WebSocket handler.
//!
//! Flow:
//! 1. Producer sends Hello with its auth token
//! 2. Relay verifies the token and either creates a session or revives a
//!    disconnected one (reconnect token, compared in constant time)
//! 3. Relay replies with Welcome carrying the view URL and reconnect token
//! 4. Producer output frames fan out to viewers until the channel ends
//!
//! When the read loop returns the session enters the reconnect grace
//! period rather than closing immediately.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::Extension;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::auth::{resolve_identity, Verifier};
use crate::config::RelaySettings;
use crate::protocol::{self, ErrorCode, FrameType, Hello, Resize, Welcome};
use crate::relay::{self, Hub, Outbound, Session, DEFAULT_GRACE_PERIOD};

use super::{read_handshake_frame, send_error, PING_INTERVAL, SUBPROTOCOL};

/// Producer frames may carry up to 1 MiB of terminal output.
const MAX_FRAME_BYTES: usize = 1 << 20;

const SESSION_ID_LEN: usize = 12;

/// WebSocket upgrade handler for `GET /ws/cli`.
pub async fn cli_ws_handler(
    ws: WebSocketUpgrade,
    Extension(hub): Extension<Arc<Hub>>,
    Extension(verifier): Extension<Arc<Verifier>>,
    Extension(settings): Extension<RelaySettings>,
) -> impl IntoResponse {
    ws.protocols([SUBPROTOCOL])
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_producer(socket, hub, verifier, settings))
}

async fn handle_producer(
    socket: WebSocket,
    hub: Arc<Hub>,
    verifier: Arc<Verifier>,
    settings: RelaySettings,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let data = match read_handshake_frame(&mut ws_rx).await {
        Some(data) => data,
        None => {
            send_error(&mut ws_tx, ErrorCode::InvalidMessage, "expected Hello message").await;
            return;
        }
    };

    let hello: Hello = {
        let (tag, payload) = match protocol::decode(&data) {
            Ok(decoded) => decoded,
            Err(_) => {
                send_error(&mut ws_tx, ErrorCode::InvalidMessage, "expected Hello message").await;
                return;
            }
        };
        if FrameType::from_byte(tag) != Some(FrameType::Hello) {
            send_error(&mut ws_tx, ErrorCode::InvalidMessage, "expected Hello message").await;
            return;
        }
        match protocol::decode_json(payload) {
            Ok(hello) => hello,
            Err(_) => {
                send_error(&mut ws_tx, ErrorCode::InvalidPayload, "invalid Hello payload").await;
                return;
            }
        }
    };

    let identity = match resolve_identity(&verifier, settings.dev_mode, &hello.token) {
        Ok(identity) => identity,
        Err(e) => {
            let message = format!("authentication failed: {e}");
            send_error(&mut ws_tx, ErrorCode::AuthFailed, &message).await;
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    let is_reconnect = !hello.session_id.is_empty() || !hello.reconnect_token.is_empty();
    let session: Arc<Session>;
    let session_id: String;

    if is_reconnect {
        session_id = hello.session_id.clone();
        let existing = match hub.get(&session_id) {
            Some(existing) => existing,
            None => {
                send_error(
                    &mut ws_tx,
                    ErrorCode::SessionNotFound,
                    "session does not exist or has expired",
                )
                .await;
                return;
            }
        };
        if existing.owner_provider != identity.provider || existing.owner_sub != identity.sub {
            send_error(
                &mut ws_tx,
                ErrorCode::AuthFailed,
                "session belongs to a different user",
            )
            .await;
            return;
        }
        if !existing.matches_reconnect_token(&hello.reconnect_token) {
            send_error(&mut ws_tx, ErrorCode::InvalidToken, "invalid reconnect token").await;
            return;
        }
        if !hub.reconnect(&session_id, out_tx.clone()) {
            send_error(
                &mut ws_tx,
                ErrorCode::ReconnectFailed,
                "session is not in a disconnected state",
            )
            .await;
            return;
        }
        let reconnect_token = existing.rotate_reconnect_token();
        session = existing;

        send_welcome(&mut ws_tx, &settings, &session_id, reconnect_token).await;
        info!(session = %session_id, owner = %identity.sub, "producer reconnected");
    } else {
        session_id = relay::random_id(SESSION_ID_LEN);
        let new_session = Arc::new(Session::new(
            session_id.clone(),
            identity.provider.clone(),
            identity.sub.clone(),
            out_tx.clone(),
            &hello,
        ));
        let reconnect_token = new_session.reconnect_token();
        hub.register(new_session.clone());
        session = new_session;

        send_welcome(&mut ws_tx, &settings, &session_id, reconnect_token).await;
        info!(session = %session_id, owner = %identity.sub, mode = %session.mode, "session started");
    }

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => handle_producer_frame(&session, &data),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session = %session_id, error = %e, "producer read error");
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

    info!(session = %session_id, "producer channel ended");
    hub.disconnect(&session_id, DEFAULT_GRACE_PERIOD);

    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        })))
        .await;
}

async fn send_welcome(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    settings: &RelaySettings,
    session_id: &str,
    reconnect_token: String,
) {
    let welcome = Welcome {
        session_id: session_id.to_owned(),
        view_url: format!("{}/session/{}", settings.base_url, session_id),
        reconnect_token,
    };
    if let Ok(frame) = protocol::encode_json(FrameType::Welcome, &welcome) {
        let _ = ws_tx.send(Message::Binary(frame.into())).await;
    }
}

/// Dispatches one inbound producer frame. Decode errors and unknown tags
/// are skipped so newer producers keep working against older relays.
fn handle_producer_frame(session: &Session, data: &[u8]) {
    let (tag, payload) = match protocol::decode(data) {
        Ok(decoded) => decoded,
        Err(_) => return,
    };

    match FrameType::from_byte(tag) {
        Some(FrameType::Stdout) => session.broadcast_raw(FrameType::Stdout, payload),
        Some(FrameType::Resize) => {
            if let Ok(resize) = protocol::decode_json::<Resize>(payload) {
                session.set_dimensions(resize.cols, resize.rows);
                session.broadcast_json(FrameType::Resize, &resize);
            }
        }
        Some(FrameType::Pong) => {}
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionMode;
    use uuid::Uuid;

    fn pty_session() -> (Arc<Session>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hello = Hello {
            token: String::new(),
            mode: SessionMode::Pty,
            cols: 80,
            rows: 24,
            command: "bash".into(),
            session_id: String::new(),
            reconnect_token: String::new(),
        };
        (
            Arc::new(Session::new(
                "abc123def456".into(),
                "dev".into(),
                "anonymous".into(),
                tx,
                &hello,
            )),
            rx,
        )
    }

    #[test]
    fn stdout_frames_are_broadcast() {
        let (session, _rx) = pty_session();
        let (viewer_tx, mut viewer_rx) = mpsc::unbounded_channel();
        session.add_viewer(Uuid::new_v4(), viewer_tx);

        let frame = protocol::encode_raw(FrameType::Stdout, b"output");
        handle_producer_frame(&session, &frame);

        match viewer_rx.try_recv().unwrap() {
            Outbound::Frame(frame) => {
                let (tag, payload) = protocol::decode(&frame).unwrap();
                assert_eq!(tag, FrameType::Stdout as u8);
                assert_eq!(payload, b"output");
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn resize_updates_dimensions_and_broadcasts() {
        let (session, _rx) = pty_session();
        let (viewer_tx, mut viewer_rx) = mpsc::unbounded_channel();
        session.add_viewer(Uuid::new_v4(), viewer_tx);

        let frame =
            protocol::encode_json(FrameType::Resize, &Resize { cols: 132, rows: 50 }).unwrap();
        handle_producer_frame(&session, &frame);

        assert_eq!(session.dimensions(), (132, 50));
        assert!(viewer_rx.try_recv().is_ok());
    }

    #[test]
    fn malformed_resize_payload_is_skipped() {
        let (session, _rx) = pty_session();
        let frame = protocol::encode_raw(FrameType::Resize, b"not json");
        handle_producer_frame(&session, &frame);
        assert_eq!(session.dimensions(), (80, 24));
    }

    #[test]
    fn unknown_and_empty_frames_are_skipped() {
        let (session, _rx) = pty_session();
        handle_producer_frame(&session, &[0x7f, 1, 2]);
        handle_producer_frame(&session, &[]);
        let pong = protocol::encode_empty(FrameType::Pong);
        handle_producer_frame(&session, &pong);
    }
}
