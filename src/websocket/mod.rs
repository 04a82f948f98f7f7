//! WebSocket endpoints for relay channels.
//!
//! - `/ws/cli`: producer channel; first frame must be Hello
//! - `/ws/view/{id}`: viewer channel for one session; first frame must be Join
//!
//! Both endpoints speak the binary framed protocol under the `phosphor`
//! subprotocol. Handshake errors are reported with an Error frame followed
//! by a policy-violation close.

pub mod cli;
pub mod viewer;

pub use cli::cli_ws_handler;
pub use viewer::viewer_ws_handler;

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use crate::protocol::{self, ErrorCode, ErrorMsg, FrameType};

pub(crate) const SUBPROTOCOL: &str = "phosphor";

/// How long a peer gets to send its handshake frame.
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Application-level heartbeat interval.
pub(crate) const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Create the WebSocket router.
pub fn websocket_router() -> Router {
    Router::new()
        .route("/ws/cli", get(cli_ws_handler))
        .route("/ws/view/{id}", get(viewer_ws_handler))
}

/// Sends an Error frame and closes the channel with a policy-violation
/// status.
pub(crate) async fn send_error(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: ErrorCode,
    message: &str,
) {
    if let Ok(frame) = protocol::encode_json(
        FrameType::Error,
        &ErrorMsg {
            code,
            message: message.to_owned(),
        },
    ) {
        let _ = ws_tx.send(Message::Binary(frame.into())).await;
    }
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: message.to_owned().into(),
        })))
        .await;
}

/// Reads the first binary frame from a freshly accepted channel, skipping
/// transport-level control messages. Returns `None` on timeout, transport
/// error, or peer close.
pub(crate) async fn read_handshake_frame(ws_rx: &mut SplitStream<WebSocket>) -> Option<Bytes> {
    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Binary(data)) => return Some(data),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    })
    .await;
    first.ok().flatten()
}
