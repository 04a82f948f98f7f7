//! Per-session state and fan-out.
//!
//! A session couples one producer connection to a bounded set of viewer
//! connections. The session never writes to a socket directly: each
//! connection registers an unbounded sender, and the connection's own task
//! drains queued [`Outbound`] items into its WebSocket. All state lives
//! behind one mutex, and the mutex is never held across a channel push to
//! more than a snapshot of receivers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{
    self, FrameType, Hello, ReconnectState, ReconnectStatus, SessionMode, ViewerCount,
};
use crate::relay::random_secret;

/// Maximum number of concurrently attached viewers per session.
pub const MAX_VIEWERS: usize = 10;

/// An item queued for delivery on a connection's WebSocket.
#[derive(Debug)]
pub enum Outbound {
    /// An encoded frame to send as one binary message.
    Frame(Vec<u8>),
    /// Close the socket with the given status code and reason.
    Close { code: u16, reason: String },
}

/// Write handle for a producer or viewer connection.
pub type FrameSender = mpsc::UnboundedSender<Outbound>;

/// Session-level failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("producer disconnected")]
    ProducerDisconnected,

    #[error("producer channel closed")]
    ChannelClosed,
}

/// An active terminal-sharing session.
pub struct Session {
    pub id: String,
    pub owner_provider: String,
    pub owner_sub: String,
    pub mode: SessionMode,
    pub command: String,

    state: Mutex<SessionState>,
}

struct SessionState {
    cols: u16,
    rows: u16,
    reconnect_token: String,
    producer: Option<FrameSender>,
    producer_disconnected: bool,
    disconnected_at: Option<Instant>,
    viewers: HashMap<Uuid, FrameSender>,
    closed: bool,
}

impl Session {
    /// Creates a session with a freshly generated reconnect token.
    pub fn new(
        id: String,
        owner_provider: String,
        owner_sub: String,
        producer: FrameSender,
        hello: &Hello,
    ) -> Self {
        Self {
            id,
            owner_provider,
            owner_sub,
            mode: hello.mode,
            command: hello.command.clone(),
            state: Mutex::new(SessionState {
                cols: hello.cols,
                rows: hello.rows,
                reconnect_token: random_secret(),
                producer: Some(producer),
                producer_disconnected: false,
                disconnected_at: None,
                viewers: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last known terminal dimensions.
    pub fn dimensions(&self) -> (u16, u16) {
        let state = self.state();
        (state.cols, state.rows)
    }

    pub fn set_dimensions(&self, cols: u16, rows: u16) {
        let mut state = self.state();
        state.cols = cols;
        state.rows = rows;
    }

    /// Current reconnect token. Rotated on every successful reconnect.
    pub fn reconnect_token(&self) -> String {
        self.state().reconnect_token.clone()
    }

    /// Constant-time comparison of a presented reconnect token.
    pub fn matches_reconnect_token(&self, presented: &str) -> bool {
        let state = self.state();
        let stored = state.reconnect_token.as_bytes();
        let presented = presented.as_bytes();
        if stored.len() != presented.len() {
            return false;
        }
        stored.ct_eq(presented).into()
    }

    /// Replaces the reconnect token with a fresh secret and returns it. The
    /// previous token stops being accepted immediately.
    pub fn rotate_reconnect_token(&self) -> String {
        let mut state = self.state();
        state.reconnect_token = random_secret();
        state.reconnect_token.clone()
    }

    /// Attaches a viewer. Returns false when the session is closed or the
    /// viewer cap is reached.
    pub fn add_viewer(&self, viewer_id: Uuid, sender: FrameSender) -> bool {
        let mut state = self.state();
        if state.closed || state.viewers.len() >= MAX_VIEWERS {
            return false;
        }
        state.viewers.insert(viewer_id, sender);
        true
    }

    /// Detaches a viewer. Unknown ids are ignored.
    pub fn remove_viewer(&self, viewer_id: &Uuid) {
        self.state().viewers.remove(viewer_id);
    }

    pub fn viewer_count(&self) -> usize {
        self.state().viewers.len()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state().producer_disconnected
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// How long the producer has been gone, if it is.
    pub fn disconnected_since(&self) -> Option<Instant> {
        self.state().disconnected_at
    }

    /// Broadcasts a raw-payload frame to all viewers.
    pub fn broadcast_raw(&self, frame_type: FrameType, data: &[u8]) {
        self.broadcast_frame(protocol::encode_raw(frame_type, data));
    }

    /// Broadcasts a JSON-payload frame to all viewers.
    pub fn broadcast_json<T: Serialize>(&self, frame_type: FrameType, payload: &T) {
        match protocol::encode_json(frame_type, payload) {
            Ok(frame) => self.broadcast_frame(frame),
            Err(e) => warn!(session = %self.id, error = %e, "encode broadcast failed"),
        }
    }

    /// Encodes once, snapshots the viewer set under the lock, and queues the
    /// frame to each viewer outside it. Failed sends are logged; the viewer
    /// is removed by its own handler when it observes the channel error.
    fn broadcast_frame(&self, frame: Vec<u8>) {
        let viewers: Vec<(Uuid, FrameSender)> = {
            let state = self.state();
            if state.closed {
                return;
            }
            state
                .viewers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        for (viewer_id, sender) in viewers {
            if sender.send(Outbound::Frame(frame.clone())).is_err() {
                debug!(session = %self.id, viewer = %viewer_id, "viewer write failed");
            }
        }
    }

    /// Queues a raw-payload frame for the producer.
    pub fn send_to_producer_raw(
        &self,
        frame_type: FrameType,
        data: &[u8],
    ) -> Result<(), SessionError> {
        self.send_to_producer_frame(protocol::encode_raw(frame_type, data))
    }

    /// Queues a JSON-payload frame for the producer.
    pub fn send_to_producer_json<T: Serialize>(
        &self,
        frame_type: FrameType,
        payload: &T,
    ) -> Result<(), SessionError> {
        let frame = protocol::encode_json(frame_type, payload)
            .map_err(|_| SessionError::ChannelClosed)?;
        self.send_to_producer_frame(frame)
    }

    fn send_to_producer_frame(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        let sender = {
            let state = self.state();
            if state.producer_disconnected {
                return Err(SessionError::ProducerDisconnected);
            }
            state
                .producer
                .clone()
                .ok_or(SessionError::ProducerDisconnected)?
        };
        sender
            .send(Outbound::Frame(frame))
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Sends the current viewer count to the producer.
    pub fn notify_viewer_count(&self) {
        let count = self.viewer_count();
        if let Err(e) = self.send_to_producer_json(FrameType::ViewerCount, &ViewerCount { count }) {
            debug!(session = %self.id, error = %e, "viewer count notify failed");
        }
    }

    /// Marks the producer as gone and tells viewers. A no-op when the
    /// producer is already marked disconnected.
    pub fn mark_disconnected(&self) {
        {
            let mut state = self.state();
            if state.producer_disconnected {
                return;
            }
            state.producer_disconnected = true;
            state.disconnected_at = Some(Instant::now());
            state.producer = None;
        }
        self.broadcast_json(
            FrameType::Reconnect,
            &ReconnectStatus {
                status: ReconnectState::Disconnected,
            },
        );
    }

    /// Installs a new producer connection and tells viewers.
    pub fn replace_producer(&self, sender: FrameSender) {
        {
            let mut state = self.state();
            state.producer = Some(sender);
            state.producer_disconnected = false;
            state.disconnected_at = None;
        }
        self.broadcast_json(
            FrameType::Reconnect,
            &ReconnectStatus {
                status: ReconnectState::Reconnected,
            },
        );
    }

    /// Ends the session: every viewer receives an End frame followed by a
    /// normal close, and the viewer set is cleared. Idempotent. The producer
    /// channel is left for its handler to tear down.
    pub fn close(&self) {
        let viewers: Vec<FrameSender> = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.viewers.drain().map(|(_, tx)| tx).collect()
        };

        let end = protocol::encode_empty(FrameType::End);
        for sender in viewers {
            let _ = sender.send(Outbound::Frame(end.clone()));
            let _ = sender.send(Outbound::Close {
                code: 1000,
                reason: "session ended".into(),
            });
        }
    }
}
