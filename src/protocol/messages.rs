//! Frame tags and typed payloads.

use serde::{Deserialize, Serialize};

/// Frame type tags. The set is closed; unknown bytes are skipped by read
/// loops for forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Producer → viewers: raw terminal output.
    Stdout = 0x01,
    /// Viewer → producer: raw terminal input.
    Stdin = 0x02,
    /// Terminal dimensions changed.
    Resize = 0x03,
    /// Producer handshake.
    Hello = 0x10,
    /// Relay reply to a successful Hello.
    Welcome = 0x11,
    /// Viewer handshake.
    Join = 0x12,
    /// Relay reply to a successful Join.
    Joined = 0x13,
    /// Producer connectivity change, sent to viewers.
    Reconnect = 0x14,
    /// Session ended; no payload.
    End = 0x15,
    /// Error report, followed by a policy-violation close.
    Error = 0x16,
    /// Current viewer count, sent to the producer.
    ViewerCount = 0x20,
    /// Session mode notification. Reserved; never emitted by the relay.
    Mode = 0x21,
    /// Heartbeat; no payload.
    Ping = 0x30,
    /// Heartbeat reply; no payload.
    Pong = 0x31,
}

impl FrameType {
    /// Maps a tag byte back to its frame type.
    pub fn from_byte(byte: u8) -> Option<FrameType> {
        match byte {
            0x01 => Some(FrameType::Stdout),
            0x02 => Some(FrameType::Stdin),
            0x03 => Some(FrameType::Resize),
            0x10 => Some(FrameType::Hello),
            0x11 => Some(FrameType::Welcome),
            0x12 => Some(FrameType::Join),
            0x13 => Some(FrameType::Joined),
            0x14 => Some(FrameType::Reconnect),
            0x15 => Some(FrameType::End),
            0x16 => Some(FrameType::Error),
            0x20 => Some(FrameType::ViewerCount),
            0x21 => Some(FrameType::Mode),
            0x30 => Some(FrameType::Ping),
            0x31 => Some(FrameType::Pong),
            _ => None,
        }
    }
}

/// Session interaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Bidirectional: viewers may inject input.
    Pty,
    /// View-only: viewer input is silently dropped.
    Pipe,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Pty => write!(f, "pty"),
            SessionMode::Pipe => write!(f, "pipe"),
        }
    }
}

/// Sent by the producer when connecting. A non-empty `session_id` or
/// `reconnect_token` marks the frame as a reconnect attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub token: String,
    pub mode: SessionMode,
    #[serde(default)]
    pub cols: u16,
    #[serde(default)]
    pub rows: u16,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reconnect_token: String,
}

/// Relay reply to a successful Hello.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Welcome {
    pub session_id: String,
    pub view_url: String,
    pub reconnect_token: String,
}

/// Sent by a viewer to attach to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Join {
    pub token: String,
    #[serde(default)]
    pub session_id: String,
}

/// Relay reply to a successful Join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Joined {
    pub mode: SessionMode,
    pub cols: u16,
    pub rows: u16,
    pub command: String,
}

/// Terminal dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Resize {
    pub cols: u16,
    pub rows: u16,
}

/// Producer connectivity state, broadcast to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectState {
    Disconnected,
    Reconnected,
}

/// Payload of a Reconnect frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectStatus {
    pub status: ReconnectState,
}

/// Machine-readable error codes carried in Error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidMessage,
    InvalidPayload,
    AuthFailed,
    SessionNotFound,
    InvalidToken,
    ReconnectFailed,
    SessionFull,
    Forbidden,
}

/// Payload of an Error frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub code: ErrorCode,
    pub message: String,
}

/// Current viewer count, sent to the producer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViewerCount {
    pub count: usize,
}

/// Payload of a Mode frame. The tag is reserved and never emitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeMsg {
    pub mode: SessionMode,
}
