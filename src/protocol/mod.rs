//! Binary wire protocol for relay channels.
//!
//! Every WebSocket message is a single frame: a 1-byte type tag followed by
//! a payload. Stdout/Stdin frames carry raw terminal bytes, Ping/Pong/End
//! carry no payload, and every other tag carries a JSON document.

mod codec;
mod messages;

pub use codec::{decode, decode_json, encode_empty, encode_json, encode_raw, CodecError};
pub use messages::{
    ErrorCode, ErrorMsg, FrameType, Hello, Join, Joined, ModeMsg, ReconnectState, ReconnectStatus,
    Resize, SessionMode, ViewerCount, Welcome,
};
