//! Frame encoding and decoding.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::FrameType;

/// Codec failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A frame must contain at least the type tag.
    #[error("empty frame")]
    EmptyFrame,

    /// A JSON payload failed to serialize or deserialize.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes a frame whose payload is raw bytes (Stdout/Stdin).
pub fn encode_raw(frame_type: FrameType, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + data.len());
    frame.push(frame_type as u8);
    frame.extend_from_slice(data);
    frame
}

/// Encodes a payload-less frame (Ping/Pong/End).
pub fn encode_empty(frame_type: FrameType) -> Vec<u8> {
    vec![frame_type as u8]
}

/// Encodes a frame whose payload is a JSON document.
pub fn encode_json<T: Serialize>(
    frame_type: FrameType,
    payload: &T,
) -> Result<Vec<u8>, CodecError> {
    let data = serde_json::to_vec(payload)?;
    let mut frame = Vec::with_capacity(1 + data.len());
    frame.push(frame_type as u8);
    frame.extend_from_slice(&data);
    Ok(frame)
}

/// Splits a frame into its tag byte and payload. The tag is returned raw so
/// callers can skip tags they do not understand.
pub fn decode(frame: &[u8]) -> Result<(u8, &[u8]), CodecError> {
    match frame.split_first() {
        Some((tag, payload)) => Ok((*tag, payload)),
        None => Err(CodecError::EmptyFrame),
    }
}

/// Deserializes a JSON payload into the given type.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorCode, ErrorMsg, Resize};

    #[test]
    fn raw_frame_round_trip() {
        let frame = encode_raw(FrameType::Stdout, b"hello from terminal");
        let (tag, payload) = decode(&frame).unwrap();
        assert_eq!(FrameType::from_byte(tag), Some(FrameType::Stdout));
        assert_eq!(payload, b"hello from terminal");
    }

    #[test]
    fn empty_payload_round_trip() {
        let frame = encode_empty(FrameType::Ping);
        assert_eq!(frame, vec![0x30]);
        let (tag, payload) = decode(&frame).unwrap();
        assert_eq!(tag, 0x30);
        assert!(payload.is_empty());
    }

    #[test]
    fn json_frame_round_trip() {
        let frame = encode_json(FrameType::Resize, &Resize { cols: 120, rows: 40 }).unwrap();
        let (tag, payload) = decode(&frame).unwrap();
        assert_eq!(FrameType::from_byte(tag), Some(FrameType::Resize));
        let resize: Resize = decode_json(payload).unwrap();
        assert_eq!(resize.cols, 120);
        assert_eq!(resize.rows, 40);
    }

    #[test]
    fn decode_empty_frame_is_an_error() {
        assert!(matches!(decode(&[]), Err(CodecError::EmptyFrame)));
    }

    #[test]
    fn decode_tag_only_frame_yields_empty_payload() {
        let (tag, payload) = decode(&[0x15]).unwrap();
        assert_eq!(FrameType::from_byte(tag), Some(FrameType::End));
        assert!(payload.is_empty());
    }

    #[test]
    fn decode_preserves_unknown_tags() {
        let (tag, payload) = decode(&[0x7f, 1, 2, 3]).unwrap();
        assert_eq!(tag, 0x7f);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn raw_frame_with_empty_payload() {
        let frame = encode_raw(FrameType::Stdout, b"");
        let (tag, payload) = decode(&frame).unwrap();
        assert_eq!(tag, 0x01);
        assert!(payload.is_empty());
    }

    #[test]
    fn error_frame_encodes_code_and_message() {
        let frame = encode_json(
            FrameType::Error,
            &ErrorMsg {
                code: ErrorCode::SessionFull,
                message: "maximum viewers reached".into(),
            },
        )
        .unwrap();
        let (tag, payload) = decode(&frame).unwrap();
        assert_eq!(FrameType::from_byte(tag), Some(FrameType::Error));
        let msg: ErrorMsg = decode_json(payload).unwrap();
        assert_eq!(msg.code, ErrorCode::SessionFull);
        assert_eq!(msg.message, "maximum viewers reached");
    }

    #[test]
    fn decode_json_rejects_invalid_utf8() {
        let payload = [0xff, 0xfe, 0x01];
        assert!(decode_json::<Resize>(&payload).is_err());
    }
}
