//! Wire transport: one JSON frame per line over a `TcpStream`.
//!
//! Built on `tokio_util::codec::LinesCodec` rather than a length-delimited
//! binary codec, since a frame here is always a single JSON object and
//! never an opaque binary payload. `LinesCodec`'s built-in `max_length`
//! gives the oversized-frame check for free at the transport boundary.
//! JSON parsing of each line is left to the caller.

use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use pan_types::{Frame, MAX_FRAME_BYTES};

/// A framed agent/peer socket: each item is one line of raw frame JSON.
pub type FrameTransport = Framed<TcpStream, LinesCodec>;

/// Wrap a freshly accepted socket in the line-based frame transport,
/// bounding a single line to [`MAX_FRAME_BYTES`].
pub fn frame_transport(stream: TcpStream) -> FrameTransport {
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
}

/// Whether a decode failure from [`FrameTransport`] was specifically an
/// oversized line as opposed to a plain transport I/O error.
pub fn is_too_large(error: &LinesCodecError) -> bool {
    matches!(error, LinesCodecError::MaxLineLengthExceeded)
}

/// Serialize a frame to its one-line wire form.
pub fn encode_frame(frame: &Frame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Parse one line of wire text back into a [`Frame`].
pub fn decode_frame(line: &str) -> Result<Frame, serde_json::Error> {
    serde_json::from_str(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pan_types::{ConnId, Endpoint, FrameType, MsgId, NodeId};
    use serde_json::json;

    #[test]
    fn frame_roundtrips_through_the_wire_encoding() {
        let frame = Frame {
            msg_id: MsgId::generate(),
            kind: FrameType::Direct,
            from: Endpoint::new(NodeId::new_random(), ConnId::new_random()),
            msg_type: "chat.message".to_string(),
            payload: json!({"body": "hi"}),
            ttl: 1,
            to: Some(Endpoint::new(NodeId::new_random(), ConnId::new_random())),
            group: None,
            in_response_to: None,
        };

        let line = encode_frame(&frame).unwrap();
        assert!(!line.contains('\n'));
        let decoded = decode_frame(&line).unwrap();
        assert_eq!(decoded.msg_type, frame.msg_type);
    }

    #[test]
    fn malformed_json_fails_to_decode() {
        assert!(decode_frame("{ not json").is_err());
    }
}
