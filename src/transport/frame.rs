//! Wire frame header and payload codec for the mesh radio link.
//!
//! Every notification from the radio carries one frame:
//!
//!   `<12-byte header><kind-specific payload>`
//!
//! The header is little-endian: destination id (4 bytes, `0xFFFFFFFF` =
//! broadcast), source id (4 bytes), a kind tag (1 byte) and 3 reserved
//! bytes. Payloads are UTF-8 text, a position triple (lat/lon/altitude as
//! three `f32`), or a fixed-width peer name field.

use thiserror::Error;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 12;

/// Destination id addressing every node on the mesh.
pub const BROADCAST_ID: u32 = 0xFFFF_FFFF;

/// Maximum bytes per radio write; larger frames are chunked.
pub const MAX_CHUNK_SIZE: usize = 512;

/// Width of the NUL-padded name field in a peer-info payload.
pub const PEER_NAME_LEN: usize = 32;

/// Kind tag dispatched from the header's ninth byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Text = 0x01,
    Position = 0x02,
    PeerInfo = 0x03,
}

impl FrameKind {
    /// Parse a kind tag. Unknown tags yield `None`; the receive path logs
    /// and drops those instead of crashing the handler chain.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Text),
            0x02 => Some(Self::Position),
            0x03 => Some(Self::PeerInfo),
            _ => None,
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Typed frame payload, matched exhaustively instead of sniffing bytes at
/// the call sites.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// UTF-8 text. Chat lines and CoT XML documents both travel as text.
    Text(String),
    /// Position report in decimal degrees / meters.
    Position { lat: f32, lon: f32, altitude: f32 },
    /// Peer announcement carrying the node's display name.
    PeerInfo { name: String },
}

impl FramePayload {
    pub fn kind(&self) -> FrameKind {
        match self {
            FramePayload::Text(_) => FrameKind::Text,
            FramePayload::Position { .. } => FrameKind::Position,
            FramePayload::PeerInfo { .. } => FrameKind::PeerInfo,
        }
    }
}

/// One logical frame on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub destination: u32,
    pub source: u32,
    pub payload: FramePayload,
}

/// Errors from decoding an inbound notification. These are consumed inside
/// the receive loop (logged, frame dropped) and never cross the transport
/// boundary.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("notification shorter than header: {0} bytes")]
    Truncated(usize),
    #[error("unknown frame kind tag 0x{0:02X}")]
    UnknownKind(u8),
    #[error("text payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("position payload must be 12 bytes, got {0}")]
    PositionLength(usize),
    #[error("peer info payload must be {PEER_NAME_LEN} bytes, got {0}")]
    PeerInfoLength(usize),
}

impl Frame {
    /// Broadcast text frame.
    pub fn text(source: u32, content: impl Into<String>) -> Self {
        Self {
            destination: BROADCAST_ID,
            source,
            payload: FramePayload::Text(content.into()),
        }
    }

    /// Broadcast position frame.
    pub fn position(source: u32, lat: f32, lon: f32, altitude: f32) -> Self {
        Self {
            destination: BROADCAST_ID,
            source,
            payload: FramePayload::Position { lat, lon, altitude },
        }
    }

    /// Broadcast peer-info frame. Names longer than the fixed field are
    /// truncated on a char boundary during encoding.
    pub fn peer_info(source: u32, name: impl Into<String>) -> Self {
        Self {
            destination: BROADCAST_ID,
            source,
            payload: FramePayload::PeerInfo { name: name.into() },
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.payload.kind()
    }

    /// Serialize header + payload. The result may exceed
    /// [`MAX_CHUNK_SIZE`]; chunking happens at the send boundary, not here.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 64);
        out.extend_from_slice(&self.destination.to_le_bytes());
        out.extend_from_slice(&self.source.to_le_bytes());
        out.push(self.kind().as_byte());
        out.extend_from_slice(&[0u8; 3]); // reserved
        match &self.payload {
            FramePayload::Text(text) => out.extend_from_slice(text.as_bytes()),
            FramePayload::Position { lat, lon, altitude } => {
                out.extend_from_slice(&lat.to_le_bytes());
                out.extend_from_slice(&lon.to_le_bytes());
                out.extend_from_slice(&altitude.to_le_bytes());
            }
            FramePayload::PeerInfo { name } => {
                let mut field = [0u8; PEER_NAME_LEN];
                let mut cut = name.len().min(PEER_NAME_LEN);
                while cut > 0 && !name.is_char_boundary(cut) {
                    cut -= 1;
                }
                field[..cut].copy_from_slice(&name.as_bytes()[..cut]);
                out.extend_from_slice(&field);
            }
        }
        out
    }

    /// Decode a complete notification payload into a typed frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameDecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameDecodeError::Truncated(bytes.len()));
        }
        let destination = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let source = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let kind = FrameKind::from_byte(bytes[8]).ok_or(FrameDecodeError::UnknownKind(bytes[8]))?;
        let body = &bytes[HEADER_LEN..];

        let payload = match kind {
            FrameKind::Text => FramePayload::Text(std::str::from_utf8(body)?.to_string()),
            FrameKind::Position => {
                if body.len() != 12 {
                    return Err(FrameDecodeError::PositionLength(body.len()));
                }
                FramePayload::Position {
                    lat: f32::from_le_bytes([body[0], body[1], body[2], body[3]]),
                    lon: f32::from_le_bytes([body[4], body[5], body[6], body[7]]),
                    altitude: f32::from_le_bytes([body[8], body[9], body[10], body[11]]),
                }
            }
            FrameKind::PeerInfo => {
                if body.len() != PEER_NAME_LEN {
                    return Err(FrameDecodeError::PeerInfoLength(body.len()));
                }
                let end = body.iter().position(|&b| b == 0).unwrap_or(PEER_NAME_LEN);
                FramePayload::PeerInfo {
                    name: std::str::from_utf8(&body[..end])?.to_string(),
                }
            }
        };

        Ok(Self {
            destination,
            source,
            payload,
        })
    }

    /// Split an encoded frame into radio-sized chunks, in write order.
    pub fn chunks(encoded: &[u8]) -> impl Iterator<Item = &[u8]> {
        encoded.chunks(MAX_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_round_trip() {
        let frame = Frame::text(0x0102_0304, "hello mesh");
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 10);
        assert_eq!(bytes[8], 0x01);
        let back = Frame::decode(&bytes).unwrap();
        assert_eq!(back, frame);
        assert_eq!(back.destination, BROADCAST_ID);
    }

    #[test]
    fn position_frame_round_trip() {
        let frame = Frame::position(7, 47.1234, 8.5678, 500.0);
        let back = Frame::decode(&frame.encode()).unwrap();
        match back.payload {
            FramePayload::Position { lat, lon, altitude } => {
                assert!((lat - 47.1234).abs() < 1e-5);
                assert!((lon - 8.5678).abs() < 1e-5);
                assert!((altitude - 500.0).abs() < 1e-5);
            }
            other => panic!("expected position payload, got {:?}", other),
        }
    }

    #[test]
    fn peer_info_fixed_width_and_nul_trim() {
        let frame = Frame::peer_info(9, "Alpha-1");
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_LEN + PEER_NAME_LEN);
        let back = Frame::decode(&bytes).unwrap();
        assert_eq!(
            back.payload,
            FramePayload::PeerInfo {
                name: "Alpha-1".to_string()
            }
        );
    }

    #[test]
    fn peer_name_truncates_on_char_boundary() {
        // 17 two-byte chars = 34 bytes; the 32-byte field must not slice
        // inside the 17th char.
        let name = "é".repeat(17);
        let frame = Frame::peer_info(9, name);
        let back = Frame::decode(&frame.encode()).unwrap();
        match back.payload {
            FramePayload::PeerInfo { name } => {
                assert_eq!(name, "é".repeat(16)); // 32 bytes exactly
            }
            other => panic!("expected peer info, got {:?}", other),
        }
    }

    #[test]
    fn unknown_kind_is_an_error_not_a_panic() {
        let mut bytes = Frame::text(1, "x").encode();
        bytes[8] = 0x7F;
        match Frame::decode(&bytes) {
            Err(FrameDecodeError::UnknownKind(0x7F)) => {}
            other => panic!("expected UnknownKind, got {:?}", other),
        }
    }

    #[test]
    fn short_notification_is_truncated_error() {
        assert!(matches!(
            Frame::decode(&[0u8; 5]),
            Err(FrameDecodeError::Truncated(5))
        ));
    }

    #[test]
    fn chunking_splits_oversize_frames() {
        let frame = Frame::text(1, "x".repeat(1000));
        let encoded = frame.encode();
        let chunks: Vec<_> = Frame::chunks(&encoded).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), MAX_CHUNK_SIZE);
        assert_eq!(chunks[1].len(), HEADER_LEN + 1000 - MAX_CHUNK_SIZE);
    }
}
