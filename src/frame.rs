//! Sofar logger-link frame codec.
//!
//! Wire layout, little-endian throughout:
//!
//! ```text
//! +------+---------+---------+-----+------+--------+---------+----------+---------+
//! | 0xA5 | len u16 | type u16| seq | pseq | sn u32 | payload | checksum |  0x15   |
//! +------+---------+---------+-----+------+--------+---------+----------+---------+
//! ```
//!
//! `len` counts payload bytes only. The checksum is the wrapping byte sum of
//! everything between the magic byte and the checksum byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

/// First byte of every frame.
pub const MAGIC: u8 = 0xa5;

/// Last byte of every frame.
pub const TRAILER: u8 = 0x15;

/// Magic + length + type + two sequence counters + logger serial.
pub const HEADER_LEN: usize = 1 + 2 + 2 + 1 + 1 + 4;

/// Checksum + trailer.
pub const FOOTER_LEN: usize = 2;

/// Upper bound on the payload length accepted from a peer. The largest frame
/// observed from a logger is well under 200 bytes; anything claiming more is
/// treated as a framing error rather than read to exhaustion.
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// Acknowledgement payload size in bytes.
pub const ACK_PAYLOAD_LEN: usize = 10;

/// Heartbeat interval (seconds) the server advertises in acknowledgements.
pub const ACK_HEARTBEAT_INTERVAL: u16 = 0x0078;

/// Message types observed on the logger link.
///
/// Logger-originated types sit in the `0x4_10` range; the matching server
/// acknowledgement replaces the high nibble with `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hello,
    Data,
    Heartbeat,
    HelloEnd,
    HelloAck,
    DataAck,
    HeartbeatAck,
    HelloEndAck,
}

impl MessageType {
    /// Decode a wire type value.
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0x4110 => Some(MessageType::Hello),
            0x4210 => Some(MessageType::Data),
            0x4710 => Some(MessageType::Heartbeat),
            0x4810 => Some(MessageType::HelloEnd),
            0x1110 => Some(MessageType::HelloAck),
            0x1210 => Some(MessageType::DataAck),
            0x1710 => Some(MessageType::HeartbeatAck),
            0x1810 => Some(MessageType::HelloEndAck),
            _ => None,
        }
    }

    /// Wire value for this type.
    pub fn wire(self) -> u16 {
        match self {
            MessageType::Hello => 0x4110,
            MessageType::Data => 0x4210,
            MessageType::Heartbeat => 0x4710,
            MessageType::HelloEnd => 0x4810,
            MessageType::HelloAck => 0x1110,
            MessageType::DataAck => 0x1210,
            MessageType::HeartbeatAck => 0x1710,
            MessageType::HelloEndAck => 0x1810,
        }
    }

    /// The acknowledgement type answering this request type, if any.
    pub fn ack_type(self) -> Option<MessageType> {
        match self {
            MessageType::Hello => Some(MessageType::HelloAck),
            MessageType::Data => Some(MessageType::DataAck),
            MessageType::Heartbeat => Some(MessageType::HeartbeatAck),
            MessageType::HelloEnd => Some(MessageType::HelloEndAck),
            _ => None,
        }
    }

    /// Whether this is a server acknowledgement type.
    pub fn is_ack(self) -> bool {
        matches!(
            self,
            MessageType::HelloAck
                | MessageType::DataAck
                | MessageType::HeartbeatAck
                | MessageType::HelloEndAck
        )
    }
}

/// A complete logger-link frame with the payload kept opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message_type: MessageType,
    /// Per-connection counter; acknowledgements carry the request value plus one.
    pub sequence: u8,
    /// Counter echoed back unchanged by acknowledgements.
    pub peer_sequence: u8,
    /// Data-logger serial number.
    pub logger_serial: u32,
    pub payload: Bytes,
}

/// Decoded acknowledgement payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Status byte echoed from the request payload.
    pub status: u8,
    /// Server unix timestamp.
    pub timestamp: u32,
    /// Advertised heartbeat interval in seconds.
    pub heartbeat_interval: u16,
}

impl Ack {
    /// Server timestamp as a UTC datetime, when it is in range.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }
}

/// Frame codec errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer is shorter than the frame it claims to hold
    Truncated { needed: usize, got: usize },
    /// First byte is not the frame magic
    BadMagic(u8),
    /// Last byte is not the frame trailer
    BadTrailer(u8),
    /// Checksum byte does not match the computed sum
    ChecksumMismatch { expected: u8, actual: u8 },
    /// Wire type value is not a known message type
    UnknownMessageType(u16),
    /// Declared payload length exceeds what a peer may send
    PayloadTooLarge(usize),
    /// decode_ack on a frame that is not an acknowledgement
    NotAnAck(MessageType),
    /// ack() on a type that has no acknowledgement counterpart
    NoAckType(MessageType),
    /// Acknowledgement payload has the wrong size
    BadAckPayload(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Truncated { needed, got } => {
                write!(f, "Truncated frame: need {} bytes, got {}", needed, got)
            }
            FrameError::BadMagic(b) => write!(f, "Bad frame magic 0x{:02x}", b),
            FrameError::BadTrailer(b) => write!(f, "Bad frame trailer 0x{:02x}", b),
            FrameError::ChecksumMismatch { expected, actual } => {
                write!(f, "Checksum mismatch: frame says {}, computed {}", expected, actual)
            }
            FrameError::UnknownMessageType(t) => write!(f, "Unknown message type 0x{:04x}", t),
            FrameError::PayloadTooLarge(len) => {
                write!(f, "Declared payload of {} bytes exceeds limit", len)
            }
            FrameError::NotAnAck(t) => write!(f, "Frame type {:?} is not an acknowledgement", t),
            FrameError::NoAckType(t) => {
                write!(f, "Frame type {:?} has no acknowledgement counterpart", t)
            }
            FrameError::BadAckPayload(len) => {
                write!(f, "Acknowledgement payload of {} bytes, expected {}", len, ACK_PAYLOAD_LEN)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Wrapping byte sum used as the frame checksum.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Total wire length of the frame a header announces.
///
/// Validates the magic and the declared payload length so a caller can size
/// its read without trusting an arbitrary peer value.
pub fn frame_len(header: &[u8; HEADER_LEN]) -> Result<usize, FrameError> {
    if header[0] != MAGIC {
        return Err(FrameError::BadMagic(header[0]));
    }
    let payload_len = u16::from_le_bytes([header[1], header[2]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload_len));
    }
    Ok(HEADER_LEN + payload_len + FOOTER_LEN)
}

impl Frame {
    /// Total size of this frame on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + FOOTER_LEN
    }

    /// Decode a complete frame from `raw`, which must hold exactly one frame.
    pub fn decode(raw: &[u8]) -> Result<Frame, FrameError> {
        if raw.len() < HEADER_LEN + FOOTER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN + FOOTER_LEN,
                got: raw.len(),
            });
        }
        if raw[0] != MAGIC {
            return Err(FrameError::BadMagic(raw[0]));
        }

        let mut buf = &raw[1..];
        let payload_len = buf.get_u16_le() as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(payload_len));
        }
        let total = HEADER_LEN + payload_len + FOOTER_LEN;
        if raw.len() != total {
            return Err(FrameError::Truncated {
                needed: total,
                got: raw.len(),
            });
        }

        let trailer = raw[total - 1];
        if trailer != TRAILER {
            return Err(FrameError::BadTrailer(trailer));
        }

        let expected = raw[total - 2];
        let actual = checksum(&raw[1..total - 2]);
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        let type_value = buf.get_u16_le();
        let message_type =
            MessageType::from_wire(type_value).ok_or(FrameError::UnknownMessageType(type_value))?;
        let sequence = buf.get_u8();
        let peer_sequence = buf.get_u8();
        let logger_serial = buf.get_u32_le();

        Ok(Frame {
            message_type,
            sequence,
            peer_sequence,
            logger_serial,
            payload: Bytes::copy_from_slice(&buf[..payload_len]),
        })
    }

    /// Encode this frame into a fresh buffer.
    pub fn encode(&self) -> Result<BytesMut, FrameError> {
        let payload_len = u16::try_from(self.payload.len())
            .map_err(|_| FrameError::PayloadTooLarge(self.payload.len()))?;

        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(MAGIC);
        buf.put_u16_le(payload_len);
        buf.put_u16_le(self.message_type.wire());
        buf.put_u8(self.sequence);
        buf.put_u8(self.peer_sequence);
        buf.put_u32_le(self.logger_serial);
        buf.extend_from_slice(&self.payload);

        let sum = checksum(&buf[1..]);
        buf.put_u8(sum);
        buf.put_u8(TRAILER);

        Ok(buf)
    }

    /// Build the server acknowledgement for this request frame.
    ///
    /// The server echoes the request's leading status byte, bumps the first
    /// sequence counter, and reports its clock and heartbeat interval.
    pub fn ack(&self, timestamp: u32) -> Result<Frame, FrameError> {
        let ack_type = self
            .message_type
            .ack_type()
            .ok_or(FrameError::NoAckType(self.message_type))?;
        let status = self.payload.first().copied().unwrap_or(0);

        let mut payload = BytesMut::with_capacity(ACK_PAYLOAD_LEN);
        payload.put_u8(status);
        payload.put_u8(1);
        payload.put_u32_le(timestamp);
        payload.put_u16_le(ACK_HEARTBEAT_INTERVAL);
        payload.put_u16_le(0);

        Ok(Frame {
            message_type: ack_type,
            sequence: self.sequence.wrapping_add(1),
            peer_sequence: self.peer_sequence,
            logger_serial: self.logger_serial,
            payload: payload.freeze(),
        })
    }

    /// Interpret this frame's payload as a server acknowledgement.
    pub fn decode_ack(&self) -> Result<Ack, FrameError> {
        if !self.message_type.is_ack() {
            return Err(FrameError::NotAnAck(self.message_type));
        }
        if self.payload.len() != ACK_PAYLOAD_LEN {
            return Err(FrameError::BadAckPayload(self.payload.len()));
        }

        let mut buf = &self.payload[..];
        let status = buf.get_u8();
        // constant 0x01 on every observed acknowledgement; not load-bearing
        buf.get_u8();
        let timestamp = buf.get_u32_le();
        let heartbeat_interval = buf.get_u16_le();

        Ok(Ack {
            status,
            timestamp,
            heartbeat_interval,
        })
    }
}
