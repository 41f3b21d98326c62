//! Bidirectional translation between typed SHDC messages and byte sequences
//! (spec §4.1). No I/O, no crypto — strict length validation only.

mod header;
mod message;
mod payload;

pub use header::Header;
pub use message::Message;
pub use payload::{
    BroadcastCommandPayload, EventReportPayload, HubDiscoveryRequestPayload,
    HubDiscoveryResponsePayload, JoinRequestPayload, JoinResponsePayload, KeyRotationPayload,
};

use thiserror::Error;

/// SHDC message type codes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    HubDiscoveryReq = 0x00,
    EventReport = 0x01,
    JoinRequest = 0x02,
    JoinResponse = 0x03,
    BroadcastCommand = 0x04,
    KeyRotation = 0x05,
    HubDiscoveryResp = 0x06,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Result<Self, CodecError> {
        match v {
            0x00 => Ok(Self::HubDiscoveryReq),
            0x01 => Ok(Self::EventReport),
            0x02 => Ok(Self::JoinRequest),
            0x03 => Ok(Self::JoinResponse),
            0x04 => Ok(Self::BroadcastCommand),
            0x05 => Ok(Self::KeyRotation),
            0x06 => Ok(Self::HubDiscoveryResp),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("header must be exactly {expected} bytes, got {actual}")]
    InvalidHeaderSize { expected: usize, actual: usize },

    #[error("message too short: need at least {minimum} bytes, got {actual}")]
    MessageTooShort { minimum: usize, actual: usize },

    #[error("encoded datagram of {actual} bytes exceeds the {max} byte limit")]
    SizeBoundExceeded { actual: usize, max: usize },

    #[error("unknown message type code 0x{0:02X}")]
    UnknownMessageType(u8),

    #[error("payload too short: need at least {minimum} bytes, got {actual}")]
    PayloadTooShort { minimum: usize, actual: usize },

    #[error("payload length mismatch: header says {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid payload size: expected {expected}, got {actual}")]
    InvalidPayloadSize { expected: usize, actual: usize },
}

impl shdc_common::Classify for CodecError {
    fn kind(&self) -> shdc_common::ErrorKind {
        shdc_common::ErrorKind::Codec
    }
}
