//! Per-message-type payload encoders/decoders (spec §4.1).
//!
//! These operate on the *plaintext* form of each payload. For the variants
//! that travel AEAD-encrypted on the wire (JOIN_RESPONSE, EVENT_REPORT,
//! BROADCAST_COMMAND, KEY_ROTATION), encryption/decryption happens one layer
//! up in `shdc-protocol`; this module only ever sees plaintext bytes.

use crate::CodecError;

const PUBKEY_SIZE: usize = 32;
const SESSION_KEY_SIZE: usize = 32;

/// HUB_DISCOVERY_REQ / JOIN_REQUEST payload: pubkey || UTF-8 info (info may
/// be empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequestPayload {
    pub public_key: [u8; PUBKEY_SIZE],
    pub device_info: String,
}

impl JoinRequestPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.public_key.to_vec();
        out.extend_from_slice(self.device_info.as_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < PUBKEY_SIZE {
            return Err(CodecError::PayloadTooShort { minimum: PUBKEY_SIZE, actual: data.len() });
        }
        let public_key: [u8; PUBKEY_SIZE] = data[..PUBKEY_SIZE].try_into().unwrap();
        let device_info = if data.len() > PUBKEY_SIZE {
            String::from_utf8(data[PUBKEY_SIZE..].to_vec()).map_err(|_| CodecError::InvalidUtf8)?
        } else {
            String::new()
        };
        Ok(Self { public_key, device_info })
    }
}

/// HUB_DISCOVERY_REQ uses the identical wire shape as JOIN_REQUEST (spec
/// §4.1); kept as a distinct type so call sites stay self-documenting.
pub type HubDiscoveryRequestPayload = JoinRequestPayload;

/// HUB_DISCOVERY_RESP payload: hub_id(4, BE) || hub pubkey(32) || UTF-8
/// capabilities (may be empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubDiscoveryResponsePayload {
    pub hub_id: u32,
    pub hub_public_key: [u8; PUBKEY_SIZE],
    pub capabilities: String,
}

impl HubDiscoveryResponsePayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + PUBKEY_SIZE + self.capabilities.len());
        out.extend_from_slice(&self.hub_id.to_be_bytes());
        out.extend_from_slice(&self.hub_public_key);
        out.extend_from_slice(self.capabilities.as_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        let minimum = 4 + PUBKEY_SIZE;
        if data.len() < minimum {
            return Err(CodecError::PayloadTooShort { minimum, actual: data.len() });
        }
        let hub_id = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let hub_public_key: [u8; PUBKEY_SIZE] = data[4..36].try_into().unwrap();
        let capabilities = if data.len() > minimum {
            String::from_utf8(data[minimum..].to_vec()).map_err(|_| CodecError::InvalidUtf8)?
        } else {
            String::new()
        };
        Ok(Self { hub_id, hub_public_key, capabilities })
    }
}

/// JOIN_RESPONSE plaintext payload (before AEAD): assigned_id(4, BE) ||
/// session_key(32) || broadcast_key_id(1). Exactly 37 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResponsePayload {
    pub assigned_id: u32,
    pub session_key: [u8; SESSION_KEY_SIZE],
    pub broadcast_key_id: u8,
}

impl JoinResponsePayload {
    const SIZE: usize = 4 + SESSION_KEY_SIZE + 1;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.assigned_id.to_be_bytes());
        out.extend_from_slice(&self.session_key);
        out.push(self.broadcast_key_id);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != Self::SIZE {
            return Err(CodecError::InvalidPayloadSize { expected: Self::SIZE, actual: data.len() });
        }
        let assigned_id = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let session_key: [u8; SESSION_KEY_SIZE] = data[4..36].try_into().unwrap();
        let broadcast_key_id = data[36];
        Ok(Self { assigned_id, session_key, broadcast_key_id })
    }
}

/// EVENT_REPORT plaintext payload: event_type(1) || data_len(1) || data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReportPayload {
    pub event_type: u8,
    pub data: Vec<u8>,
}

impl EventReportPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.data.len());
        out.push(self.event_type);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < 2 {
            return Err(CodecError::PayloadTooShort { minimum: 2, actual: data.len() });
        }
        let event_type = data[0];
        let data_len = data[1] as usize;
        if data.len() != 2 + data_len {
            return Err(CodecError::LengthMismatch { declared: 2 + data_len, actual: data.len() });
        }
        Ok(Self { event_type, data: data[2..].to_vec() })
    }
}

/// BROADCAST_COMMAND plaintext payload: command_type(1) || command_data ||
/// broadcast_key_id(1) (the trailing byte is the key version tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastCommandPayload {
    pub command_type: u8,
    pub command_data: Vec<u8>,
    pub broadcast_key_id: u8,
}

impl BroadcastCommandPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.command_data.len());
        out.push(self.command_type);
        out.extend_from_slice(&self.command_data);
        out.push(self.broadcast_key_id);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < 2 {
            return Err(CodecError::PayloadTooShort { minimum: 2, actual: data.len() });
        }
        let command_type = data[0];
        let broadcast_key_id = data[data.len() - 1];
        let command_data = data[1..data.len() - 1].to_vec();
        Ok(Self { command_type, command_data, broadcast_key_id })
    }
}

/// KEY_ROTATION plaintext payload: new_key(32) || valid_from(4, BE). Exactly
/// 36 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRotationPayload {
    pub new_key: [u8; 32],
    pub valid_from: u32,
}

impl KeyRotationPayload {
    const SIZE: usize = 32 + 4;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.new_key);
        out.extend_from_slice(&self.valid_from.to_be_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != Self::SIZE {
            return Err(CodecError::InvalidPayloadSize { expected: Self::SIZE, actual: data.len() });
        }
        let new_key: [u8; 32] = data[0..32].try_into().unwrap();
        let valid_from = u32::from_be_bytes(data[32..36].try_into().unwrap());
        Ok(Self { new_key, valid_from })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_request_round_trips_with_info() {
        let p = JoinRequestPayload { public_key: [3u8; 32], device_info: "motion-v2".into() };
        assert_eq!(JoinRequestPayload::from_bytes(&p.to_bytes()).unwrap(), p);
    }

    #[test]
    fn join_request_round_trips_without_info() {
        let p = JoinRequestPayload { public_key: [3u8; 32], device_info: String::new() };
        assert_eq!(JoinRequestPayload::from_bytes(&p.to_bytes()).unwrap(), p);
    }

    #[test]
    fn hub_discovery_response_round_trips() {
        let p = HubDiscoveryResponsePayload {
            hub_id: 0x1234_5678,
            hub_public_key: [9u8; 32],
            capabilities: "v1.0".into(),
        };
        assert_eq!(HubDiscoveryResponsePayload::from_bytes(&p.to_bytes()).unwrap(), p);
    }

    #[test]
    fn join_response_round_trips_and_is_37_bytes() {
        let p = JoinResponsePayload { assigned_id: 42, session_key: [5u8; 32], broadcast_key_id: 1 };
        let bytes = p.to_bytes();
        assert_eq!(bytes.len(), 37);
        assert_eq!(JoinResponsePayload::from_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn event_report_round_trips() {
        let p = EventReportPayload { event_type: 0x06, data: b"22.5C".to_vec() };
        assert_eq!(EventReportPayload::from_bytes(&p.to_bytes()).unwrap(), p);
    }

    #[test]
    fn event_report_rejects_length_mismatch() {
        let mut bytes = EventReportPayload { event_type: 1, data: vec![1, 2, 3] }.to_bytes();
        bytes[1] = 10; // claim 10 bytes follow, only 3 present
        assert!(matches!(
            EventReportPayload::from_bytes(&bytes),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn broadcast_command_round_trips() {
        let p = BroadcastCommandPayload { command_type: 1, command_data: vec![1, 2, 3], broadcast_key_id: 7 };
        assert_eq!(BroadcastCommandPayload::from_bytes(&p.to_bytes()).unwrap(), p);
    }

    #[test]
    fn key_rotation_round_trips_and_is_36_bytes() {
        let p = KeyRotationPayload { new_key: [2u8; 32], valid_from: 1_700_000_500 };
        let bytes = p.to_bytes();
        assert_eq!(bytes.len(), 36);
        assert_eq!(KeyRotationPayload::from_bytes(&bytes).unwrap(), p);
    }
}
