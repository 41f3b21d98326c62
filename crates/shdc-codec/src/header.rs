//! The fixed 12-byte SHDC header (spec §3, §4.1).

use shdc_common::constants::HEADER_SIZE;

use crate::CodecError;

/// `msg_type(1) || device_id(4, BE) || timestamp(4, BE) || nonce(3)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: u8,
    pub device_id: u32,
    pub timestamp: u32,
    pub nonce: [u8; 3],
}

impl Header {
    pub fn new(msg_type: u8, device_id: u32, timestamp: u32, nonce: [u8; 3]) -> Self {
        Self { msg_type, device_id, timestamp, nonce }
    }

    /// Serialize to the fixed 12-byte wire format, big-endian.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.msg_type;
        out[1..5].copy_from_slice(&self.device_id.to_be_bytes());
        out[5..9].copy_from_slice(&self.timestamp.to_be_bytes());
        out[9..12].copy_from_slice(&self.nonce);
        out
    }

    /// Parse exactly `HEADER_SIZE` bytes; any other length is rejected.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != HEADER_SIZE {
            return Err(CodecError::InvalidHeaderSize { expected: HEADER_SIZE, actual: data.len() });
        }
        let msg_type = data[0];
        let device_id = u32::from_be_bytes(data[1..5].try_into().unwrap());
        let timestamp = u32::from_be_bytes(data[5..9].try_into().unwrap());
        let nonce = [data[9], data[10], data[11]];
        Ok(Self { msg_type, device_id, timestamp, nonce })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let h = Header::new(0x02, 0x1234_5678, 1_700_000_000, [1, 2, 3]);
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(Header::from_bytes(&bytes).unwrap(), h);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Header::from_bytes(&[0u8; 11]).is_err());
        assert!(Header::from_bytes(&[0u8; 13]).is_err());
    }
}
