//! The complete `header || payload || signature` framing (spec §3, §4.1).

use shdc_common::constants::{HEADER_SIZE, MAX_PACKET_SIZE, SIGNATURE_SIZE};

use crate::{CodecError, Header};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
    pub signature: [u8; SIGNATURE_SIZE],
}

impl Message {
    pub fn new(header: Header, payload: Vec<u8>, signature: [u8; SIGNATURE_SIZE]) -> Self {
        Self { header, payload, signature }
    }

    /// Bytes that the signature is computed over: `header || payload`.
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Serialize the full datagram: `header || payload || signature`.
    ///
    /// Returns [`CodecError::SizeBoundExceeded`] rather than silently
    /// truncating — per spec §4.7 this is a caller logic error, not a
    /// runtime condition to recover from.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let total = HEADER_SIZE + self.payload.len() + SIGNATURE_SIZE;
        if total > MAX_PACKET_SIZE {
            return Err(CodecError::SizeBoundExceeded { actual: total, max: MAX_PACKET_SIZE });
        }
        let mut out = self.signed_bytes();
        out.extend_from_slice(&self.signature);
        Ok(out)
    }

    /// Parse a complete datagram. Requires at least `HEADER_SIZE +
    /// SIGNATURE_SIZE` bytes; the trailing `SIGNATURE_SIZE` bytes are the
    /// signature, everything between the header and signature is payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        let minimum = HEADER_SIZE + SIGNATURE_SIZE;
        if data.len() < minimum {
            return Err(CodecError::MessageTooShort { minimum, actual: data.len() });
        }
        if data.len() > MAX_PACKET_SIZE {
            return Err(CodecError::SizeBoundExceeded { actual: data.len(), max: MAX_PACKET_SIZE });
        }

        let header = Header::from_bytes(&data[..HEADER_SIZE])?;
        let signature: [u8; SIGNATURE_SIZE] =
            data[data.len() - SIGNATURE_SIZE..].try_into().unwrap();
        let payload = data[HEADER_SIZE..data.len() - SIGNATURE_SIZE].to_vec();

        Ok(Self { header, payload, signature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header::new(0x01, 0x8765_4321, 1_700_000_000, [9, 8, 7])
    }

    #[test]
    fn round_trips_with_payload() {
        let msg = Message::new(sample_header(), vec![1, 2, 3, 4, 5], [0xAB; SIGNATURE_SIZE]);
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_with_empty_payload() {
        let msg = Message::new(sample_header(), vec![], [0x11; SIGNATURE_SIZE]);
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + SIGNATURE_SIZE);
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn rejects_too_short() {
        assert!(Message::from_bytes(&[0u8; HEADER_SIZE]).is_err());
    }

    #[test]
    fn rejects_oversize_payload_on_encode() {
        let huge_payload = vec![0u8; MAX_PACKET_SIZE];
        let msg = Message::new(sample_header(), huge_payload, [0u8; SIGNATURE_SIZE]);
        assert!(matches!(msg.to_bytes(), Err(CodecError::SizeBoundExceeded { .. })));
    }
}
