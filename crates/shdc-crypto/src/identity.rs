//! Ed25519 device identity keys (spec §3 "Device identity", §4.2).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use crate::CryptoError;

pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// A device's Ed25519 identity keypair.
///
/// Distinct from a *session* or *broadcast* key — this is the long-lived
/// keypair a device generates once and persists (spec §3: 365-day nominal
/// lifetime, regenerated on expiry).
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a brand-new random identity keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct from a raw 32-byte private scalar (as stored on disk).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeySize { expected: 32, actual: bytes.len() })?;
        Ok(Self { signing_key: SigningKey::from_bytes(&arr) })
    }

    /// Raw 32-byte private scalar, for persistence in the key store.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Raw 32-byte public key, as carried on the wire in JOIN_REQUEST /
    /// HUB_DISCOVERY_REQ / HUB_DISCOVERY_RESP payloads.
    pub fn public_key_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign arbitrary bytes (typically `header || payload`), returning the
    /// raw 64-byte signature appended to every SHDC datagram.
    pub fn sign(&self, message: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verify a raw Ed25519 signature against a raw 32-byte public key.
///
/// Used both for the identity key that signed the datagram, and — per
/// spec's trust-on-first-use rule — against a pubkey advertised inline in
/// a JOIN_REQUEST/HUB_DISCOVERY_REQ payload before that pubkey is pinned.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| CryptoError::InvalidKeySize { expected: 32, actual: public_key.len() })?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidSignature)?;

    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| CryptoError::MalformedSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Standalone sign helper taking a raw private scalar, mirroring [`verify`]'s
/// raw-bytes shape for call sites that don't hold an [`IdentityKeyPair`].
pub fn sign(private_key: &[u8], message: &[u8]) -> Result<[u8; ED25519_SIGNATURE_SIZE], CryptoError> {
    IdentityKeyPair::from_bytes(private_key).map(|kp| kp.sign(message))
}

/// Fingerprint a device's identity for pinning (recovered from
/// `hash_device_fingerprint` in the original implementation; see
/// `SPEC_FULL.md` §3).
pub fn fingerprint(device_id: u32, public_key: &[u8], device_type: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(device_id.to_be_bytes());
    hasher.update(public_key);
    hasher.update(device_type.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_sign_verify() {
        let kp = IdentityKeyPair::generate();
        let msg = b"shdc header || payload";
        let sig = kp.sign(msg);
        verify(&kp.public_key_bytes(), msg, &sig).expect("signature should verify");
    }

    #[test]
    fn tampered_message_fails_verification() {
        let kp = IdentityKeyPair::generate();
        let sig = kp.sign(b"original message");
        assert!(verify(&kp.public_key_bytes(), b"tampered message", &sig).is_err());
    }

    #[test]
    fn from_bytes_round_trips() {
        let kp1 = IdentityKeyPair::generate();
        let bytes = kp1.to_bytes();
        let kp2 = IdentityKeyPair::from_bytes(&bytes).unwrap();
        assert_eq!(kp1.public_key_bytes(), kp2.public_key_bytes());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let pubkey = [7u8; 32];
        let a = fingerprint(0x1234_5678, &pubkey, "temperature");
        let b = fingerprint(0x1234_5678, &pubkey, "temperature");
        assert_eq!(a, b);
        let c = fingerprint(0x1234_5679, &pubkey, "temperature");
        assert_ne!(a, c);
    }
}
