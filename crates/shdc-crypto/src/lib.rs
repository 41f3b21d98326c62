//! Cryptographic primitives for SHDC v1.0 (spec §4.2).
//!
//! Thin, stateless wrappers: no I/O, no protocol knowledge. Ed25519 for
//! signatures, AES-256-GCM for AEAD, HKDF-SHA-256 for key derivation. Every
//! failure surfaces as the single [`CryptoError`] kind per spec.

mod aead;
mod identity;
mod kdf;
mod random;

pub use aead::{decrypt, encrypt, AES_KEY_SIZE, AES_NONCE_SIZE, AES_TAG_SIZE};
pub use identity::{
    fingerprint, sign, verify, IdentityKeyPair, ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE,
};
pub use kdf::{derive_broadcast_key, derive_session_key};
pub use random::{constant_time_eq, random_bytes, random_header_nonce};

use thiserror::Error;

/// All cryptographic failures collapse to this single kind (spec §4.2).
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("invalid nonce size: expected {expected}, got {actual}")]
    InvalidNonceSize { expected: usize, actual: usize },

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("malformed signature bytes")]
    MalformedSignature,

    #[error("AEAD encryption failed")]
    EncryptFailed,

    #[error("AEAD decryption failed")]
    DecryptFailed,

    #[error("key derivation failed")]
    DerivationFailed,
}

impl shdc_common::Classify for CryptoError {
    fn kind(&self) -> shdc_common::ErrorKind {
        shdc_common::ErrorKind::Crypto
    }
}
