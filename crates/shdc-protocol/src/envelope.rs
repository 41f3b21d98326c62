//! The AEAD envelope carried in a message's payload slot for the four
//! encrypted message types (spec §3: JOIN_RESPONSE, EVENT_REPORT,
//! BROADCAST_COMMAND, KEY_ROTATION).
//!
//! The wire table in spec §3 gives each plaintext payload's shape but not
//! how the AEAD nonce travels — this crate settles it once, the same way
//! for every encrypted message type: `nonce(12) || ciphertext_with_tag`,
//! with the 12-byte outer header as associated data so ciphertext is bound
//! to sender, timestamp, and header nonce.

use shdc_codec::Header;
use shdc_crypto::{decrypt, encrypt, AES_NONCE_SIZE};

use crate::error::EngineError;

/// Encrypt `plaintext` under `key`, binding it to `header`, and prepend the
/// fresh AEAD nonce so the result is ready to drop straight into
/// [`shdc_codec::Message::payload`].
pub(crate) fn seal(key: &[u8; 32], header: &Header, plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
    let (nonce, ciphertext) = encrypt(key, plaintext, &header.to_bytes())?;
    let mut out = Vec::with_capacity(AES_NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Try every key in `candidates`, in order, splitting the leading AEAD
/// nonce off `envelope` first. Returns the first key that decrypts
/// successfully — used during a key-rotation overlap window where both the
/// old and new key are briefly acceptable (spec §4.6, §8 property 7).
pub(crate) fn open(
    candidates: &[[u8; 32]],
    header: &Header,
    envelope: &[u8],
) -> Result<Vec<u8>, EngineError> {
    if envelope.len() < AES_NONCE_SIZE {
        return Err(shdc_crypto::CryptoError::DecryptFailed.into());
    }
    let (nonce, ciphertext) = envelope.split_at(AES_NONCE_SIZE);
    let aad = header.to_bytes();
    for key in candidates {
        if let Ok(plaintext) = decrypt(key, nonce, ciphertext, &aad) {
            return Ok(plaintext);
        }
    }
    Err(shdc_crypto::CryptoError::DecryptFailed.into())
}
