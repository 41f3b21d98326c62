//! AES-256-GCM AEAD wrappers (spec §4.2).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::{random_bytes, CryptoError};

pub const AES_KEY_SIZE: usize = 32;
pub const AES_NONCE_SIZE: usize = 12;
pub const AES_TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key`, with optional associated data (typically
/// the SHDC header bytes, binding ciphertext to the sender/timestamp).
///
/// Returns `(nonce, ciphertext_with_tag)`. A fresh random nonce is generated
/// per call per spec §4.2.
pub fn encrypt(
    key: &[u8],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<([u8; AES_NONCE_SIZE], Vec<u8>), CryptoError> {
    if key.len() != AES_KEY_SIZE {
        return Err(CryptoError::InvalidKeySize { expected: AES_KEY_SIZE, actual: key.len() });
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let nonce_bytes: [u8; AES_NONCE_SIZE] = random_bytes(AES_NONCE_SIZE)
        .try_into()
        .expect("random_bytes(12) is always 12 bytes");
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: associated_data })
        .map_err(|_| CryptoError::EncryptFailed)?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt `ciphertext` (tag appended) under `key` and `nonce`, verifying
/// `associated_data`. Any tampering of ciphertext or associated data causes
/// this to fail (spec §8 property 5).
pub fn decrypt(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if key.len() != AES_KEY_SIZE {
        return Err(CryptoError::InvalidKeySize { expected: AES_KEY_SIZE, actual: key.len() });
    }
    if nonce.len() != AES_NONCE_SIZE {
        return Err(CryptoError::InvalidNonceSize { expected: AES_NONCE_SIZE, actual: nonce.len() });
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad: associated_data })
        .map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random_bytes;

    #[test]
    fn round_trip_encrypt_decrypt() {
        let key = random_bytes(AES_KEY_SIZE);
        let (nonce, ct) = encrypt(&key, b"hello sensor", b"aad-header").unwrap();
        let pt = decrypt(&key, &nonce, &ct, b"aad-header").unwrap();
        assert_eq!(pt, b"hello sensor");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = random_bytes(AES_KEY_SIZE);
        let (nonce, mut ct) = encrypt(&key, b"payload", b"aad").unwrap();
        ct[0] ^= 0xFF;
        assert!(decrypt(&key, &nonce, &ct, b"aad").is_err());
    }

    #[test]
    fn tampered_associated_data_fails() {
        let key = random_bytes(AES_KEY_SIZE);
        let (nonce, ct) = encrypt(&key, b"payload", b"aad-original").unwrap();
        assert!(decrypt(&key, &nonce, &ct, b"aad-tampered").is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let key_a = random_bytes(AES_KEY_SIZE);
        let key_b = random_bytes(AES_KEY_SIZE);
        let (nonce, ct) = encrypt(&key_a, b"payload", b"").unwrap();
        assert!(decrypt(&key_b, &nonce, &ct, b"").is_err());
    }
}
