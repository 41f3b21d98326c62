//! HKDF-SHA-256 key derivation (spec §3, §4.2).

use hkdf::Hkdf;
use sha2::Sha256;

use crate::CryptoError;

const SESSION_KEY_INFO: &[u8] = b"SHDC_SESSION_KEY";
const BROADCAST_KEY_INFO: &[u8] = b"SHDC_BROADCAST_KEY";

/// Derive a 32-byte per-(hub,sensor) session key from a shared secret and
/// both device ids.
///
/// `salt = device_id_a(4, BE) || device_id_b(4, BE)`, ordered by the
/// caller (spec §4.2) — callers must apply a consistent ordering (e.g.
/// hub id then sensor id) on both ends so the derivation agrees.
pub fn derive_session_key(
    shared_secret: &[u8],
    device_id_a: u32,
    device_id_b: u32,
) -> Result<[u8; 32], CryptoError> {
    let mut salt = Vec::with_capacity(8);
    salt.extend_from_slice(&device_id_a.to_be_bytes());
    salt.extend_from_slice(&device_id_b.to_be_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(SESSION_KEY_INFO, &mut okm)
        .map_err(|_| CryptoError::DerivationFailed)?;
    Ok(okm)
}

/// Derive a 32-byte broadcast group key for `version` from the 32-byte
/// broadcast master key.
///
/// `salt = version(4, BE) || "BROADCAST"`, `info = "SHDC_BROADCAST_KEY"`
/// (spec §3). Deterministic: the same `(master, version)` always yields the
/// same derived key (spec §8 property 8).
pub fn derive_broadcast_key(master_key: &[u8], version: u8) -> Result<[u8; 32], CryptoError> {
    if master_key.len() != 32 {
        return Err(CryptoError::InvalidKeySize { expected: 32, actual: master_key.len() });
    }
    let mut salt = Vec::with_capacity(4 + b"BROADCAST".len());
    salt.extend_from_slice(&(version as u32).to_be_bytes());
    salt.extend_from_slice(b"BROADCAST");

    let hk = Hkdf::<Sha256>::new(Some(&salt), master_key);
    let mut okm = [0u8; 32];
    hk.expand(BROADCAST_KEY_INFO, &mut okm)
        .map_err(|_| CryptoError::DerivationFailed)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_derivation_is_deterministic() {
        let master = [9u8; 32];
        let a = derive_broadcast_key(&master, 3).unwrap();
        let b = derive_broadcast_key(&master, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn broadcast_derivation_differs_by_version() {
        let master = [9u8; 32];
        let v0 = derive_broadcast_key(&master, 0).unwrap();
        let v1 = derive_broadcast_key(&master, 1).unwrap();
        assert_ne!(v0, v1);
    }

    #[test]
    fn session_key_derivation_is_order_sensitive() {
        let secret = [1u8; 32];
        let ab = derive_session_key(&secret, 1, 2).unwrap();
        let ba = derive_session_key(&secret, 2, 1).unwrap();
        assert_ne!(ab, ba);
    }
}
