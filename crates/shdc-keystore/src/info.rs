//! Metadata persisted alongside each key's raw bytes (spec §4.3).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The three kinds of key material SHDC devices hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    Ed25519Private,
    Ed25519Public,
    Aes256,
}

/// Metadata describing one stored key: when it was created, when (if ever)
/// it expires, and any key-specific bookkeeping (peer device id, broadcast
/// version, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_id: String,
    pub key_type: KeyType,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, String>,
}

impl KeyInfo {
    pub fn new(
        key_id: impl Into<String>,
        key_type: KeyType,
        lifetime_secs: Option<u64>,
        metadata: std::collections::BTreeMap<String, String>,
    ) -> Self {
        let created_at = now_secs();
        Self {
            key_id: key_id.into(),
            key_type,
            created_at,
            expires_at: lifetime_secs.map(|secs| created_at + secs),
            metadata,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => now_secs() > expires_at,
            None => false,
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}
