//! File-backed key storage with lifecycle management (spec §4.3).
//!
//! Layout on disk: `<root>/<device_id:08X>/<key_id>.key` (raw bytes, mode
//! 0600) paired with `<key_id>.info` (JSON [`KeyInfo`]). A key whose pair is
//! incomplete or unparsable is dropped silently on load, mirroring the
//! original implementation's tolerance for a half-written pair left behind
//! by a crash mid-write.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use shdc_common::constants::{
    BROADCAST_KEY_LIFETIME_SECS, IDENTITY_KEY_LIFETIME_SECS, SESSION_KEY_LIFETIME_SECS,
};
use shdc_crypto::random_bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::info::{KeyInfo, KeyType};

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key '{0}' not found")]
    NotFound(String),

    #[error("I/O error on key store: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt key metadata for '{0}': {1}")]
    CorruptInfo(String, serde_json::Error),
}

impl shdc_common::Classify for KeyStoreError {
    fn kind(&self) -> shdc_common::ErrorKind {
        shdc_common::ErrorKind::KeyAbsent
    }
}

const DEVICE_IDENTITY: &str = "device_identity";
const DEVICE_IDENTITY_PUBLIC: &str = "device_identity_public";
const BROADCAST_MASTER: &str = "broadcast_master";

fn session_key_id(peer_device_id: u32) -> String {
    format!("session_{peer_device_id:08X}")
}

fn peer_public_key_id(peer_device_id: u32) -> String {
    format!("peer_{peer_device_id:08X}_public")
}

fn broadcast_key_id(version: u8) -> String {
    format!("broadcast_{version:02X}")
}

struct LoadedKey {
    bytes: Vec<u8>,
    info: KeyInfo,
}

/// Per-device, file-backed store for identity, peer, session, and
/// broadcast keys.
///
/// Interior-mutable: a `&KeyStore` can be shared across the event loop and
/// any background rotation task without an outer `Mutex`. Guarded by a plain
/// `RwLock`, not a reentrant one (see DESIGN.md) — every public method here
/// takes the lock at most once per call and never calls another `&self`
/// method while holding it; keep that invariant when adding rotation or
/// maintenance methods.
pub struct KeyStore {
    device_id: u32,
    root: PathBuf,
    keys: RwLock<HashMap<String, LoadedKey>>,
}

impl KeyStore {
    /// Open (creating if absent) the on-disk store for `device_id` under
    /// `<root>/<device_id:08X>/`, loading any existing key pairs.
    pub fn open(root: impl AsRef<Path>, device_id: u32) -> Result<Self, KeyStoreError> {
        let dir = root.as_ref().join(format!("{device_id:08X}"));
        fs::create_dir_all(&dir)?;

        let store = Self { device_id, root: dir, keys: RwLock::new(HashMap::new()) };
        store.load_keys()?;
        Ok(store)
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    // ── Identity keys ──────────────────────────────────────────────────

    /// Load the device's persisted identity keypair, or generate and
    /// persist a new one if `force` is set or none exists.
    pub fn generate_device_keys(
        &self,
        force: bool,
    ) -> Result<shdc_crypto::IdentityKeyPair, KeyStoreError> {
        if !force {
            if let Some(bytes) = self.get_key(DEVICE_IDENTITY) {
                return shdc_crypto::IdentityKeyPair::from_bytes(&bytes)
                    .map_err(|_| KeyStoreError::NotFound(DEVICE_IDENTITY.into()));
            }
        }

        let keypair = shdc_crypto::IdentityKeyPair::generate();
        self.store_key(
            DEVICE_IDENTITY,
            &keypair.to_bytes(),
            KeyType::Ed25519Private,
            Some(IDENTITY_KEY_LIFETIME_SECS),
            BTreeMap::new(),
        )?;
        self.store_key(
            DEVICE_IDENTITY_PUBLIC,
            &keypair.public_key_bytes(),
            KeyType::Ed25519Public,
            Some(IDENTITY_KEY_LIFETIME_SECS),
            BTreeMap::new(),
        )?;
        Ok(keypair)
    }

    pub fn device_public_key(&self) -> Option<[u8; 32]> {
        self.get_key(DEVICE_IDENTITY_PUBLIC)
            .and_then(|bytes| bytes.try_into().ok())
    }

    // ── Peer identity keys (trust-on-first-use pinning) ────────────────

    /// Pin a peer's public key at first contact, tagging the record with its
    /// device fingerprint (spec §4.3 / SPEC_FULL.md §3 "used by the key
    /// store to tag a pinned peer record at first contact").
    pub fn store_peer_public_key(
        &self,
        peer_device_id: u32,
        public_key: &[u8; 32],
        device_type: &str,
    ) -> Result<(), KeyStoreError> {
        let fingerprint = shdc_crypto::fingerprint(peer_device_id, public_key, device_type);
        let mut metadata = BTreeMap::new();
        metadata.insert("peer_device_id".into(), peer_device_id.to_string());
        metadata.insert("fingerprint".into(), hex::encode(fingerprint));
        self.store_key(
            &peer_public_key_id(peer_device_id),
            public_key,
            KeyType::Ed25519Public,
            None,
            metadata,
        )
    }

    pub fn peer_public_key(&self, peer_device_id: u32) -> Option<[u8; 32]> {
        self.get_key(&peer_public_key_id(peer_device_id))
            .and_then(|bytes| bytes.try_into().ok())
    }

    // ── Session keys ────────────────────────────────────────────────────

    pub fn generate_session_key(&self, peer_device_id: u32) -> Result<[u8; 32], KeyStoreError> {
        let key: [u8; 32] = random_bytes(32).try_into().expect("random_bytes(32) is 32 bytes");
        let mut metadata = BTreeMap::new();
        metadata.insert("peer_device_id".into(), peer_device_id.to_string());
        self.store_key(
            &session_key_id(peer_device_id),
            &key,
            KeyType::Aes256,
            Some(SESSION_KEY_LIFETIME_SECS),
            metadata,
        )?;
        Ok(key)
    }

    pub fn session_key(&self, peer_device_id: u32) -> Option<[u8; 32]> {
        self.get_key(&session_key_id(peer_device_id))
            .and_then(|bytes| bytes.try_into().ok())
    }

    /// Persist a session key handed to us by the peer (the sensor side of a
    /// join, or a KEY_ROTATION announcement), rather than generating one.
    pub fn store_session_key(&self, peer_device_id: u32, key: &[u8; 32]) -> Result<(), KeyStoreError> {
        let mut metadata = BTreeMap::new();
        metadata.insert("peer_device_id".into(), peer_device_id.to_string());
        self.store_key(&session_key_id(peer_device_id), key, KeyType::Aes256, Some(SESSION_KEY_LIFETIME_SECS), metadata)
    }

    /// Discard the current session key for `peer_device_id` and generate a
    /// fresh one (spec §4.3 rotation).
    pub fn rotate_session_key(&self, peer_device_id: u32) -> Result<[u8; 32], KeyStoreError> {
        self.delete_key(&session_key_id(peer_device_id));
        self.generate_session_key(peer_device_id)
    }

    // ── Broadcast keys ──────────────────────────────────────────────────

    /// Derive (and persist) the broadcast key for `version`, generating a
    /// master key on first use.
    pub fn generate_broadcast_key(&self, version: u8) -> Result<[u8; 32], KeyStoreError> {
        let master = match self.get_key(BROADCAST_MASTER) {
            Some(bytes) => bytes,
            None => {
                let master: [u8; 32] =
                    random_bytes(32).try_into().expect("random_bytes(32) is 32 bytes");
                self.store_key(BROADCAST_MASTER, &master, KeyType::Aes256, None, BTreeMap::new())?;
                master.to_vec()
            }
        };

        let derived = shdc_crypto::derive_broadcast_key(&master, version)
            .map_err(|_| KeyStoreError::NotFound(broadcast_key_id(version)))?;

        let mut metadata = BTreeMap::new();
        metadata.insert("key_version".into(), version.to_string());
        self.store_key(
            &broadcast_key_id(version),
            &derived,
            KeyType::Aes256,
            Some(BROADCAST_KEY_LIFETIME_SECS),
            metadata,
        )?;
        Ok(derived)
    }

    pub fn broadcast_key(&self, version: u8) -> Option<[u8; 32]> {
        self.get_key(&broadcast_key_id(version))
            .and_then(|bytes| bytes.try_into().ok())
    }

    /// Persist a broadcast key handed to us by the hub (the sensor side of a
    /// join or a KEY_ROTATION announcement) without owning the master it was
    /// derived from.
    pub fn store_broadcast_key(&self, version: u8, key: &[u8; 32]) -> Result<(), KeyStoreError> {
        let mut metadata = BTreeMap::new();
        metadata.insert("key_version".into(), version.to_string());
        self.store_key(&broadcast_key_id(version), key, KeyType::Aes256, Some(BROADCAST_KEY_LIFETIME_SECS), metadata)
    }

    /// Roll to the next broadcast key version (wrapping at 256), per spec
    /// §4.3's periodic rotation.
    pub fn rotate_broadcast_keys(&self) -> Result<u8, KeyStoreError> {
        let current_max = self
            .keys
            .read()
            .expect("key store lock poisoned")
            .keys()
            .filter_map(|key_id| key_id.strip_prefix("broadcast_"))
            .filter_map(|suffix| u8::from_str_radix(suffix, 16).ok())
            .max()
            .unwrap_or(0);

        let next = current_max.wrapping_add(1);
        self.generate_broadcast_key(next)?;
        Ok(next)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Remove all expired keys from memory and disk.
    pub fn cleanup_expired_keys(&self) {
        let expired: Vec<String> = {
            let keys = self.keys.read().expect("key store lock poisoned");
            keys.iter()
                .filter(|(_, loaded)| loaded.info.is_expired())
                .map(|(key_id, _)| key_id.clone())
                .collect()
        };
        for key_id in expired {
            self.delete_key(&key_id);
        }
    }

    /// List metadata for every currently-stored (non-expired) key.
    pub fn list_keys(&self) -> Vec<KeyInfo> {
        self.keys
            .read()
            .expect("key store lock poisoned")
            .values()
            .map(|loaded| loaded.info.clone())
            .collect()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn store_key(
        &self,
        key_id: &str,
        bytes: &[u8],
        key_type: KeyType,
        lifetime_secs: Option<u64>,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), KeyStoreError> {
        let info = KeyInfo::new(key_id, key_type, lifetime_secs, metadata);
        self.save_to_disk(key_id, bytes, &info)?;
        self.keys
            .write()
            .expect("key store lock poisoned")
            .insert(key_id.to_string(), LoadedKey { bytes: bytes.to_vec(), info });
        Ok(())
    }

    fn get_key(&self, key_id: &str) -> Option<Vec<u8>> {
        let expired = {
            let keys = self.keys.read().expect("key store lock poisoned");
            match keys.get(key_id) {
                Some(loaded) if loaded.info.is_expired() => true,
                Some(loaded) => return Some(loaded.bytes.clone()),
                None => return None,
            }
        };
        if expired {
            self.delete_key(key_id);
        }
        None
    }

    fn delete_key(&self, key_id: &str) {
        let removed = self.keys.write().expect("key store lock poisoned").remove(key_id);
        if let Some(mut loaded) = removed {
            zero_bytes(&mut loaded.bytes);
        }

        let key_file = self.key_file_path(key_id);
        let info_file = self.info_file_path(key_id);
        let _ = fs::remove_file(key_file);
        let _ = fs::remove_file(info_file);
    }

    fn save_to_disk(&self, key_id: &str, bytes: &[u8], info: &KeyInfo) -> Result<(), KeyStoreError> {
        let key_file = self.key_file_path(key_id);
        fs::write(&key_file, bytes)?;
        set_owner_only_permissions(&key_file)?;

        let info_file = self.info_file_path(key_id);
        let json = serde_json::to_vec_pretty(info).expect("KeyInfo always serializes");
        fs::write(info_file, json)?;
        Ok(())
    }

    fn load_keys(&self) -> Result<(), KeyStoreError> {
        if !self.root.exists() {
            return Ok(());
        }

        let mut loaded = HashMap::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("key") {
                continue;
            }
            let key_id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };

            let info_file = self.info_file_path(&key_id);
            if !info_file.exists() {
                debug!(key_id, "dropping key with no matching .info file");
                continue;
            }

            match self.load_one(&path, &info_file, &key_id) {
                Ok(Some(loaded_key)) => {
                    loaded.insert(key_id, loaded_key);
                }
                Ok(None) => {
                    // expired; already unlinked by load_one
                }
                Err(err) => {
                    warn!(key_id, %err, "dropping corrupt key pair");
                    let _ = fs::remove_file(&path);
                    let _ = fs::remove_file(&info_file);
                }
            }
        }

        *self.keys.write().expect("key store lock poisoned") = loaded;
        Ok(())
    }

    fn load_one(
        &self,
        key_file: &Path,
        info_file: &Path,
        key_id: &str,
    ) -> Result<Option<LoadedKey>, KeyStoreError> {
        let bytes = fs::read(key_file)?;
        let raw_info = fs::read(info_file)?;
        let info: KeyInfo =
            serde_json::from_slice(&raw_info).map_err(|e| KeyStoreError::CorruptInfo(key_id.into(), e))?;

        if info.is_expired() {
            let _ = fs::remove_file(key_file);
            let _ = fs::remove_file(info_file);
            return Ok(None);
        }

        Ok(Some(LoadedKey { bytes, info }))
    }

    fn key_file_path(&self, key_id: &str) -> PathBuf {
        self.root.join(format!("{key_id}.key"))
    }

    fn info_file_path(&self, key_id: &str) -> PathBuf {
        self.root.join(format!("{key_id}.info"))
    }
}

impl Drop for KeyStore {
    fn drop(&mut self) {
        let mut keys = self.keys.write().expect("key store lock poisoned");
        for loaded in keys.values_mut() {
            zero_bytes(&mut loaded.bytes);
        }
    }
}

fn zero_bytes(bytes: &mut [u8]) {
    for b in bytes.iter_mut() {
        *b = 0;
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
