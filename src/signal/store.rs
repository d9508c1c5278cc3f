//! Encrypted-at-rest persistence for the bridge's full state (§3a, §9a).
//!
//! The identity database named on the command line (`-i/--identity`) holds
//! one AES-256-GCM encrypted blob: the pickled Olm account, the Kyber768
//! keypair, every pickled session, the prekey inventory, contacts, and
//! message history. The encryption key itself lives in the OS keyring
//! (`keyring::Credentials::bridge_key`), cached in memory after first load
//! to avoid re-prompting the keychain on every save.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{OnceLock, RwLock};

use anyhow::{Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::crypto::{self, EncryptedData};
use crate::keyring::Credentials;

/// Store format version, bumped on incompatible schema changes.
const STORE_VERSION: u8 = 1;

fn key_cache() -> &'static RwLock<HashMap<String, [u8; 32]>> {
    static CACHE: OnceLock<RwLock<HashMap<String, [u8; 32]>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Persisted shape of the bridge's full crypto + application state.
#[derive(Debug, Serialize, Deserialize)]
pub struct BridgeState {
    /// JSON-serialized Olm account pickle.
    pub pickled_account: String,
    /// Base64 Kyber768 public key.
    pub pq_public: String,
    /// Base64 Kyber768 secret key.
    pub pq_secret: String,
    /// Contact RDX fingerprint -> JSON-serialized Olm session pickle.
    pub pickled_sessions: HashMap<String, String>,
    /// Serialized prekey inventory state.
    pub prekey_inventory: serde_json::Value,
    /// Serialized contact store.
    pub contacts: serde_json::Value,
    /// Serialized message history.
    pub history: serde_json::Value,
    /// Ids of one-time prekeys already recorded as "published to the relay".
    pub published_one_time_ids: HashSet<u64>,
    /// Monotonic watermark of the last message timestamp observed.
    pub last_message_timestamp: u64,
}

fn get_or_create_key(identity_path: &Path) -> Result<[u8; 32]> {
    let cache_key = identity_path.to_string_lossy().to_string();

    if crate::env::is_any_test() {
        let hash = Sha256::digest(format!("test-bridge-key-{cache_key}").as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&hash[..32]);
        return Ok(key);
    }

    {
        let cache = key_cache().read().expect("key cache lock poisoned");
        if let Some(key) = cache.get(&cache_key) {
            return Ok(*key);
        }
    }

    let mut creds = Credentials::load().unwrap_or_default();
    let key = if let Some(key_b64) = creds.bridge_key() {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, key_b64)
            .context("invalid bridge key encoding in credentials")?;
        bytes.try_into().map_err(|_| anyhow::anyhow!("invalid bridge key length"))?
    } else {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        creds.set_bridge_key(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key));
        creds.save().context("failed to persist new bridge encryption key")?;
        key
    };

    key_cache().write().expect("key cache lock poisoned").insert(cache_key, key);
    Ok(key)
}

/// Load and decrypt bridge state from `identity_path`, if it exists.
pub fn load(identity_path: &Path) -> Result<Option<BridgeState>> {
    if !identity_path.exists() {
        return Ok(None);
    }
    let key = get_or_create_key(identity_path)?;
    let raw = std::fs::read_to_string(identity_path).context("failed to read identity database")?;
    let encrypted: EncryptedData = serde_json::from_str(&raw).context("identity database is not valid JSON")?;
    anyhow::ensure!(encrypted.version == STORE_VERSION, "unsupported identity database version {}", encrypted.version);
    let mut plaintext = crypto::decrypt(&key, &encrypted).context("failed to decrypt identity database")?;
    let state: BridgeState = serde_json::from_slice(&plaintext).context("identity database contents are malformed")?;
    plaintext.zeroize();
    Ok(Some(state))
}

/// Encrypt and write bridge state to `identity_path`, creating parent
/// directories as needed.
pub fn save(identity_path: &Path, state: &BridgeState) -> Result<()> {
    if let Some(parent) = identity_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create identity database directory")?;
    }
    let key = get_or_create_key(identity_path)?;
    let mut plaintext = serde_json::to_vec(state).context("failed to serialize bridge state")?;
    let encrypted = crypto::encrypt(&key, &plaintext, STORE_VERSION)?;
    plaintext.zeroize();
    let json = serde_json::to_string_pretty(&encrypted)?;
    std::fs::write(identity_path, json).context("failed to write identity database")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(identity_path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> BridgeState {
        BridgeState {
            pickled_account: "account-pickle".to_string(),
            pq_public: "pq-pub".to_string(),
            pq_secret: "pq-sec".to_string(),
            pickled_sessions: HashMap::new(),
            prekey_inventory: serde_json::json!({}),
            contacts: serde_json::json!({}),
            history: serde_json::json!({}),
            published_one_time_ids: HashSet::new(),
            last_message_timestamp: 0,
        }
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.db");
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/identity.db");
        let state = sample_state();
        save(&path, &state).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.pickled_account, state.pickled_account);
        assert_eq!(loaded.pq_public, state.pq_public);
    }

    #[test]
    fn test_stored_file_is_not_plaintext_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.db");
        save(&path, &sample_state()).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("account-pickle"));
    }
}
