//! Consolidated keyring storage for node secrets.
//!
//! Stores the node's long-term signing key material and its at-rest
//! encryption key in a single OS keyring entry, to avoid repeated
//! keychain prompts across runs.
//!
//! # Storage
//!
//! Production: single OS keyring entry `radix-relay/credentials` containing JSON.
//! Test mode: file at `{config_dir}/credentials.json`.

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Keyring service name.
const KEYRING_SERVICE: &str = "radix-relay";
/// Consolidated keyring entry name.
const KEYRING_CREDENTIALS: &str = "credentials";

/// Check if keyring should be skipped (any test mode).
fn should_skip_keyring() -> bool {
    #[cfg(test)]
    {
        return true;
    }

    #[cfg(not(test))]
    {
        if let Ok(env_val) = std::env::var("RADIX_ENV") {
            if env_val == "test" || env_val == "system_test" {
                return true;
            }
        }
        crate::env::should_skip_keyring()
    }
}

/// Get the credentials file path for test mode.
fn credentials_file_path() -> Result<PathBuf> {
    crate::config::Config::config_dir().map(|d| d.join("credentials.json"))
}

/// Consolidated node credentials stored in a single keyring entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    /// Base64-encoded Ed25519 signing key for the node identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,

    /// Node fingerprint, stored alongside `signing_key` for verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Base64-encoded AES-256 key used to encrypt the signal bridge's
    /// on-disk state for a given identity database path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_key: Option<String>,

    /// Schema version for future migrations.
    #[serde(default = "default_version")]
    pub version: u8,
}

fn default_version() -> u8 {
    1
}

impl Credentials {
    /// Load credentials from keyring (or file in test mode).
    pub fn load() -> Result<Self> {
        if should_skip_keyring() {
            return Self::load_from_file();
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {e:?}"))?;

        match entry.get_password() {
            Ok(json) => {
                let creds: Credentials = serde_json::from_str(&json)
                    .context("Failed to parse credentials from keyring")?;
                log::debug!("Loaded consolidated credentials from keyring");
                Ok(creds)
            }
            Err(_) => {
                log::debug!("No credentials found in keyring, returning empty");
                Ok(Credentials::default())
            }
        }
    }

    fn load_from_file() -> Result<Self> {
        let path = credentials_file_path()?;
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let creds: Credentials = serde_json::from_str(&content)?;
            log::debug!("Loaded credentials from file (test mode)");
            Ok(creds)
        } else {
            log::debug!("No credentials file found, returning empty");
            Ok(Credentials::default())
        }
    }

    /// Save credentials to keyring (or file in test mode).
    pub fn save(&self) -> Result<()> {
        if should_skip_keyring() {
            return self.save_to_file();
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {e:?}"))?;

        let json = serde_json::to_string(self)?;
        entry
            .set_password(&json)
            .map_err(|e| anyhow::anyhow!("Failed to store credentials in keyring: {e:?}"))?;

        log::info!("Saved consolidated credentials to OS keyring");
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        let path = credentials_file_path()?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        log::debug!("Saved credentials to file (test mode)");
        Ok(())
    }

    /// Delete all credentials from keyring.
    pub fn delete() -> Result<()> {
        if should_skip_keyring() {
            let path = credentials_file_path()?;
            if path.exists() {
                fs::remove_file(&path)?;
            }
            return Ok(());
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {e:?}"))?;

        let _ = entry.delete_credential();
        log::info!("Deleted credentials from OS keyring");
        Ok(())
    }

    /// Get the signing key if set.
    pub fn signing_key(&self) -> Option<&str> {
        self.signing_key.as_deref()
    }

    /// Set the signing key with its fingerprint.
    pub fn set_signing_key(&mut self, key: String, fingerprint: String) {
        self.signing_key = Some(key);
        self.fingerprint = Some(fingerprint);
    }

    /// Check if the stored signing key matches an expected fingerprint.
    pub fn signing_key_matches_fingerprint(&self, expected: &str) -> bool {
        self.fingerprint.as_deref() == Some(expected)
    }

    /// Get the bridge's at-rest encryption key if set.
    pub fn bridge_key(&self) -> Option<&str> {
        self.bridge_key.as_deref()
    }

    /// Set the bridge's at-rest encryption key.
    pub fn set_bridge_key(&mut self, key: String) {
        self.bridge_key = Some(key);
    }
}
