//! Process configuration: CLI-parsed node settings.
//!
//! Holds the inputs §6 calls "local inputs": the identity database path,
//! the transport mode, the verbose flag, and the relay URL. Unlike the
//! node's cryptographic state (owned by `signal::store`), this is plain
//! JSON with no sensitive fields.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::PathBuf};

/// Transport mode carried for display only in the baseline (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Primary WebSocket-over-TLS transport only.
    Internet,
    /// Bluetooth LE transport (stub; §1 non-goal).
    Mesh,
    /// Both, with the mesh side unimplemented.
    Hybrid,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "internet" => Ok(Self::Internet),
            "mesh" => Ok(Self::Mesh),
            "hybrid" => Ok(Self::Hybrid),
            other => anyhow::bail!("Invalid mode: {other} (expected internet, mesh, or hybrid)"),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Internet => write!(f, "internet"),
            Self::Mesh => write!(f, "mesh"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Node configuration for the radix-relay CLI.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Path to the identity database. The bridge is constructed with this
    /// path; it must exist or be creatable.
    pub identity_path: PathBuf,
    /// Transport mode, display-only in the baseline.
    pub mode: Mode,
    /// Raises the default log level to Debug when true.
    pub verbose: bool,
    /// Relay WebSocket URL connected to on startup.
    pub relay_url: String,
}

impl Default for Config {
    fn default() -> Self {
        let identity_path = if crate::env::is_any_test() {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/radix-relay-test/identity.db")
        } else {
            dirs::home_dir()
                .map(|h| h.join(".radix").join("identity.db"))
                .unwrap_or_else(|| PathBuf::from(".radix/identity.db"))
        };

        Self {
            identity_path,
            mode: Mode::Hybrid,
            verbose: false,
            relay_url: "wss://relay.radix.example/ws".to_string(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/radix-relay-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(test_dir) = std::env::var("RADIX_CONFIG_DIR") {
                    PathBuf::from(test_dir)
                } else if crate::env::should_skip_keyring() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/radix-relay-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("radix-relay")
                }
            }
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|_| Self::default());
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("RADIX_IDENTITY_PATH") {
            self.identity_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("RADIX_RELAY_URL") {
            self.relay_url = url;
        }
        if let Ok(mode) = std::env::var("RADIX_MODE") {
            if let Ok(mode) = mode.parse() {
                self.mode = mode;
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mode, Mode::Hybrid);
        assert!(!config.verbose);
        assert!(config.relay_url.starts_with("wss://"));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("internet".parse::<Mode>().unwrap(), Mode::Internet);
        assert_eq!("mesh".parse::<Mode>().unwrap(), Mode::Mesh);
        assert_eq!("hybrid".parse::<Mode>().unwrap(), Mode::Hybrid);
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn test_mode_display_roundtrip() {
        for m in [Mode::Internet, Mode::Mesh, Mode::Hybrid] {
            assert_eq!(m.to_string().parse::<Mode>().unwrap(), m);
        }
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let loaded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.mode, config.mode);
        assert_eq!(loaded.relay_url, config.relay_url);
    }
}
