//! Remux configuration.
//!
//! [`Config`] is deserialized from JSON. Every field defaults, so an empty
//! `{}` file is valid.

use anyhow::{Context, Result};
use fragmux_media::KeyMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Content keys for protected tracks.
    pub keys: Vec<KeyEntry>,
    /// Track to remux when the init segment carries several.
    pub track_id: Option<u32>,
}

/// One hex-encoded key ID / content key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// 16-byte key ID. Hyphens (UUID form) are allowed.
    pub kid: String,
    /// 16-byte AES key.
    pub key: String,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).context("config parse error")
    }

    /// Load configuration from a file, or the defaults when `path` is `None`.
    ///
    /// Unlike a missing optional file, a path that was asked for and
    /// cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_json(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        for warning in config.validate() {
            tracing::warn!("{}: {warning}", path.display());
        }
        Ok(config)
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.keys.is_empty() {
            warnings.push("no keys configured; protected tracks will fail".into());
        }

        let mut seen = HashSet::new();
        for (i, entry) in self.keys.iter().enumerate() {
            let kid = entry.kid.replace('-', "").to_ascii_lowercase();
            if !seen.insert(kid) {
                warnings.push(format!("keys[{i}].kid '{}' is a duplicate", entry.kid));
            }
        }

        if self.track_id == Some(0) {
            warnings.push("track_id 0 is not a valid track ID".into());
        }

        warnings
    }

    /// Build a key map from the configured keys.
    pub fn key_map(&self) -> fragmux_media::Result<KeyMap> {
        let mut keys = KeyMap::new();
        for entry in &self.keys {
            keys.insert_hex(&entry.kid, &entry.key)?;
        }
        Ok(keys)
    }
}
