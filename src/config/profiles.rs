//! Saved connection profiles.
//!
//! Persists named connections in `profiles.toml` within the config directory.
//! Secrets are never stored; they are supplied at connect time.
//!
//! An exclusive advisory lock on `profiles.lock` is held for the lifetime of a
//! `ProfileStore`, so concurrent `sshedit profile` invocations cannot clobber
//! each other's writes.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

fn default_port() -> u16 {
    22
}

fn default_root() -> String {
    ".".to_string()
}

/// One saved connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default)]
    pub escalate: bool,
}

/// Serialized profile file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfileFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

/// In-memory representation of the profile store backed by a TOML file.
pub struct ProfileStore {
    path: PathBuf,
    data: ProfileFile,
    _lock_file: File,
}

impl ProfileStore {
    /// Load profiles from `profiles.toml` in the given config directory.
    ///
    /// Blocks until the store lock is available. Returns an empty store if the
    /// file does not exist.
    pub fn load(config_dir: &Path) -> Result<Self, BridgeError> {
        let lock_file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(config_dir.join("profiles.lock"))?;
        lock_file.lock_exclusive()?;

        let path = config_dir.join("profiles.toml");
        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents)
                .map_err(|e| BridgeError::Config(format!("Invalid profiles.toml: {}", e)))?
        } else {
            ProfileFile::default()
        };
        Ok(Self {
            path,
            data,
            _lock_file: lock_file,
        })
    }

    /// Save profiles to disk atomically (write to tmp file, then rename).
    pub fn save(&self) -> Result<(), BridgeError> {
        let contents = toml::to_string_pretty(&self.data)?;
        let tmp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Add or replace a profile.
    pub fn add(&mut self, name: String, profile: Profile) {
        self.data.profiles.insert(name, profile);
    }

    /// Remove a profile by name. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.data.profiles.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.data.profiles.get(name)
    }

    pub fn list(&self) -> &BTreeMap<String, Profile> {
        &self.data.profiles
    }
}

/// Validate that a profile name is acceptable.
///
/// Names are at least 2 characters of ASCII alphanumerics, `-` and `_`, and
/// must not start with a digit.
pub fn validate_profile_name(name: &str) -> Result<(), BridgeError> {
    if name.len() < 2 {
        return Err(BridgeError::InvalidInput(
            "Profile name must be at least 2 characters".into(),
        ));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(BridgeError::InvalidInput(
            "Profile name must not start with a digit".into(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(BridgeError::InvalidInput(
            "Profile name must contain only alphanumeric characters, hyphens, and underscores"
                .into(),
        ));
    }
    Ok(())
}
