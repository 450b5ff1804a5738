//! Platform-specific config directory helper.
//!
//! Uses the `dirs` crate to resolve the platform config directory:
//! - Linux:   `~/.config/sshedit/`
//! - Windows: `%APPDATA%\sshedit\`
//! - macOS:   `~/Library/Application Support/sshedit/`
//!
//! `SSHEDIT_CONFIG_DIR` overrides the location.

use std::path::PathBuf;

use crate::error::BridgeError;

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "SSHEDIT_CONFIG_DIR";

/// Get the sshedit config directory, creating it if needed.
pub fn config_dir() -> Result<PathBuf, BridgeError> {
    let dir = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => dirs::config_dir()
            .ok_or_else(|| BridgeError::Config("Could not determine config directory".into()))?
            .join("sshedit"),
    };
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Location of the user's OpenSSH known_hosts file.
pub fn known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_exists_after_call() {
        let dir = config_dir().expect("should resolve config dir");
        assert!(dir.exists());
    }

    #[test]
    fn known_hosts_lives_under_dot_ssh() {
        if let Some(path) = known_hosts_path() {
            assert!(path.ends_with(".ssh/known_hosts"));
        }
    }
}
