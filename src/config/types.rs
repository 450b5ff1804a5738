use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Verbosity level controlling tracing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Suppress all output except errors
    Quiet,
    /// Normal output (info level)
    Normal,
    /// Verbose output (debug level)
    Verbose,
    /// Maximum output (trace level)
    Trace,
}

impl From<(bool, u8)> for Verbosity {
    /// Convert from (quiet_flag, verbose_count) to Verbosity.
    ///
    /// - quiet=true -> Quiet (regardless of verbose count)
    /// - verbose=0  -> Normal
    /// - verbose=1  -> Verbose
    /// - verbose=2+ -> Trace
    fn from((quiet, verbose_count): (bool, u8)) -> Self {
        if quiet {
            Verbosity::Quiet
        } else {
            match verbose_count {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}

impl Verbosity {
    /// Return the tracing filter string for this verbosity level.
    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

/// How unknown or changed host keys are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Only hosts already present in known_hosts are accepted.
    Strict,
    /// Unknown hosts are recorded in known_hosts; changed keys are rejected.
    #[default]
    AcceptNew,
    /// No verification at all.
    AcceptAny,
}

/// Settings for the escalation program used by the escalated backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Program invoked on the remote host. Must accept `-n -k --` and
    /// `-S -k -p <prompt> --`.
    pub program: String,
    /// Drop a leading output line naming the program from read results.
    /// Only useful for wrappers that print a banner on stdout.
    pub strip_banner: bool,
    /// Substrings in the program's stderr that mean the secret was rejected.
    pub auth_patterns: Vec<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        EscalationConfig {
            program: "sudo".to_string(),
            strip_banner: false,
            auth_patterns: vec![
                "incorrect password".to_string(),
                "Sorry, try again".to_string(),
                "Authentication failure".to_string(),
                "no password was provided".to_string(),
                "a password is required".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_secs: u64,
    pub host_keys: HostKeyPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout_secs: 30,
            host_keys: HostKeyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Directories this deep are returned without children.
    pub max_depth: usize,
    /// Glob patterns matched against entry names; matches are left out.
    pub exclude: Vec<String>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            max_depth: 32,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Default per-call timeout. Absent means no timeout.
    pub timeout_secs: Option<u64>,
}

/// Contents of `config.toml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub escalation: EscalationConfig,
    pub connection: ConnectionConfig,
    pub tree: TreeConfig,
    pub operation: OperationConfig,
}

impl Settings {
    /// Load `config.toml` from `config_dir`, falling back to defaults when the
    /// file does not exist.
    pub fn load(config_dir: &Path) -> Result<Self, BridgeError> {
        let path = config_dir.join("config.toml");
        if !path.exists() {
            return Ok(Settings::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        Settings::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, BridgeError> {
        toml::from_str(contents)
            .map_err(|e| BridgeError::Config(format!("Invalid config.toml: {}", e)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_secs.max(1))
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.operation.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn verbosity_from_flags() {
        assert_eq!(Verbosity::from((true, 3)), Verbosity::Quiet);
        assert_eq!(Verbosity::from((false, 0)), Verbosity::Normal);
        assert_eq!(Verbosity::from((false, 1)), Verbosity::Verbose);
        assert_eq!(Verbosity::from((false, 5)), Verbosity::Trace);
        assert_eq!(Verbosity::Verbose.as_tracing_filter(), "debug");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.escalation.program, "sudo");
        assert_eq!(settings.tree.max_depth, 32);
        assert_eq!(settings.connect_timeout(), Duration::from_secs(30));
        assert!(settings.default_timeout().is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings = Settings::from_toml(
            r#"
            [tree]
            exclude = [".git", "node_modules"]

            [connection]
            host_keys = "strict"

            [operation]
            timeout_secs = 15
            "#,
        )
        .unwrap();
        assert_eq!(settings.tree.exclude, vec![".git", "node_modules"]);
        assert_eq!(settings.tree.max_depth, 32);
        assert_eq!(settings.connection.host_keys, HostKeyPolicy::Strict);
        assert_eq!(settings.connection.connect_timeout_secs, 30);
        assert_eq!(settings.default_timeout(), Some(Duration::from_secs(15)));
        assert!(!settings.escalation.auth_patterns.is_empty());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = Settings::from_toml("[tree\nmax_depth = ").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
