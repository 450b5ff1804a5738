//! Command-line front end.

pub mod args;
pub mod output;
pub mod shell;
pub mod target;

use std::path::Path;

use crate::config::profiles::{Profile, ProfileStore};
use crate::config::Settings;
use crate::error::BridgeError;
use crate::session::{ConnectRequest, Secret};

use args::ConnectionArgs;
use target::parse_target;

/// Environment variable holding the login password for non-interactive use.
pub const PASSWORD_ENV: &str = "SSHEDIT_PASSWORD";

/// Connection parameters before the secret is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub root: String,
    pub escalate: bool,
}

/// Merge a saved profile, the target string and explicit flags, in that
/// order of increasing precedence.
pub fn resolve_target(
    conn: &ConnectionArgs,
    target_override: Option<&str>,
    config_dir: &Path,
) -> Result<ResolvedTarget, BridgeError> {
    let mut host = None;
    let mut port = None;
    let mut username = None;
    let mut root = None;
    let mut escalate = conn.sudo;

    if let Some(name) = &conn.profile {
        let store = ProfileStore::load(config_dir)?;
        let profile = store
            .get(name)
            .ok_or_else(|| BridgeError::InvalidInput(format!("Unknown profile '{}'", name)))?;
        host = Some(profile.host.clone());
        port = Some(profile.port);
        username = Some(profile.username.clone());
        root = Some(profile.root.clone());
        escalate |= profile.escalate;
    }

    if let Some(raw) = target_override.or(conn.target.as_deref()) {
        let target = parse_target(raw)?;
        host = Some(target.host);
        port = target.port.or(port);
        username = target.username.or(username);
        root = target.path.or(root);
    }

    host = conn.host.clone().or(host);
    port = conn.port.or(port);
    username = conn.user.clone().or(username);
    root = conn.root.clone().or(root);

    let host = host.ok_or_else(|| {
        BridgeError::InvalidInput("No remote host given (use --target, --host or --profile)".into())
    })?;
    let username = match username.or_else(local_user) {
        Some(user) => user,
        None => return Err(BridgeError::InvalidInput("No remote user given (use --user)".into())),
    };

    Ok(ResolvedTarget {
        host,
        port: port.unwrap_or(22),
        username,
        root: root.unwrap_or_else(|| ".".to_string()),
        escalate,
    })
}

fn local_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}

/// Read the login password from `SSHEDIT_PASSWORD` or prompt for it.
pub fn read_secret(target: &ResolvedTarget) -> Result<Secret, BridgeError> {
    if let Ok(value) = std::env::var(PASSWORD_ENV) {
        return Ok(Secret::new(value));
    }
    let prompt = format!("{}@{}'s password: ", target.username, target.host);
    let value = rpassword::prompt_password(prompt)?;
    Ok(Secret::new(value))
}

pub fn connect_request(target: &ResolvedTarget, secret: Secret) -> ConnectRequest {
    ConnectRequest {
        host: target.host.clone(),
        port: target.port,
        username: target.username.clone(),
        secret,
        root_path: target.root.clone(),
        escalate: target.escalate,
    }
}

/// Apply command-line overrides to the loaded settings.
pub fn apply_overrides(settings: &mut Settings, conn: &ConnectionArgs) {
    if let Some(policy) = conn.host_keys {
        settings.connection.host_keys = policy;
    }
    if let Some(secs) = conn.timeout {
        settings.operation.timeout_secs = Some(secs);
    }
}

/// Build a profile from a target string.
pub fn profile_from_target(raw: &str, escalate: bool) -> Result<Profile, BridgeError> {
    let target = parse_target(raw)?;
    let username = target
        .username
        .or_else(local_user)
        .ok_or_else(|| BridgeError::InvalidInput("Target must include a user (user@host)".into()))?;
    Ok(Profile {
        host: target.host,
        port: target.port.unwrap_or(22),
        username,
        root: target.path.unwrap_or_else(|| ".".to_string()),
        escalate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn conn() -> ConnectionArgs {
        ConnectionArgs {
            user: Some("tester".into()),
            ..Default::default()
        }
    }

    #[test]
    fn flags_override_target() {
        let dir = TempDir::new().unwrap();
        let mut args = conn();
        args.target = Some("ssh://deploy@web:2222/srv".into());
        args.root = Some("/etc".into());
        let resolved = resolve_target(&args, None, dir.path()).unwrap();
        assert_eq!(resolved.host, "web");
        assert_eq!(resolved.port, 2222);
        assert_eq!(resolved.username, "tester");
        assert_eq!(resolved.root, "/etc");
        assert!(!resolved.escalate);
    }

    #[test]
    fn profile_supplies_defaults() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = ProfileStore::load(dir.path()).unwrap();
            store.add(
                "web".into(),
                Profile {
                    host: "web01".into(),
                    port: 22,
                    username: "deploy".into(),
                    root: "/var/www".into(),
                    escalate: true,
                },
            );
            store.save().unwrap();
        }
        let args = ConnectionArgs {
            profile: Some("web".into()),
            ..Default::default()
        };
        let resolved = resolve_target(&args, None, dir.path()).unwrap();
        assert_eq!(
            resolved,
            ResolvedTarget {
                host: "web01".into(),
                port: 22,
                username: "deploy".into(),
                root: "/var/www".into(),
                escalate: true,
            }
        );
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let dir = TempDir::new().unwrap();
        let args = ConnectionArgs {
            profile: Some("nope".into()),
            ..Default::default()
        };
        assert!(resolve_target(&args, None, dir.path()).is_err());
    }

    #[test]
    fn missing_host_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            resolve_target(&conn(), None, dir.path()),
            Err(BridgeError::InvalidInput(_))
        ));
    }

    #[test]
    fn overrides_reach_settings() {
        let mut settings = Settings::default();
        let args = ConnectionArgs {
            timeout: Some(7),
            host_keys: Some(crate::config::HostKeyPolicy::Strict),
            ..Default::default()
        };
        apply_overrides(&mut settings, &args);
        assert_eq!(settings.operation.timeout_secs, Some(7));
        assert_eq!(settings.connection.host_keys, crate::config::HostKeyPolicy::Strict);
    }
}
