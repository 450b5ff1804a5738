use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication rejected: {reason}")]
    Auth { reason: String },

    #[error("Transport error during {op}: {reason}")]
    Transport { op: &'static str, reason: String },

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Elevated {op} failed for {path}: {message}")]
    Escalation {
        op: &'static str,
        path: String,
        message: String,
    },

    #[error("{op} failed for {path}: {reason}")]
    OperationFailed {
        op: &'static str,
        path: String,
        reason: String,
    },

    #[error("Operation {op} timed out")]
    Timeout { op: &'static str },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Stable error taxonomy exposed to callers.
///
/// Several `BridgeError` variants can share a kind; callers that only need to
/// branch on the category (HTTP status, exit code) match on this instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConnected,
    Connection,
    Auth,
    Transport,
    NotFound,
    Permission,
    Escalation,
    Timeout,
    OperationFailed,
    InvalidInput,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Connection => "connection",
            ErrorKind::Auth => "auth",
            ErrorKind::Transport => "transport",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Permission => "permission",
            ErrorKind::Escalation => "escalation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::OperationFailed => "operation_failed",
            ErrorKind::InvalidInput => "invalid_input",
        };
        f.write_str(name)
    }
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::NotConnected => ErrorKind::NotConnected,
            BridgeError::Connection { .. } => ErrorKind::Connection,
            BridgeError::Auth { .. } => ErrorKind::Auth,
            BridgeError::Transport { .. } | BridgeError::Io { .. } => ErrorKind::Transport,
            BridgeError::NotFound { .. } => ErrorKind::NotFound,
            BridgeError::PermissionDenied { .. } => ErrorKind::Permission,
            BridgeError::Escalation { .. } => ErrorKind::Escalation,
            BridgeError::Timeout { .. } => ErrorKind::Timeout,
            BridgeError::OperationFailed { .. } => ErrorKind::OperationFailed,
            BridgeError::InvalidInput(_) | BridgeError::Config(_) => ErrorKind::InvalidInput,
        }
    }

    /// True when the failure leaves the transport unusable.
    ///
    /// The session manager tears the session down after a fatal error so that
    /// later calls fail with `NotConnected` instead of reusing a broken channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Transport { .. } | BridgeError::Timeout { .. }
        )
    }

    /// Returns a user-friendly suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            BridgeError::NotConnected => Some("Connect first (`connect` in the shell)."),
            BridgeError::Connection { .. } => {
                Some("Check that the host is reachable and the port is correct.")
            }
            BridgeError::Auth { .. } => Some("Check the username and password."),
            BridgeError::Transport { .. } => {
                Some("The SSH session was lost. Reconnect and retry.")
            }
            BridgeError::NotFound { .. } => {
                Some("Check the path exists and spelling is correct.")
            }
            BridgeError::PermissionDenied { .. } => {
                Some("Reconnect with --sudo to access files owned by another user.")
            }
            BridgeError::Escalation { .. } => {
                Some("Check that the remote user may run the escalation program.")
            }
            BridgeError::Timeout { .. } => {
                Some("Increase the timeout, then reconnect before retrying.")
            }
            BridgeError::Config(_) => Some("Check config.toml in the sshedit config directory."),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for BridgeError {
    fn from(err: toml::ser::Error) -> Self {
        BridgeError::Config(format!("TOML serialization error: {}", err))
    }
}

impl From<globset::Error> for BridgeError {
    fn from(err: globset::Error) -> Self {
        BridgeError::Config(format!(
            "Invalid exclude pattern '{}': {}",
            err.glob().unwrap_or_default(),
            err.kind()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_and_suggestion() {
        let err = BridgeError::NotFound {
            path: "/tmp/missing.txt".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Not found"));
        assert!(msg.contains("missing.txt"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.suggestion(),
            Some("Check the path exists and spelling is correct.")
        );
    }

    #[test]
    fn permission_denied_suggests_escalation() {
        let err = BridgeError::PermissionDenied {
            path: "/root/secret".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert!(err.suggestion().unwrap().contains("--sudo"));
    }

    #[test]
    fn escalation_error_carries_remote_text() {
        let err = BridgeError::Escalation {
            op: "write",
            path: "/etc/hosts".to_string(),
            message: "dd: read-only file system".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("write"));
        assert!(msg.contains("/etc/hosts"));
        assert!(msg.contains("read-only file system"));
    }

    #[test]
    fn only_transport_faults_are_fatal() {
        assert!(BridgeError::Transport {
            op: "read",
            reason: "channel closed".into()
        }
        .is_fatal());
        assert!(BridgeError::Timeout { op: "list" }.is_fatal());
        assert!(!BridgeError::NotConnected.is_fatal());
        assert!(!BridgeError::Auth {
            reason: "bad".into()
        }
        .is_fatal());
        assert!(!BridgeError::NotFound { path: "/x".into() }.is_fatal());
    }

    #[test]
    fn io_error_maps_to_transport_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: BridgeError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.suggestion().is_none());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotConnected).unwrap();
        assert_eq!(json, "\"not_connected\"");
        assert_eq!(ErrorKind::Permission.to_string(), "permission");
    }

    #[test]
    fn server_rejections_are_operation_failed_and_keep_the_session() {
        let err = BridgeError::OperationFailed {
            op: "remove_dir",
            path: "/srv/full".into(),
            reason: "directory not empty".into(),
        };
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
        assert!(!err.is_fatal());
        let json = serde_json::to_string(&err.kind()).unwrap();
        assert_eq!(json, "\"operation_failed\"");
    }
}
