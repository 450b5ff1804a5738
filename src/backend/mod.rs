pub mod command;
pub mod direct;
pub mod escalated;

use std::sync::Arc;
use std::time::Duration;

use crate::config::EscalationConfig;
use crate::error::BridgeError;
use crate::path::RemotePath;
use crate::session::Secret;
use crate::transport::{RemoteEntry, RemoteStat, Transport};

/// Core abstraction for the two ways of touching remote files.
///
/// The direct backend maps each call onto SFTP; the escalated backend runs
/// privileged shell commands. Callers never know which one they hold.
pub trait RemoteFs: Send + Sync {
    /// Get file/directory metadata, following symbolic links.
    fn stat(&self, path: &RemotePath) -> Result<RemoteStat, BridgeError>;

    /// List directory contents (non-recursive).
    fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, BridgeError>;

    /// Read a whole file.
    fn read_file(&self, path: &RemotePath) -> Result<Vec<u8>, BridgeError>;

    /// Replace the file's content, creating it if absent.
    fn write_file(&self, path: &RemotePath, content: &[u8]) -> Result<(), BridgeError>;

    /// Create a directory and any missing parents. Succeeds if it exists.
    fn mkdir(&self, path: &RemotePath) -> Result<(), BridgeError>;

    /// Remove a file or a directory tree.
    fn remove(&self, path: &RemotePath) -> Result<(), BridgeError>;

    /// A handle on the same session whose remote calls are each bounded by
    /// `timeout`.
    fn with_timeout(&self, timeout: Option<Duration>) -> Box<dyn RemoteFs>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Create the backend a session was configured with.
///
/// The choice is made once per session; there is no fallback between
/// backends within a call.
pub fn create_backend(
    transport: Arc<dyn Transport>,
    escalate: bool,
    secret: &Secret,
    escalation: &EscalationConfig,
) -> Box<dyn RemoteFs> {
    if escalate {
        Box::new(escalated::EscalatedBackend::new(
            transport,
            secret.clone(),
            escalation.clone(),
        ))
    } else {
        Box::new(direct::DirectBackend::new(transport))
    }
}
