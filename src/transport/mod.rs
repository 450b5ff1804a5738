//! The Transport Client: one SSH connection and its SFTP sub-channel.
//!
//! `Transport` exposes the SFTP primitives one-to-one plus `exec`, which runs
//! a shell command line with bytes fed to its standard input. Backends are
//! built on top of these primitives; nothing above this module talks to
//! libssh2 directly.

pub mod memory;
pub mod ssh;

use std::time::Duration;

use crate::error::BridgeError;
use crate::path::RemotePath;
use crate::session::Secret;

/// Kind of a remote filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// Metadata reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<u64>,
    pub permissions: Option<u32>,
}

impl RemoteStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// One entry of a directory listing. `stat` describes the entry itself,
/// not the target of a symbolic link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub stat: RemoteStat,
}

/// Result of a remote command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the command was killed by a signal or the channel closed
    /// without reporting a status.
    pub exit_status: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Core abstraction over the remote connection.
///
/// Implementations must be safe to call from several threads; the libssh2
/// implementation serializes calls internally. Every call takes its own
/// `timeout` bounding each blocking step; `None` waits indefinitely.
pub trait Transport: Send + Sync {
    /// Metadata for `path`, following symbolic links.
    fn stat(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<RemoteStat, BridgeError>;

    /// Metadata for `path` itself, without following a final symbolic link.
    fn lstat(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<RemoteStat, BridgeError>;

    /// List directory contents (non-recursive, without `.` and `..`).
    fn read_dir(
        &self,
        path: &RemotePath,
        timeout: Option<Duration>,
    ) -> Result<Vec<RemoteEntry>, BridgeError>;

    /// Read a whole file.
    fn read(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<Vec<u8>, BridgeError>;

    /// Create or truncate `path`, then write `content`.
    fn write(
        &self,
        path: &RemotePath,
        content: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), BridgeError>;

    /// Create a single directory level.
    fn mkdir(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<(), BridgeError>;

    /// Remove a file. Fails on directories.
    fn remove_file(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<(), BridgeError>;

    /// Remove an empty directory. Fails on files.
    fn remove_dir(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<(), BridgeError>;

    /// Run `command` through the remote shell, streaming `stdin` to it.
    fn exec(
        &self,
        command: &str,
        stdin: &[u8],
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, BridgeError>;

    /// Close the connection and release its sockets. Idempotent.
    fn close(&self) -> Result<(), BridgeError>;
}

/// Parameters for opening a transport.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: Secret,
}

/// Opens transports. The session manager holds one connector for its lifetime.
pub trait Connector: Send + Sync {
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Transport>, BridgeError>;
}
