//! SSH transport using the ssh2 crate (libssh2 bindings).
//!
//! One `SshTransport` owns one SSH session, the SFTP subsystem opened on it,
//! and opens short-lived exec channels for remote commands. Authentication
//! is by password only.
//!
//! # Thread safety
//!
//! `libssh2` is **not** thread-safe. `ssh2::Session` and `ssh2::Sftp` must
//! never be accessed concurrently from multiple threads. The connection state
//! lives in a `Mutex<SshInner>`; every `Transport` method acquires the lock
//! before calling into libssh2 and releases it before returning.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD_NO_PAD as BASE64_NO_PAD;
use base64::Engine;
use ssh2::{
    CheckResult, ErrorCode, FileStat, HashType, KnownHostFileKind, OpenFlags, OpenType, Session,
    Sftp,
};

use crate::config::HostKeyPolicy;
use crate::error::BridgeError;
use crate::path::RemotePath;
use crate::transport::{
    ConnectParams, Connector, EntryKind, ExecOutput, RemoteEntry, RemoteStat, Transport,
};

/// Default SSH port.
const DEFAULT_SSH_PORT: u16 = 22;

/// libssh2 session error code for an expired timeout.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

// SFTP status codes (draft-ietf-secsh-filexfer-02).
const SSH_FX_NO_SUCH_FILE: i32 = 2;
const SSH_FX_PERMISSION_DENIED: i32 = 3;
const SSH_FX_NO_SUCH_PATH: i32 = 10;
const SSH_FX_WRITE_PROTECT: i32 = 12;

/// Inner connection state that owns the libssh2 handles.
///
/// Both `Session` and `Sftp` are stored together so a single `Mutex` covers
/// all libssh2 calls. Separating them into two mutexes would be unsound
/// because `Sftp` internally borrows resources from `Session`.
struct SshInner {
    session: Session,
    /// `None` once the transport has been closed.
    sftp: Option<Sftp>,
}

// SAFETY: `SshInner` contains `Session` and `Sftp`, which each wrap a raw
// pointer into libssh2's heap-allocated session struct. libssh2 is not
// thread-safe, so these types must not be touched by two threads at once.
//
// `SshInner` is ONLY ever accessed through a `Mutex<SshInner>`, which
// guarantees exclusive access. Moving it to another thread is sound because
// the raw pointer stays valid for the lifetime of the `Session` value.
unsafe impl Send for SshInner {}

/// Opens `SshTransport`s with a fixed connect timeout and host-key policy.
pub struct SshConnector {
    connect_timeout: Duration,
    host_keys: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
}

impl SshConnector {
    pub fn new(
        connect_timeout: Duration,
        host_keys: HostKeyPolicy,
        known_hosts: Option<PathBuf>,
    ) -> Self {
        SshConnector {
            connect_timeout,
            host_keys,
            known_hosts,
        }
    }
}

impl Connector for SshConnector {
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Transport>, BridgeError> {
        let transport = SshTransport::connect(
            params,
            self.connect_timeout,
            self.host_keys,
            self.known_hosts.as_deref(),
        )?;
        Ok(Box::new(transport))
    }
}

/// A live SSH connection with its SFTP channel.
pub struct SshTransport {
    inner: Mutex<SshInner>,
    host: String,
}

impl SshTransport {
    /// Connect, verify the host key, authenticate with the password and open
    /// the SFTP subsystem.
    pub fn connect(
        params: &ConnectParams,
        connect_timeout: Duration,
        host_keys: HostKeyPolicy,
        known_hosts: Option<&Path>,
    ) -> Result<Self, BridgeError> {
        let host = params.host.as_str();
        let port = if params.port == 0 {
            DEFAULT_SSH_PORT
        } else {
            params.port
        };
        let conn_err = |reason: String| BridgeError::Connection {
            host: host.to_string(),
            reason,
        };

        let tcp = connect_tcp(host, port, connect_timeout).map_err(conn_err)?;

        let mut session = Session::new()
            .map_err(|e| conn_err(format!("Failed to create SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(Some(connect_timeout)));
        session
            .handshake()
            .map_err(|e| conn_err(format!("SSH handshake failed: {}", e)))?;

        verify_host_key(&session, host, port, host_keys, known_hosts)?;

        if let Err(e) = session.userauth_password(&params.username, params.secret.expose()) {
            tracing::debug!("password authentication failed for {}@{}: {}", params.username, host, e);
        }
        if !session.authenticated() {
            return Err(BridgeError::Auth {
                reason: format!("password rejected for {}@{}", params.username, host),
            });
        }

        let sftp = session
            .sftp()
            .map_err(|e| conn_err(format!("Failed to open SFTP channel: {}", e)))?;
        session.set_timeout(0);

        tracing::info!(host, port, user = %params.username, "SSH session established");

        Ok(SshTransport {
            inner: Mutex::new(SshInner {
                session,
                sftp: Some(sftp),
            }),
            host: host.to_string(),
        })
    }

    /// Acquire the inner mutex, converting a poisoned mutex into a transport error.
    fn lock(&self, op: &'static str) -> Result<MutexGuard<'_, SshInner>, BridgeError> {
        self.inner.lock().map_err(|_| BridgeError::Transport {
            op,
            reason: "SSH connection mutex was poisoned; a previous operation panicked".into(),
        })
    }

    /// Acquire the connection for one call and bound it by `timeout`.
    ///
    /// libssh2 keeps a single timeout per session. Setting it while the
    /// mutex is held gives each call its own bound.
    fn begin(
        &self,
        op: &'static str,
        timeout: Option<Duration>,
    ) -> Result<MutexGuard<'_, SshInner>, BridgeError> {
        let guard = self.lock(op)?;
        guard.session.set_timeout(timeout_millis(timeout));
        Ok(guard)
    }
}

/// Borrow the SFTP handle, failing once the transport is closed.
fn sftp<'a>(inner: &'a SshInner, op: &'static str) -> Result<&'a Sftp, BridgeError> {
    inner.sftp.as_ref().ok_or_else(|| BridgeError::Transport {
        op,
        reason: "connection closed".into(),
    })
}

impl Transport for SshTransport {
    fn stat(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<RemoteStat, BridgeError> {
        let guard = self.begin("stat", timeout)?;
        let stat = sftp(&guard, "stat")?
            .stat(Path::new(path.as_str()))
            .map_err(|e| sftp_err(e, "stat", path))?;
        Ok(convert_stat(&stat))
    }

    fn lstat(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<RemoteStat, BridgeError> {
        let guard = self.begin("lstat", timeout)?;
        let stat = sftp(&guard, "lstat")?
            .lstat(Path::new(path.as_str()))
            .map_err(|e| sftp_err(e, "lstat", path))?;
        Ok(convert_stat(&stat))
    }

    fn read_dir(
        &self,
        path: &RemotePath,
        timeout: Option<Duration>,
    ) -> Result<Vec<RemoteEntry>, BridgeError> {
        let guard = self.begin("read_dir", timeout)?;
        let entries = sftp(&guard, "read_dir")?
            .readdir(Path::new(path.as_str()))
            .map_err(|e| sftp_err(e, "read_dir", path))?;

        let mut result = Vec::with_capacity(entries.len());
        for (entry_path, stat) in entries {
            let Some(name) = entry_path.file_name() else {
                continue;
            };
            let name = name.to_string_lossy();
            if name == "." || name == ".." {
                continue;
            }
            result.push(RemoteEntry {
                name: name.into_owned(),
                stat: convert_stat(&stat),
            });
        }
        Ok(result)
    }

    fn read(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<Vec<u8>, BridgeError> {
        let guard = self.begin("read", timeout)?;
        // `ssh2::File` borrows from `Sftp`, so the whole file is read while
        // the guard is held.
        let mut file = sftp(&guard, "read")?
            .open_mode(Path::new(path.as_str()), OpenFlags::READ, 0o644, OpenType::File)
            .map_err(|e| sftp_err(e, "read", path))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| io_err(e, "read", path))?;
        Ok(buf)
    }

    fn write(
        &self,
        path: &RemotePath,
        content: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), BridgeError> {
        let guard = self.begin("write", timeout)?;
        let mut file = sftp(&guard, "write")?
            .open_mode(
                Path::new(path.as_str()),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                0o644,
                OpenType::File,
            )
            .map_err(|e| sftp_err(e, "write", path))?;
        file.write_all(content)
            .map_err(|e| io_err(e, "write", path))?;
        file.fsync().ok();
        Ok(())
    }

    fn mkdir(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<(), BridgeError> {
        let guard = self.begin("mkdir", timeout)?;
        sftp(&guard, "mkdir")?
            .mkdir(Path::new(path.as_str()), 0o755)
            .map_err(|e| sftp_err(e, "mkdir", path))
    }

    fn remove_file(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<(), BridgeError> {
        let guard = self.begin("remove_file", timeout)?;
        sftp(&guard, "remove_file")?
            .unlink(Path::new(path.as_str()))
            .map_err(|e| sftp_err(e, "remove_file", path))
    }

    fn remove_dir(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<(), BridgeError> {
        let guard = self.begin("remove_dir", timeout)?;
        sftp(&guard, "remove_dir")?
            .rmdir(Path::new(path.as_str()))
            .map_err(|e| sftp_err(e, "remove_dir", path))
    }

    fn exec(
        &self,
        command: &str,
        stdin: &[u8],
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, BridgeError> {
        let guard = self.begin("exec", timeout)?;
        if guard.sftp.is_none() {
            return Err(BridgeError::Transport {
                op: "exec",
                reason: "connection closed".into(),
            });
        }
        let chan_err = |e: ssh2::Error| channel_err(e, "exec");

        let mut channel = guard.session.channel_session().map_err(chan_err)?;
        channel.exec(command).map_err(chan_err)?;
        channel.write_all(stdin).map_err(exec_io_err)?;
        channel.send_eof().map_err(chan_err)?;

        let mut stdout = Vec::new();
        channel
            .read_to_end(&mut stdout)
            .map_err(exec_io_err)?;
        let mut stderr = Vec::new();
        channel
            .stderr()
            .read_to_end(&mut stderr)
            .map_err(exec_io_err)?;

        channel.wait_close().map_err(chan_err)?;
        let killed = channel
            .exit_signal()
            .map(|s| s.exit_signal.is_some())
            .unwrap_or(false);
        let exit_status = if killed {
            None
        } else {
            Some(channel.exit_status().map_err(chan_err)?)
        };

        tracing::trace!(?exit_status, stdout = stdout.len(), stderr = stderr.len(), "exec finished");
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_status,
        })
    }

    fn close(&self) -> Result<(), BridgeError> {
        let mut guard = self.lock("close")?;
        // Dropping the SFTP handle closes the subsystem channel before the
        // session goes away.
        if guard.sftp.take().is_some() {
            guard
                .session
                .disconnect(None, "closing", None)
                .map_err(|e| channel_err(e, "close"))?;
            tracing::info!(host = %self.host, "SSH session closed");
        }
        Ok(())
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Resolve `host` and connect to the first address that answers in time.
fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, String> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("Cannot resolve '{}': {}", host, e))?;

    let mut last_err = format!("No addresses found for '{}'", host);
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = format!("TCP connection to {} failed: {}", addr, e),
        }
    }
    Err(last_err)
}

fn timeout_millis(timeout: Option<Duration>) -> u32 {
    match timeout {
        Some(t) => u32::try_from(t.as_millis()).unwrap_or(u32::MAX).max(1),
        None => 0,
    }
}

fn convert_stat(stat: &FileStat) -> RemoteStat {
    let file_type = stat.file_type();
    let kind = if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };
    RemoteStat {
        kind,
        size: stat.size.unwrap_or(0),
        modified: stat.mtime,
        permissions: stat.perm,
    }
}

/// Verify the remote server's host key against the known_hosts file.
///
/// - `Match`    proceeds.
/// - `Mismatch` is always rejected: the stored key differs from the one the
///   server presented, which may indicate a man-in-the-middle attack.
/// - `NotFound` is rejected under `Strict`; under `AcceptNew` the key is
///   appended to known_hosts.
/// - `Failure`  (unreadable file) is rejected under `Strict` and logged
///   otherwise.
fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts_path: Option<&Path>,
) -> Result<(), BridgeError> {
    if policy == HostKeyPolicy::AcceptAny {
        tracing::warn!("host key verification disabled for {}", host);
        return Ok(());
    }
    let reject = |reason: String| BridgeError::Connection {
        host: host.to_string(),
        reason,
    };

    let (key_bytes, key_type) = session
        .host_key()
        .ok_or_else(|| reject("Server did not provide a host key during handshake.".into()))?;
    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| reject(format!("Failed to initialise known-hosts store: {}", e)))?;
    let known_hosts_path = known_hosts_path
        .ok_or_else(|| reject("Cannot locate ~/.ssh/known_hosts.".into()))?;

    // A missing file is expected for new users; check() then reports NotFound.
    let file_loaded = known_hosts
        .read_file(known_hosts_path, KnownHostFileKind::OpenSSH)
        .is_ok();

    match known_hosts.check_port(host, port, key_bytes) {
        CheckResult::Match => {
            tracing::debug!("host key verified for {}:{}", host, port);
            Ok(())
        }
        CheckResult::Mismatch => Err(reject(format!(
            "Host key mismatch for '{}' (server presents {}). Refusing connection; \
             if the key legitimately changed, remove the old entry from {}.",
            host,
            fingerprint(session),
            known_hosts_path.display()
        ))),
        CheckResult::NotFound if policy == HostKeyPolicy::Strict => Err(reject(format!(
            "Unknown host key {} for '{}' and host key policy is strict.",
            fingerprint(session),
            host
        ))),
        CheckResult::NotFound => {
            let entry_host = if port == DEFAULT_SSH_PORT {
                host.to_string()
            } else {
                format!("[{}]:{}", host, port)
            };
            let key_format = key_type.into();
            if let Err(e) = known_hosts.add(&entry_host, key_bytes, "added by sshedit", key_format) {
                tracing::warn!("could not record host key for '{}': {}", host, e);
                return Ok(());
            }
            if let Some(parent) = known_hosts_path.parent() {
                if !parent.exists() {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::DirBuilderExt;
                        std::fs::DirBuilder::new()
                            .recursive(true)
                            .mode(0o700)
                            .create(parent)
                            .ok();
                    }
                    #[cfg(not(unix))]
                    {
                        std::fs::create_dir_all(parent).ok();
                    }
                }
            }
            match known_hosts.write_file(known_hosts_path, KnownHostFileKind::OpenSSH) {
                Ok(()) => tracing::info!(
                    "permanently added '{}' ({}) to known hosts",
                    entry_host,
                    fingerprint(session)
                ),
                Err(e) => tracing::warn!(
                    "could not write known_hosts file '{}': {}",
                    known_hosts_path.display(),
                    e
                ),
            }
            Ok(())
        }
        CheckResult::Failure if policy == HostKeyPolicy::Strict => Err(reject(format!(
            "Could not verify host key for '{}' against {}.",
            host,
            known_hosts_path.display()
        ))),
        CheckResult::Failure => {
            tracing::warn!(
                "could not verify host key for '{}' (known_hosts loaded: {}); proceeding",
                host,
                file_loaded
            );
            Ok(())
        }
    }
}

/// Format the server's host key hash the way `ssh-keygen -l` does.
fn fingerprint(session: &Session) -> String {
    if let Some(hash) = session.host_key_hash(HashType::Sha256) {
        format!("SHA256:{}", BASE64_NO_PAD.encode(hash))
    } else if let Some(hash) = session.host_key_hash(HashType::Md5) {
        let hex: Vec<String> = hash.iter().map(|b| format!("{:02x}", b)).collect();
        format!("MD5:{}", hex.join(":"))
    } else {
        "(fingerprint unavailable)".to_string()
    }
}

/// Map an SFTP-level failure onto the error taxonomy.
fn sftp_err(e: ssh2::Error, op: &'static str, path: &RemotePath) -> BridgeError {
    match e.code() {
        ErrorCode::SFTP(SSH_FX_NO_SUCH_FILE) | ErrorCode::SFTP(SSH_FX_NO_SUCH_PATH) => {
            BridgeError::NotFound {
                path: path.to_string(),
            }
        }
        ErrorCode::SFTP(SSH_FX_PERMISSION_DENIED) | ErrorCode::SFTP(SSH_FX_WRITE_PROTECT) => {
            BridgeError::PermissionDenied {
                path: path.to_string(),
            }
        }
        ErrorCode::SFTP(_) => BridgeError::OperationFailed {
            op,
            path: path.to_string(),
            reason: e.message().to_string(),
        },
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => BridgeError::Timeout { op },
        ErrorCode::Session(_) => BridgeError::Transport {
            op,
            reason: e.message().to_string(),
        },
    }
}

/// Map a channel/session failure (no path involved).
fn channel_err(e: ssh2::Error, op: &'static str) -> BridgeError {
    match e.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => BridgeError::Timeout { op },
        _ => BridgeError::Transport {
            op,
            reason: e.message().to_string(),
        },
    }
}

/// Map an I/O error raised while streaming file content.
fn io_err(e: std::io::Error, op: &'static str, path: &RemotePath) -> BridgeError {
    match e.kind() {
        std::io::ErrorKind::TimedOut => BridgeError::Timeout { op },
        std::io::ErrorKind::NotFound => BridgeError::NotFound {
            path: path.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => BridgeError::PermissionDenied {
            path: path.to_string(),
        },
        _ => BridgeError::Transport {
            op,
            reason: e.to_string(),
        },
    }
}

fn exec_io_err(e: std::io::Error) -> BridgeError {
    match e.kind() {
        std::io::ErrorKind::TimedOut => BridgeError::Timeout { op: "exec" },
        _ => BridgeError::Transport {
            op: "exec",
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> RemotePath {
        RemotePath::parse(s).unwrap()
    }

    #[test]
    fn sftp_codes_map_to_taxonomy() {
        let p = path("/srv/x");
        let not_found = ssh2::Error::new(ErrorCode::SFTP(SSH_FX_NO_SUCH_FILE), "no such file");
        assert!(matches!(
            sftp_err(not_found, "read", &p),
            BridgeError::NotFound { .. }
        ));
        let denied = ssh2::Error::new(ErrorCode::SFTP(SSH_FX_PERMISSION_DENIED), "denied");
        assert!(matches!(
            sftp_err(denied, "read", &p),
            BridgeError::PermissionDenied { .. }
        ));
        let failure = ssh2::Error::new(ErrorCode::SFTP(4), "failure");
        match sftp_err(failure, "remove_dir", &p) {
            BridgeError::OperationFailed { op, path, .. } => {
                assert_eq!(op, "remove_dir");
                assert_eq!(path, "/srv/x");
            }
            other => panic!("Expected OperationFailed, got {:?}", other),
        }
    }

    #[test]
    fn session_errors_are_fatal() {
        let p = path("/srv/x");
        let timeout = ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT), "timed out");
        let err = sftp_err(timeout, "read", &p);
        assert!(matches!(err, BridgeError::Timeout { op: "read" }));
        assert!(err.is_fatal());

        let dropped = ssh2::Error::new(ErrorCode::Session(-13), "socket disconnect");
        assert!(channel_err(dropped, "exec").is_fatal());
    }

    #[test]
    fn io_timeout_maps_to_timeout() {
        let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(matches!(
            io_err(e, "write", &path("/a")),
            BridgeError::Timeout { op: "write" }
        ));
    }

    #[test]
    fn timeout_millis_conversion() {
        assert_eq!(timeout_millis(None), 0);
        assert_eq!(timeout_millis(Some(Duration::from_secs(2))), 2000);
        assert_eq!(timeout_millis(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_secs(u64::MAX / 4))), u32::MAX);
    }

    #[test]
    fn unresolvable_host_is_connection_error() {
        let params = ConnectParams {
            host: "nonexistent-sshedit-host-12345.invalid".into(),
            port: 22,
            username: "dev".into(),
            secret: crate::session::Secret::new("pw"),
        };
        let result = SshTransport::connect(
            &params,
            Duration::from_secs(2),
            HostKeyPolicy::Strict,
            None,
        );
        assert!(matches!(result, Err(BridgeError::Connection { .. })));
    }
}
