//! Direct backend: every operation is a plain SFTP call as the login user.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::RemoteFs;
use crate::error::BridgeError;
use crate::path::RemotePath;
use crate::transport::{EntryKind, RemoteEntry, RemoteStat, Transport};

pub struct DirectBackend {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
}

impl DirectBackend {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        DirectBackend {
            transport,
            timeout: None,
        }
    }

    /// Depth-first removal. Symbolic links are unlinked, never followed.
    fn remove_tree(&self, path: &RemotePath, stat: &RemoteStat) -> Result<(), BridgeError> {
        if stat.kind != EntryKind::Dir {
            return self.transport.remove_file(path, self.timeout);
        }
        for entry in self.transport.read_dir(path, self.timeout)? {
            let child = path.join(&entry.name);
            self.remove_tree(&child, &entry.stat)?;
        }
        self.transport.remove_dir(path, self.timeout)
    }
}

/// Every prefix of `path`, shallowest first, ending with `path` itself.
fn prefixes(path: &RemotePath) -> Vec<RemotePath> {
    let mut out: Vec<RemotePath> = Vec::new();
    for part in path.as_str().split('/') {
        if part.is_empty() {
            continue;
        }
        let next = match out.last() {
            Some(prev) => prev.join(part),
            None if path.is_absolute() => RemotePath::root().join(part),
            None => RemotePath::from_component(part),
        };
        out.push(next);
    }
    out
}

impl RemoteFs for DirectBackend {
    fn stat(&self, path: &RemotePath) -> Result<RemoteStat, BridgeError> {
        self.transport.stat(path, self.timeout)
    }

    fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, BridgeError> {
        self.transport.read_dir(path, self.timeout)
    }

    fn read_file(&self, path: &RemotePath) -> Result<Vec<u8>, BridgeError> {
        self.transport.read(path, self.timeout)
    }

    fn write_file(&self, path: &RemotePath, content: &[u8]) -> Result<(), BridgeError> {
        self.transport.write(path, content, self.timeout)
    }

    fn mkdir(&self, path: &RemotePath) -> Result<(), BridgeError> {
        // SFTP mkdir only creates one level at a time.
        for current in prefixes(path) {
            match self.transport.mkdir(&current, self.timeout) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // Servers report "already exists" as a generic failure;
                    // an existing directory is fine.
                    match self.transport.stat(&current, self.timeout) {
                        Ok(stat) if stat.is_dir() => continue,
                        Err(stat_err) if stat_err.is_fatal() => return Err(stat_err),
                        _ => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }

    fn remove(&self, path: &RemotePath) -> Result<(), BridgeError> {
        let stat = self.transport.lstat(path, self.timeout)?;
        self.remove_tree(path, &stat)
    }

    fn with_timeout(&self, timeout: Option<Duration>) -> Box<dyn RemoteFs> {
        Box::new(DirectBackend {
            transport: Arc::clone(&self.transport),
            timeout,
        })
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
