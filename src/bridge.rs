//! The remote filesystem bridge: the operations exposed to callers.
//!
//! Every file operation borrows the active session for its whole duration,
//! works through a backend handle bounded by the call's own timeout, and
//! hands fatal transport failures back to the session manager so the broken
//! session is dropped.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize, Serializer};

use crate::config::{paths, Settings};
use crate::error::BridgeError;
use crate::backend::RemoteFs;
use crate::path::RemotePath;
use crate::session::manager::ActiveSession;
use crate::session::{ConnectRequest, SessionInfo, SessionManager};
use crate::transport::ssh::SshConnector;
use crate::transport::Connector;
use crate::tree::{FileNode, TreeBuilder};

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Upper bound for the call. Falls back to the configured default.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        CallOptions {
            timeout: Some(timeout),
        }
    }
}

/// Kind of entry for `create_entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
}

/// Result payload of `read_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub content: Vec<u8>,
    pub size: u64,
}

impl Serialize for FileContent {
    /// UTF-8 content is emitted as text; anything else as base64 with an
    /// `encoding` marker.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("FileContent", 3)?;
        match std::str::from_utf8(&self.content) {
            Ok(text) => {
                state.serialize_field("content", text)?;
                state.serialize_field("encoding", "utf-8")?;
            }
            Err(_) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&self.content);
                state.serialize_field("content", &encoded)?;
                state.serialize_field("encoding", "base64")?;
            }
        }
        state.serialize_field("size", &self.size)?;
        state.end()
    }
}

pub struct Bridge {
    manager: SessionManager,
    settings: Settings,
}

impl Bridge {
    pub fn new(connector: Box<dyn Connector>, settings: Settings) -> Self {
        Bridge {
            manager: SessionManager::new(connector, settings.escalation.clone()),
            settings,
        }
    }

    /// A bridge that connects over SSH using `settings`.
    pub fn over_ssh(settings: Settings) -> Self {
        let connector = SshConnector::new(
            settings.connect_timeout(),
            settings.connection.host_keys,
            paths::known_hosts_path(),
        );
        Bridge::new(Box::new(connector), settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn connect(&self, request: ConnectRequest) -> Result<(), BridgeError> {
        self.manager.connect(request).map(|_| ())
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn status(&self) -> SessionInfo {
        self.manager.info()
    }

    /// Tree of the session root.
    pub fn get_tree(&self, opts: CallOptions) -> Result<Vec<FileNode>, BridgeError> {
        self.tree_at(None, opts)
    }

    /// Tree of `path`, or of the session root when `None`.
    pub fn tree_at(&self, path: Option<&str>, opts: CallOptions) -> Result<Vec<FileNode>, BridgeError> {
        let timeout = self.timeout(opts);
        let deadline = timeout.map(|t| Instant::now() + t);
        self.with_session("get_tree", opts, |active, fs| {
            let root = match path {
                Some(p) => RemotePath::parse(p)?,
                None => active.session().root_path.clone(),
            };
            tracing::debug!(root = %root, backend = fs.name(), "building tree");
            let tree = TreeBuilder::new(fs)
                .max_depth(self.settings.tree.max_depth)
                .exclude(&self.settings.tree.exclude)?
                .deadline(deadline)
                .build(&root)?;
            tracing::debug!(
                root = %root,
                nodes = tree.iter().map(FileNode::count).sum::<usize>(),
                "tree built"
            );
            Ok(tree)
        })
    }

    pub fn read_file(&self, path: &str, opts: CallOptions) -> Result<FileContent, BridgeError> {
        self.with_session("read_file", opts, |_, fs| {
            let path = RemotePath::parse(path)?;
            tracing::debug!(path = %path, backend = fs.name(), "read");
            let content = fs.read_file(&path)?;
            let size = content.len() as u64;
            Ok(FileContent { content, size })
        })
    }

    pub fn write_file(&self, path: &str, content: &[u8], opts: CallOptions) -> Result<(), BridgeError> {
        self.with_session("write_file", opts, |_, fs| {
            let path = RemotePath::parse(path)?;
            tracing::debug!(path = %path, bytes = content.len(), backend = fs.name(), "write");
            fs.write_file(&path, content)
        })
    }

    /// Create a file or directory. Relative paths are taken from the session root.
    ///
    /// A file is left empty, truncating one that already exists; an existing
    /// directory is kept as is.
    pub fn create_entry(&self, kind: EntryType, path: &str, opts: CallOptions) -> Result<(), BridgeError> {
        self.with_session("create_entry", opts, |active, fs| {
            let path = RemotePath::parse(path)?.resolve_against(&active.session().root_path);
            tracing::debug!(path = %path, ?kind, backend = fs.name(), "create");
            match kind {
                EntryType::File => fs.write_file(&path, b""),
                EntryType::Directory => fs.mkdir(&path),
            }
        })
    }

    /// Remove a file or a whole directory tree.
    pub fn delete_entry(&self, path: &str, opts: CallOptions) -> Result<(), BridgeError> {
        self.with_session("delete_entry", opts, |_, fs| {
            let path = RemotePath::parse(path)?;
            tracing::debug!(path = %path, backend = fs.name(), "delete");
            fs.remove(&path)
        })
    }

    fn timeout(&self, opts: CallOptions) -> Option<Duration> {
        opts.timeout.or_else(|| self.settings.default_timeout())
    }

    /// Run `f` against the active session and a backend handle bounded by
    /// this call's timeout.
    ///
    /// The session stays borrowed until `f` returns; a fatal error then
    /// invalidates that session (and only that one).
    fn with_session<T>(
        &self,
        op: &'static str,
        opts: CallOptions,
        f: impl FnOnce(&ActiveSession, &dyn RemoteFs) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let timeout = self.timeout(opts);
        let (result, id) = {
            let active = self.manager.current()?;
            let fs = active.fs().with_timeout(timeout);
            let result = f(&*active, fs.as_ref());
            (result, active.session().id)
        };
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::warn!(op, "fatal error, dropping session: {}", e);
                self.manager.invalidate(id);
            } else {
                tracing::debug!(op, kind = %e.kind(), "operation failed: {}", e);
            }
        }
        result
    }
}
