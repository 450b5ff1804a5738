//! Async front for the bridge.
//!
//! Remote calls are blocking network I/O. `BridgeService` runs each one on
//! tokio's blocking pool so the task accepting requests is never stalled.

use std::sync::Arc;

use crate::bridge::{Bridge, CallOptions, EntryType, FileContent};
use crate::error::BridgeError;
use crate::session::{ConnectRequest, SessionInfo};
use crate::tree::FileNode;

#[derive(Clone)]
pub struct BridgeService {
    bridge: Arc<Bridge>,
}

impl BridgeService {
    pub fn new(bridge: Bridge) -> Self {
        BridgeService {
            bridge: Arc::new(bridge),
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(&Bridge) -> Result<T, BridgeError> + Send + 'static,
    {
        let bridge = Arc::clone(&self.bridge);
        tokio::task::spawn_blocking(move || f(&bridge))
            .await
            .map_err(|e| BridgeError::Transport {
                op,
                reason: format!("worker task failed: {}", e),
            })?
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<(), BridgeError> {
        self.run("connect", move |b| b.connect(request)).await
    }

    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        self.run("disconnect", |b| {
            b.disconnect();
            Ok(())
        })
        .await
    }

    pub fn status(&self) -> SessionInfo {
        self.bridge.status()
    }

    pub async fn get_tree(&self, opts: CallOptions) -> Result<Vec<FileNode>, BridgeError> {
        self.run("get_tree", move |b| b.get_tree(opts)).await
    }

    pub async fn read_file(&self, path: String, opts: CallOptions) -> Result<FileContent, BridgeError> {
        self.run("read_file", move |b| b.read_file(&path, opts)).await
    }

    pub async fn write_file(
        &self,
        path: String,
        content: Vec<u8>,
        opts: CallOptions,
    ) -> Result<(), BridgeError> {
        self.run("write_file", move |b| b.write_file(&path, &content, opts))
            .await
    }

    pub async fn create_entry(
        &self,
        kind: EntryType,
        path: String,
        opts: CallOptions,
    ) -> Result<(), BridgeError> {
        self.run("create_entry", move |b| b.create_entry(kind, &path, opts))
            .await
    }

    pub async fn delete_entry(&self, path: String, opts: CallOptions) -> Result<(), BridgeError> {
        self.run("delete_entry", move |b| b.delete_entry(&path, opts))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::ErrorKind;
    use crate::session::Secret;
    use crate::transport::memory::{MemoryConnector, MemoryRemote};

    fn service(remote: &Arc<MemoryRemote>) -> BridgeService {
        BridgeService::new(Bridge::new(
            Box::new(MemoryConnector::new(Arc::clone(remote))),
            Settings::default(),
        ))
    }

    fn request() -> ConnectRequest {
        ConnectRequest {
            host: "box".into(),
            port: 22,
            username: "dev".into(),
            secret: Secret::new("pw"),
            root_path: "/srv".into(),
            escalate: false,
        }
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_session() {
        let remote = MemoryRemote::new("dev", "pw");
        for i in 0..8 {
            remote.add_file(&format!("/srv/f{}", i), format!("{}", i).as_bytes());
        }
        let svc = service(&remote);
        svc.connect(request()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move {
                svc.read_file(format!("/srv/f{}", i), CallOptions::default())
                    .await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let file = handle.await.unwrap().unwrap();
            assert_eq!(file.content, format!("{}", i).into_bytes());
        }
        assert_eq!(remote.live_connections(), 1);
    }

    #[tokio::test]
    async fn disconnect_then_calls_fail() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_dir("/srv");
        let svc = service(&remote);
        svc.connect(request()).await.unwrap();
        svc.disconnect().await.unwrap();
        let opts = CallOptions::default();
        let kinds = [
            svc.get_tree(opts).await.map(|_| ()),
            svc.read_file("/srv/a".into(), opts).await.map(|_| ()),
            svc.write_file("/srv/a".into(), b"x".to_vec(), opts).await,
            svc.create_entry(EntryType::File, "/srv/b".into(), opts).await,
            svc.create_entry(EntryType::Directory, "/srv/c".into(), opts).await,
            svc.delete_entry("/srv".into(), opts).await,
        ]
        .map(|result| result.unwrap_err().kind());
        assert!(kinds.iter().all(|k| *k == ErrorKind::NotConnected), "{:?}", kinds);
        assert!(!remote.exists("/srv/a"));
        assert!(remote.is_dir("/srv"));
    }
}
