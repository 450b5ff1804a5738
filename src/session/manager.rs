//! The Session Manager: sole owner of the active transport.
//!
//! The active session lives behind an `RwLock`. File and tree operations hold
//! a read guard (`FsGuard`) for their whole duration; connect, disconnect and
//! invalidation take the write lock, so a transport is never closed while an
//! operation is using it. Connect and disconnect are additionally serialized
//! with each other by `lifecycle`, which is held while the new transport is
//! being established so readers are not blocked by a slow handshake.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use crate::backend::{create_backend, RemoteFs};
use crate::config::EscalationConfig;
use crate::error::BridgeError;
use crate::path::RemotePath;
use crate::session::{ConnectRequest, Secret, Session, SessionInfo, SessionState};
use crate::transport::{ConnectParams, Connector, Transport};

/// A connected session together with the resources it owns.
pub struct ActiveSession {
    session: Session,
    transport: Arc<dyn Transport>,
    fs: Box<dyn RemoteFs>,
    // Credential state; zeroed when the session is dropped.
    _secret: Secret,
}

impl ActiveSession {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The façade for this session's backend.
    pub fn fs(&self) -> &dyn RemoteFs {
        self.fs.as_ref()
    }

    fn close(&self) {
        if let Err(e) = self.transport.close() {
            tracing::warn!(host = %self.session.host, "error while closing transport: {}", e);
        }
    }
}

/// Read access to the active session. Lifecycle changes wait until every
/// outstanding guard is dropped.
pub struct FsGuard<'a> {
    guard: RwLockReadGuard<'a, Option<ActiveSession>>,
}

impl Deref for FsGuard<'_> {
    type Target = ActiveSession;

    fn deref(&self) -> &ActiveSession {
        match self.guard.as_ref() {
            Some(active) => active,
            None => unreachable!("FsGuard is only constructed over an active session"),
        }
    }
}

pub struct SessionManager {
    connector: Box<dyn Connector>,
    escalation: EscalationConfig,
    active: RwLock<Option<ActiveSession>>,
    lifecycle: Mutex<()>,
    connecting: AtomicBool,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(connector: Box<dyn Connector>, escalation: EscalationConfig) -> Self {
        SessionManager {
            connector,
            escalation,
            active: RwLock::new(None),
            lifecycle: Mutex::new(()),
            connecting: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a new session, replacing the current one on success.
    ///
    /// The new transport is fully established before the old one is touched,
    /// so a failed attempt leaves any existing session usable. Returns the new
    /// session id.
    pub fn connect(&self, request: ConnectRequest) -> Result<u64, BridgeError> {
        validate_request(&request)?;
        let root_path = RemotePath::parse(&request.root_path)?;

        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.connecting.store(true, Ordering::SeqCst);
        let result = self.open(request, root_path);
        self.connecting.store(false, Ordering::SeqCst);
        let fresh = result?;
        let id = fresh.session.id;

        let mut slot = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            tracing::info!(
                host = %previous.session.host,
                id = previous.session.id,
                "closing previous session"
            );
            previous.close();
        }
        tracing::info!(
            host = %fresh.session.host,
            port = fresh.session.port,
            user = %fresh.session.username,
            backend = fresh.fs.name(),
            id,
            "session connected"
        );
        *slot = Some(fresh);
        Ok(id)
    }

    fn open(&self, request: ConnectRequest, root_path: RemotePath) -> Result<ActiveSession, BridgeError> {
        let params = ConnectParams {
            host: request.host.clone(),
            port: request.port,
            username: request.username.clone(),
            secret: request.secret.clone(),
        };
        tracing::debug!(host = %params.host, port = params.port, "connecting");
        let transport: Arc<dyn Transport> = Arc::from(self.connector.connect(&params)?);
        let fs = create_backend(
            Arc::clone(&transport),
            request.escalate,
            &request.secret,
            &self.escalation,
        );

        // Checking the root through the chosen backend also proves the
        // escalation secret is accepted, unless the policy lets `stat` run
        // without one.
        if let Err(e) = fs.stat(&root_path) {
            let _ = transport.close();
            return Err(match e {
                BridgeError::Auth { .. } => e,
                other => BridgeError::Connection {
                    host: request.host,
                    reason: format!("root path '{}' is not accessible: {}", root_path, other),
                },
            });
        }

        let session = Session {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            host: request.host,
            port: request.port,
            username: request.username,
            root_path,
            escalate: request.escalate,
        };
        Ok(ActiveSession {
            session,
            transport,
            fs,
            _secret: request.secret,
        })
    }

    /// Close the active session, if any. Idempotent.
    pub fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slot = self.active.write().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some(active) => {
                active.close();
                tracing::info!(host = %active.session.host, id = active.session.id, "session disconnected");
            }
            None => tracing::debug!("disconnect with no active session"),
        }
    }

    /// Tear down session `id` after a fatal transport failure.
    ///
    /// Does nothing if a different session has been installed since.
    pub fn invalidate(&self, id: u64) {
        let mut slot = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|a| a.session.id) == Some(id) {
            if let Some(active) = slot.take() {
                tracing::warn!(host = %active.session.host, id, "session invalidated after transport failure");
                active.close();
            }
        }
    }

    /// Read access to the active session, or `NotConnected`.
    pub fn current(&self) -> Result<FsGuard<'_>, BridgeError> {
        let guard = self.active.read().map_err(|_| BridgeError::Transport {
            op: "session",
            reason: "session lock was poisoned; a previous operation panicked".into(),
        })?;
        if guard.is_none() {
            return Err(BridgeError::NotConnected);
        }
        Ok(FsGuard { guard })
    }

    pub fn state(&self) -> SessionState {
        if self.connecting.load(Ordering::SeqCst) {
            return SessionState::Connecting;
        }
        match self.active.read() {
            Ok(slot) if slot.is_some() => SessionState::Connected,
            _ => SessionState::Disconnected,
        }
    }

    /// Snapshot for display. Never includes the secret.
    pub fn info(&self) -> SessionInfo {
        let state = self.state();
        let slot = self.active.read().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(active) => SessionInfo {
                state,
                host: Some(active.session.host.clone()),
                port: Some(active.session.port),
                username: Some(active.session.username.clone()),
                root_path: Some(active.session.root_path.to_string()),
                escalate: active.session.escalate,
            },
            None => SessionInfo {
                state,
                host: None,
                port: None,
                username: None,
                root_path: None,
                escalate: false,
            },
        }
    }
}

fn validate_request(request: &ConnectRequest) -> Result<(), BridgeError> {
    if request.host.trim().is_empty() {
        return Err(BridgeError::InvalidInput("host is required".into()));
    }
    if request.username.trim().is_empty() {
        return Err(BridgeError::InvalidInput("username is required".into()));
    }
    if request.escalate && request.secret.expose().contains(['\n', '\r']) {
        return Err(BridgeError::InvalidInput(
            "escalation password must not contain line breaks".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryConnector, MemoryRemote};
    use std::sync::mpsc;
    use std::time::Duration;

    fn manager(remote: &Arc<MemoryRemote>) -> SessionManager {
        SessionManager::new(
            Box::new(MemoryConnector::new(Arc::clone(remote))),
            EscalationConfig::default(),
        )
    }

    fn request(secret: &str) -> ConnectRequest {
        ConnectRequest {
            host: "box".into(),
            port: 22,
            username: "dev".into(),
            secret: Secret::new(secret),
            root_path: "/srv".into(),
            escalate: false,
        }
    }

    fn remote() -> Arc<MemoryRemote> {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_dir("/srv");
        remote
    }

    #[test]
    fn starts_disconnected() {
        let remote = remote();
        let mgr = manager(&remote);
        assert_eq!(mgr.state(), SessionState::Disconnected);
        assert!(matches!(mgr.current(), Err(BridgeError::NotConnected)));
    }

    #[test]
    fn connect_then_disconnect() {
        let remote = remote();
        let mgr = manager(&remote);
        mgr.connect(request("pw")).unwrap();
        assert_eq!(mgr.state(), SessionState::Connected);
        assert_eq!(mgr.current().unwrap().session().root_path.as_str(), "/srv");
        mgr.disconnect();
        assert_eq!(mgr.state(), SessionState::Disconnected);
        assert_eq!(remote.live_connections(), 0);
        mgr.disconnect();
    }

    #[test]
    fn reconnect_leaves_one_live_connection() {
        let remote = remote();
        let mgr = manager(&remote);
        let first = mgr.connect(request("pw")).unwrap();
        let second = mgr.connect(request("pw")).unwrap();
        assert_ne!(first, second);
        assert_eq!(remote.live_connections(), 1);
        assert_eq!(remote.total_connections(), 2);
    }

    #[test]
    fn failed_connect_keeps_previous_session() {
        let remote = remote();
        let mgr = manager(&remote);
        let id = mgr.connect(request("pw")).unwrap();
        assert!(matches!(
            mgr.connect(request("bad")),
            Err(BridgeError::Auth { .. })
        ));
        assert_eq!(mgr.current().unwrap().session().id, id);

        remote.set_reachable(false);
        assert!(matches!(
            mgr.connect(request("pw")),
            Err(BridgeError::Connection { .. })
        ));
        assert_eq!(mgr.current().unwrap().session().id, id);
        assert_eq!(remote.live_connections(), 1);
    }

    #[test]
    fn missing_root_fails_connect_without_leaking() {
        let remote = remote();
        let mgr = manager(&remote);
        let mut req = request("pw");
        req.root_path = "/does/not/exist".into();
        assert!(matches!(
            mgr.connect(req),
            Err(BridgeError::Connection { .. })
        ));
        assert_eq!(remote.live_connections(), 0);
    }

    #[test]
    fn escalated_session_may_use_a_denied_root() {
        let remote = remote();
        remote.add_dir("/root/app");
        remote.deny("/root");
        let mgr = manager(&remote);
        let mut req = request("pw");
        req.root_path = "/root/app".into();
        req.escalate = true;
        mgr.connect(req).unwrap();
        assert_eq!(mgr.current().unwrap().fs().name(), "escalated");
        assert_eq!(remote.live_connections(), 1);
    }

    #[test]
    fn escalated_connect_checks_the_secret() {
        let remote = remote();
        let mgr = manager(&remote);
        let mut req = request("pw");
        req.escalate = true;
        remote.forbid_escalation();
        assert!(matches!(
            mgr.connect(req),
            Err(BridgeError::Connection { .. })
        ));
        assert_eq!(remote.live_connections(), 0);
    }

    #[test]
    fn invalidate_ignores_stale_ids() {
        let remote = remote();
        let mgr = manager(&remote);
        let old = mgr.connect(request("pw")).unwrap();
        let new = mgr.connect(request("pw")).unwrap();
        mgr.invalidate(old);
        assert_eq!(mgr.current().unwrap().session().id, new);
        mgr.invalidate(new);
        assert!(matches!(mgr.current(), Err(BridgeError::NotConnected)));
        assert_eq!(remote.live_connections(), 0);
    }

    #[test]
    fn rejects_incomplete_requests() {
        let remote = remote();
        let mgr = manager(&remote);
        let mut req = request("pw");
        req.host = " ".into();
        assert!(matches!(mgr.connect(req), Err(BridgeError::InvalidInput(_))));
        let mut req = request("pw\nrm");
        req.escalate = true;
        assert!(matches!(mgr.connect(req), Err(BridgeError::InvalidInput(_))));
        assert_eq!(remote.total_connections(), 0);
    }

    #[test]
    fn info_never_carries_secret() {
        let remote = remote();
        let mgr = manager(&remote);
        mgr.connect(request("pw")).unwrap();
        let info = mgr.info();
        assert_eq!(info.state, SessionState::Connected);
        assert_eq!(info.host.as_deref(), Some("box"));
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("pw\""));
    }

    #[test]
    fn disconnect_waits_for_in_flight_operations() {
        let remote = remote();
        let mgr = Arc::new(manager(&remote));
        mgr.connect(request("pw")).unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let worker = {
            let mgr = Arc::clone(&mgr);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                let guard = mgr.current().unwrap();
                tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                guard.fs().stat(&RemotePath::parse("/srv").unwrap()).unwrap();
                finished.store(true, Ordering::SeqCst);
            })
        };
        rx.recv().unwrap();
        mgr.disconnect();
        assert!(finished.load(Ordering::SeqCst));
        worker.join().unwrap();
    }
}
