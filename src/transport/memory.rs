//! In-process remote host.
//!
//! `MemoryRemote` keeps a filesystem in memory and emulates the small set of
//! remote programs the escalated backend runs (`sudo` in front of `cat`, `dd`,
//! `mkdir`, `rm`, `stat` and `find`). Command lines are split with
//! POSIX quoting rules, so a mis-quoted argument shows up as a wrong argv or a
//! rejected line instead of silently working.
//!
//! Used by the test suites and for exercising the bridge without a server.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::backend::command::split_words;
use crate::error::BridgeError;
use crate::path::RemotePath;
use crate::session::Secret;
use crate::transport::{
    ConnectParams, Connector, EntryKind, ExecOutput, RemoteEntry, RemoteStat, Transport,
};

const MAX_LINK_HOPS: usize = 8;

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
    Symlink(String),
}

/// A fault injected into the next transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The channel dies mid-operation.
    Transport,
    /// The operation exceeds its deadline.
    Timeout,
}

/// One command received through `exec`.
#[derive(Debug, Clone)]
pub struct ExecRecord {
    pub command_line: String,
    /// Words after shell splitting; `None` if the line was rejected.
    pub argv: Option<Vec<String>>,
}

/// One transport call and the timeout it was made with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: &'static str,
    /// The path, or the command line for `exec`.
    pub target: String,
    pub timeout: Option<Duration>,
}

struct MemoryState {
    nodes: BTreeMap<String, Node>,
    denied: BTreeSet<String>,
    exec_log: Vec<ExecRecord>,
    fault: Option<Fault>,
    calls: Vec<CallRecord>,
    nopasswd: BTreeSet<String>,
    reachable: bool,
    escalation_allowed: bool,
}

/// Shared state of the emulated host. Cheap to clone behind an `Arc`.
pub struct MemoryRemote {
    username: String,
    password: Secret,
    escalation_program: String,
    state: Mutex<MemoryState>,
    live: AtomicUsize,
    opened: AtomicUsize,
}

impl MemoryRemote {
    /// Create a host with a single account and an empty `/`.
    pub fn new(username: &str, password: &str) -> Arc<Self> {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Arc::new(MemoryRemote {
            username: username.to_string(),
            password: Secret::new(password),
            escalation_program: "sudo".to_string(),
            state: Mutex::new(MemoryState {
                nodes,
                denied: BTreeSet::new(),
                exec_log: Vec::new(),
                fault: None,
                calls: Vec::new(),
                nopasswd: BTreeSet::new(),
                reachable: true,
                escalation_allowed: true,
            }),
            live: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock only happens inside a failing test.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a directory and its parents.
    pub fn add_dir(&self, path: &str) {
        let mut state = self.lock();
        let path = absolute(path);
        for ancestor in ancestors(&path) {
            state.nodes.entry(ancestor).or_insert(Node::Dir);
        }
        state.nodes.insert(path, Node::Dir);
    }

    /// Create a file (and its parent directories) with `content`.
    pub fn add_file(&self, path: &str, content: &[u8]) {
        let mut state = self.lock();
        let path = absolute(path);
        for ancestor in ancestors(&path) {
            state.nodes.entry(ancestor).or_insert(Node::Dir);
        }
        state.nodes.insert(path, Node::File(content.to_vec()));
    }

    /// Create a symbolic link at `path` pointing to `target`.
    pub fn add_symlink(&self, path: &str, target: &str) {
        let mut state = self.lock();
        let path = absolute(path);
        for ancestor in ancestors(&path) {
            state.nodes.entry(ancestor).or_insert(Node::Dir);
        }
        state.nodes.insert(path, Node::Symlink(target.to_string()));
    }

    /// Deny SFTP access to `path` and everything below it. Escalated
    /// commands are unaffected.
    pub fn deny(&self, path: &str) {
        self.lock().denied.insert(absolute(path));
    }

    /// Make the account unable to escalate (not in sudoers).
    pub fn forbid_escalation(&self) {
        self.lock().escalation_allowed = false;
    }

    /// Let `tools` run through the escalation program without a password,
    /// like a sudoers `NOPASSWD` rule.
    pub fn allow_nopasswd(&self, tools: &[&str]) {
        let mut state = self.lock();
        state.nopasswd.extend(tools.iter().map(|t| t.to_string()));
    }

    /// Refuse new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Make the next transport call fail with `fault`.
    pub fn fail_next(&self, fault: Fault) {
        self.lock().fault = Some(fault);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(&absolute(path)) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(&absolute(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.lock().nodes.get(&absolute(path)), Some(Node::Dir))
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Connections ever opened.
    pub fn total_connections(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn exec_log(&self) -> Vec<ExecRecord> {
        self.lock().exec_log.clone()
    }

    /// Every transport call so far, oldest first.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    /// Open a transport directly, bypassing authentication.
    pub fn open(self: &Arc<Self>) -> MemoryTransport {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        MemoryTransport {
            remote: Arc::clone(self),
            closed: AtomicBool::new(false),
        }
    }
}

/// Connector handing out transports to a shared `MemoryRemote`.
pub struct MemoryConnector {
    remote: Arc<MemoryRemote>,
}

impl MemoryConnector {
    pub fn new(remote: Arc<MemoryRemote>) -> Self {
        MemoryConnector { remote }
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Transport>, BridgeError> {
        if !self.remote.lock().reachable {
            return Err(BridgeError::Connection {
                host: params.host.clone(),
                reason: "TCP connection failed: connection refused".into(),
            });
        }
        if params.username != self.remote.username
            || !self.remote.password.matches(params.secret.expose().as_bytes())
        {
            return Err(BridgeError::Auth {
                reason: format!("password rejected for user '{}'", params.username),
            });
        }
        Ok(Box::new(self.remote.open()))
    }
}

/// One open connection to a `MemoryRemote`.
pub struct MemoryTransport {
    remote: Arc<MemoryRemote>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Lock the shared state for one call, recording it and applying the
    /// closed check and any injected fault.
    fn begin(
        &self,
        op: &'static str,
        target: &str,
        timeout: Option<Duration>,
    ) -> Result<MutexGuard<'_, MemoryState>, BridgeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport {
                op,
                reason: "connection closed".into(),
            });
        }
        let mut state = self.remote.lock();
        state.calls.push(CallRecord {
            op,
            target: target.to_string(),
            timeout,
        });
        match state.fault.take() {
            Some(Fault::Transport) => Err(BridgeError::Transport {
                op,
                reason: "channel closed unexpectedly".into(),
            }),
            Some(Fault::Timeout) => Err(BridgeError::Timeout { op }),
            None => Ok(state),
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl Transport for MemoryTransport {
    fn stat(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<RemoteStat, BridgeError> {
        let state = self.begin("stat", path.as_str(), timeout)?;
        let key = absolute(path.as_str());
        check_access(&state, &key)?;
        let resolved = state.resolve(&key).ok_or_else(|| not_found(path))?;
        Ok(state.stat_of(&resolved))
    }

    fn lstat(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<RemoteStat, BridgeError> {
        let state = self.begin("lstat", path.as_str(), timeout)?;
        let key = absolute(path.as_str());
        check_access(&state, &key)?;
        if !state.nodes.contains_key(&key) {
            return Err(not_found(path));
        }
        Ok(state.stat_of(&key))
    }

    fn read_dir(
        &self,
        path: &RemotePath,
        timeout: Option<Duration>,
    ) -> Result<Vec<RemoteEntry>, BridgeError> {
        let state = self.begin("read_dir", path.as_str(), timeout)?;
        let key = absolute(path.as_str());
        check_access(&state, &key)?;
        let dir = state.resolve(&key).ok_or_else(|| not_found(path))?;
        if !matches!(state.nodes.get(&dir), Some(Node::Dir)) {
            return Err(BridgeError::OperationFailed {
                op: "read_dir",
                path: path.to_string(),
                reason: "not a directory".into(),
            });
        }
        check_access(&state, &dir)?;
        Ok(state
            .children(&dir)
            .into_iter()
            .map(|child| RemoteEntry {
                name: base_name(&child).to_string(),
                stat: state.stat_of(&child),
            })
            .collect())
    }

    fn read(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<Vec<u8>, BridgeError> {
        let state = self.begin("read", path.as_str(), timeout)?;
        let key = absolute(path.as_str());
        check_access(&state, &key)?;
        let resolved = state.resolve(&key).ok_or_else(|| not_found(path))?;
        match state.nodes.get(&resolved) {
            Some(Node::File(data)) => Ok(data.clone()),
            _ => Err(BridgeError::OperationFailed {
                op: "read",
                path: path.to_string(),
                reason: "is a directory".into(),
            }),
        }
    }

    fn write(
        &self,
        path: &RemotePath,
        content: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), BridgeError> {
        let mut state = self.begin("write", path.as_str(), timeout)?;
        let key = absolute(path.as_str());
        check_access(&state, &key)?;
        state
            .put_file(&key, content)
            .map_err(|reason| sftp_failure("write", path, reason))
    }

    fn mkdir(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<(), BridgeError> {
        let mut state = self.begin("mkdir", path.as_str(), timeout)?;
        let key = absolute(path.as_str());
        check_access(&state, &key)?;
        if state.nodes.contains_key(&key) {
            return Err(BridgeError::OperationFailed {
                op: "mkdir",
                path: path.to_string(),
                reason: "already exists".into(),
            });
        }
        if !state.parent_is_dir(&key) {
            return Err(not_found(path));
        }
        state.nodes.insert(key, Node::Dir);
        Ok(())
    }

    fn remove_file(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<(), BridgeError> {
        let mut state = self.begin("remove_file", path.as_str(), timeout)?;
        let key = absolute(path.as_str());
        check_access(&state, &key)?;
        match state.nodes.get(&key) {
            None => Err(not_found(path)),
            Some(Node::Dir) => Err(BridgeError::OperationFailed {
                op: "remove_file",
                path: path.to_string(),
                reason: "is a directory".into(),
            }),
            Some(_) => {
                state.nodes.remove(&key);
                Ok(())
            }
        }
    }

    fn remove_dir(&self, path: &RemotePath, timeout: Option<Duration>) -> Result<(), BridgeError> {
        let mut state = self.begin("remove_dir", path.as_str(), timeout)?;
        let key = absolute(path.as_str());
        check_access(&state, &key)?;
        match state.nodes.get(&key) {
            None => Err(not_found(path)),
            Some(Node::Dir) => {
                if !state.children(&key).is_empty() {
                    return Err(BridgeError::OperationFailed {
                        op: "remove_dir",
                        path: path.to_string(),
                        reason: "directory not empty".into(),
                    });
                }
                state.nodes.remove(&key);
                Ok(())
            }
            Some(_) => Err(BridgeError::OperationFailed {
                op: "remove_dir",
                path: path.to_string(),
                reason: "not a directory".into(),
            }),
        }
    }

    fn exec(
        &self,
        command: &str,
        stdin: &[u8],
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, BridgeError> {
        let mut state = self.begin("exec", command, timeout)?;
        let argv = split_words(command).ok();
        state.exec_log.push(ExecRecord {
            command_line: command.to_string(),
            argv: argv.clone(),
        });
        let Some(argv) = argv else {
            return Ok(failed(2, "sh: syntax error: unsupported shell construct\n"));
        };
        Ok(self.run_elevated(&mut state, &argv, stdin))
    }

    fn close(&self) -> Result<(), BridgeError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.remote.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl MemoryTransport {
    fn run_elevated(&self, state: &mut MemoryState, argv: &[String], stdin: &[u8]) -> ExecOutput {
        let program = &self.remote.escalation_program;
        if argv.first() != Some(program) {
            let name = argv.first().map(String::as_str).unwrap_or("");
            return failed(127, &format!("sh: {}: command not found\n", name));
        }
        let flags: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        let (prompting, tool_args) = match flags.as_slice() {
            ["-n", "-k", "--", ..] => (false, &argv[4..]),
            ["-S", "-k", "-p", _, "--", ..] => (true, &argv[6..]),
            _ => return failed(1, &format!("{}: unsupported invocation\n", program)),
        };
        let passwordless = tool_args
            .first()
            .map(|tool| state.nopasswd.contains(tool))
            .unwrap_or(false);

        if passwordless && state.escalation_allowed {
            // No prompt: every stdin byte, including a secret line, is the tool's.
            return run_tool(state, tool_args, stdin);
        }
        if !prompting {
            return failed(1, &format!("{}: a password is required\n", program));
        }

        let (password, payload) = match stdin.iter().position(|b| *b == b'\n') {
            Some(idx) => (&stdin[..idx], &stdin[idx + 1..]),
            None => (stdin, &[][..]),
        };
        if password.is_empty() {
            return failed(1, &format!("{}: no password was provided\n", program));
        }
        if !self.remote.password.matches(password) {
            return failed(
                1,
                &format!("Sorry, try again.\n{}: 1 incorrect password attempt\n", program),
            );
        }
        if !state.escalation_allowed {
            return failed(
                1,
                &format!("{} is not in the sudoers file.\n", self.remote.username),
            );
        }

        run_tool(state, tool_args, payload)
    }
}

/// Emulate one privileged tool invocation.
fn run_tool(state: &mut MemoryState, args: &[String], payload: &[u8]) -> ExecOutput {
    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    match words.as_slice() {
        ["cat", "--", path] => {
            let key = absolute(path);
            match state.resolve(&key).and_then(|r| state.nodes.get(&r).cloned()) {
                Some(Node::File(data)) => ExecOutput {
                    stdout: data,
                    stderr: Vec::new(),
                    exit_status: Some(0),
                },
                Some(_) => failed(1, &format!("cat: {}: Is a directory\n", path)),
                None => failed(1, &format!("cat: {}: No such file or directory\n", path)),
            }
        }
        ["dd", of, _bs, "status=none"] if of.starts_with("of=") => {
            let path = &of[3..];
            let key = absolute(path);
            match state.put_file(&key, payload) {
                Ok(()) => ok_output(),
                Err(reason) => failed(1, &format!("dd: failed to open '{}': {}\n", path, reason)),
            }
        }
        ["mkdir", "-p", "--", path] => {
            let key = absolute(path);
            let mut chain = ancestors(&key);
            chain.push(key);
            for dir in chain {
                match state.nodes.get(&dir) {
                    Some(Node::Dir) => {}
                    Some(_) => {
                        return failed(
                            1,
                            &format!("mkdir: cannot create directory '{}': File exists\n", path),
                        )
                    }
                    None => {
                        state.nodes.insert(dir, Node::Dir);
                    }
                }
            }
            ok_output()
        }
        ["rm", "-r", "-f", "--", path] => {
            let key = absolute(path);
            if key == "/" {
                return failed(1, "rm: it is dangerous to operate recursively on '/'\n");
            }
            let prefix = format!("{}/", key);
            state
                .nodes
                .retain(|k, _| k != &key && !k.starts_with(&prefix));
            ok_output()
        }
        ["stat", "-L", "-c", _format, "--", path] => {
            let key = absolute(path);
            match state.resolve(&key) {
                Some(resolved) => stat_output(state, &resolved),
                None => stat_missing(path),
            }
        }
        ["stat", "-c", _format, "--", path] => {
            let key = absolute(path);
            let parent = state.resolve(&parent_of(&key));
            match parent.map(|dir| join_key(&dir, base_name(&key))) {
                Some(entry) if state.nodes.contains_key(&entry) => stat_output(state, &entry),
                _ => stat_missing(path),
            }
        }
        ["find", "-H", path, "-mindepth", "1", "-maxdepth", "1", "-printf", _format] => {
            let key = absolute(path);
            let Some(dir) = state.resolve(&key) else {
                return failed(1, &format!("find: '{}': No such file or directory\n", path));
            };
            let mut stdout = Vec::new();
            if matches!(state.nodes.get(&dir), Some(Node::Dir)) {
                for child in state.children(&dir) {
                    let (kind, size) = match state.nodes.get(&child) {
                        Some(Node::Dir) => ('d', 4096),
                        Some(Node::File(data)) => ('f', data.len()),
                        _ => ('l', 0),
                    };
                    stdout.extend_from_slice(
                        format!("{}/{}/{}", kind, size, base_name(&child)).as_bytes(),
                    );
                    stdout.push(0);
                }
            }
            ExecOutput {
                stdout,
                stderr: Vec::new(),
                exit_status: Some(0),
            }
        }
        _ => failed(1, &format!("unsupported command: {:?}\n", words)),
    }
}

/// One `%F/%s/%Y/%a` line for the node at `key`.
fn stat_output(state: &MemoryState, key: &str) -> ExecOutput {
    let line = match state.nodes.get(key) {
        Some(Node::Dir) => "directory/4096/0/755\n".to_string(),
        Some(Node::File(data)) if data.is_empty() => "regular empty file/0/0/644\n".to_string(),
        Some(Node::File(data)) => format!("regular file/{}/0/644\n", data.len()),
        _ => "symbolic link/0/0/777\n".to_string(),
    };
    ExecOutput {
        stdout: line.into_bytes(),
        stderr: Vec::new(),
        exit_status: Some(0),
    }
}

fn stat_missing(path: &str) -> ExecOutput {
    failed(
        1,
        &format!("stat: cannot statx '{}': No such file or directory\n", path),
    )
}

impl MemoryState {
    /// Resolve every symbolic link along `path`, including the last
    /// component. `None` if any component is missing or links loop.
    fn resolve(&self, path: &str) -> Option<String> {
        let mut pending: VecDeque<String> = components(path);
        let mut resolved = "/".to_string();
        let mut hops = 0;
        while let Some(part) = pending.pop_front() {
            let candidate = join_key(&resolved, &part);
            match self.nodes.get(&candidate)? {
                Node::Symlink(target) => {
                    hops += 1;
                    if hops > MAX_LINK_HOPS {
                        return None;
                    }
                    let target = if target.starts_with('/') {
                        absolute(target)
                    } else {
                        absolute(&format!("{}/{}", resolved, target))
                    };
                    for c in components(&target).into_iter().rev() {
                        pending.push_front(c);
                    }
                    resolved = "/".to_string();
                }
                _ => resolved = candidate,
            }
        }
        Some(resolved)
    }

    fn stat_of(&self, path: &str) -> RemoteStat {
        let (kind, size) = match self.nodes.get(path) {
            Some(Node::Dir) => (EntryKind::Dir, 4096),
            Some(Node::File(data)) => (EntryKind::File, data.len() as u64),
            Some(Node::Symlink(_)) => (EntryKind::Symlink, 0),
            None => (EntryKind::Other, 0),
        };
        RemoteStat {
            kind,
            size,
            modified: None,
            permissions: None,
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.nodes
            .keys()
            .filter(|k| k.len() > prefix.len() && k.starts_with(&prefix))
            .filter(|k| !k[prefix.len()..].contains('/'))
            .cloned()
            .collect()
    }

    fn parent_is_dir(&self, path: &str) -> bool {
        let parent = parent_of(path);
        self.resolve(&parent)
            .map(|p| matches!(self.nodes.get(&p), Some(Node::Dir)))
            .unwrap_or(false)
    }

    /// Create or replace a file, following a final symbolic link.
    fn put_file(&mut self, path: &str, content: &[u8]) -> Result<(), &'static str> {
        if !self.parent_is_dir(path) {
            return Err("No such file or directory");
        }
        let target = match self.resolve(path) {
            Some(existing) => existing,
            None => {
                let parent = self.resolve(&parent_of(path)).unwrap_or_else(|| parent_of(path));
                join_key(&parent, base_name(path))
            }
        };
        match self.nodes.get(&target) {
            Some(Node::Dir) => Err("Is a directory"),
            _ => {
                self.nodes.insert(target, Node::File(content.to_vec()));
                Ok(())
            }
        }
    }
}

fn check_access(state: &MemoryState, path: &str) -> Result<(), BridgeError> {
    let denied = state
        .denied
        .iter()
        .any(|d| path == d || path.starts_with(&format!("{}/", d)) || d == "/");
    if denied {
        Err(BridgeError::PermissionDenied {
            path: path.to_string(),
        })
    } else {
        Ok(())
    }
}

fn not_found(path: &RemotePath) -> BridgeError {
    BridgeError::NotFound {
        path: path.to_string(),
    }
}

fn sftp_failure(op: &'static str, path: &RemotePath, reason: &str) -> BridgeError {
    if reason == "No such file or directory" {
        not_found(path)
    } else {
        BridgeError::OperationFailed {
            op,
            path: path.to_string(),
            reason: reason.to_lowercase(),
        }
    }
}

fn ok_output() -> ExecOutput {
    ExecOutput {
        stdout: Vec::new(),
        stderr: Vec::new(),
        exit_status: Some(0),
    }
}

fn failed(status: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
        exit_status: Some(status),
    }
}

/// Normalize to an absolute key; relative paths hang off `/`.
fn absolute(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn components(path: &str) -> VecDeque<String> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_key(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Strict ancestors of `path`, shallowest first, excluding `/`.
fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = parent_of(path);
    while current != "/" {
        out.push(current.clone());
        current = parent_of(&current);
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> RemotePath {
        RemotePath::parse(s).unwrap()
    }

    #[test]
    fn connector_checks_credentials_and_counts_connections() {
        let remote = MemoryRemote::new("dev", "pw");
        let connector = MemoryConnector::new(Arc::clone(&remote));
        let bad = ConnectParams {
            host: "box".into(),
            port: 22,
            username: "dev".into(),
            secret: Secret::new("nope"),
        };
        assert!(matches!(
            connector.connect(&bad),
            Err(BridgeError::Auth { .. })
        ));
        let good = ConnectParams {
            secret: Secret::new("pw"),
            ..bad
        };
        let transport = connector.connect(&good).unwrap();
        assert_eq!(remote.live_connections(), 1);
        transport.close().unwrap();
        transport.close().unwrap();
        assert_eq!(remote.live_connections(), 0);
    }

    #[test]
    fn dropping_a_transport_closes_it() {
        let remote = MemoryRemote::new("dev", "pw");
        {
            let _t = remote.open();
            assert_eq!(remote.live_connections(), 1);
        }
        assert_eq!(remote.live_connections(), 0);
        assert_eq!(remote.total_connections(), 1);
    }

    #[test]
    fn sftp_primitives_distinguish_files_and_dirs() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/srv/a.txt", b"x");
        let t = remote.open();
        assert!(matches!(
            t.remove_dir(&p("/srv/a.txt"), None),
            Err(BridgeError::OperationFailed { .. })
        ));
        assert!(matches!(
            t.remove_file(&p("/srv"), None),
            Err(BridgeError::OperationFailed { .. })
        ));
        assert!(matches!(
            t.remove_dir(&p("/srv"), None),
            Err(BridgeError::OperationFailed { .. })
        ));
        t.remove_file(&p("/srv/a.txt"), None).unwrap();
        t.remove_dir(&p("/srv"), None).unwrap();
        assert!(!remote.exists("/srv"));
    }

    #[test]
    fn denied_paths_fail_with_permission_error() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/root/secret.txt", b"x");
        remote.deny("/root");
        let t = remote.open();
        assert!(matches!(
            t.read(&p("/root/secret.txt"), None),
            Err(BridgeError::PermissionDenied { .. })
        ));
        assert!(matches!(
            t.read_dir(&p("/root"), None),
            Err(BridgeError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn stat_follows_links_lstat_does_not() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_dir("/data/real");
        remote.add_symlink("/data/link", "real");
        let t = remote.open();
        assert_eq!(t.stat(&p("/data/link"), None).unwrap().kind, EntryKind::Dir);
        assert_eq!(t.lstat(&p("/data/link"), None).unwrap().kind, EntryKind::Symlink);
    }

    #[test]
    fn injected_fault_hits_next_call_only() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/a", b"1");
        let t = remote.open();
        remote.fail_next(Fault::Timeout);
        assert!(matches!(
            t.read(&p("/a"), None),
            Err(BridgeError::Timeout { .. })
        ));
        assert_eq!(t.read(&p("/a"), None).unwrap(), b"1");
    }

    #[test]
    fn exec_rejects_unquoted_operators() {
        let remote = MemoryRemote::new("dev", "pw");
        let t = remote.open();
        let out = t.exec("cat /etc/passwd; id", b"", None).unwrap();
        assert_eq!(out.exit_status, Some(2));
        assert!(remote.exec_log()[0].argv.is_none());
    }

    #[test]
    fn exec_requires_correct_password() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/etc/shadow", b"root:x");
        let t = remote.open();
        let line = "'sudo' '-S' '-k' '-p' '' '--' 'cat' '--' '/etc/shadow'";
        let out = t.exec(line, b"wrong\n", None).unwrap();
        assert_eq!(out.exit_status, Some(1));
        assert!(out.stderr_text().contains("incorrect password"));
        let out = t.exec(line, b"pw\n", None).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, b"root:x");
    }

    #[test]
    fn non_interactive_exec_needs_a_nopasswd_rule() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/etc/motd", b"hi");
        let t = remote.open();
        let line = "'sudo' '-n' '-k' '--' 'cat' '--' '/etc/motd'";
        let out = t.exec(line, b"", None).unwrap();
        assert_eq!(out.exit_status, Some(1));
        assert!(out.stderr_text().contains("a password is required"));
        remote.allow_nopasswd(&["cat"]);
        let out = t.exec(line, b"", None).unwrap();
        assert_eq!(out.stdout, b"hi");
    }

    #[test]
    fn nopasswd_tool_reads_the_whole_stdin() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_dir("/srv");
        remote.allow_nopasswd(&["dd"]);
        let t = remote.open();
        let line = "'sudo' '-S' '-k' '-p' '' '--' 'dd' 'of=/srv/f' 'bs=65536' 'status=none'";
        assert!(t.exec(line, b"pw\ndata", None).unwrap().success());
        assert_eq!(remote.file("/srv/f").unwrap(), b"pw\ndata");
    }

    #[test]
    fn lstat_style_stat_reports_dangling_links() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.allow_nopasswd(&["stat"]);
        remote.add_symlink("/srv/dangling", "/nowhere");
        let t = remote.open();
        let follow = t
            .exec("'sudo' '-n' '-k' '--' 'stat' '-L' '-c' '%F' '--' '/srv/dangling'", b"", None)
            .unwrap();
        assert!(follow.stderr_text().contains("No such file or directory"));
        let own = t
            .exec("'sudo' '-n' '-k' '--' 'stat' '-c' '%F' '--' '/srv/dangling'", b"", None)
            .unwrap();
        assert!(String::from_utf8_lossy(&own.stdout).starts_with("symbolic link/"));
    }

    #[test]
    fn calls_record_their_own_timeout() {
        let remote = MemoryRemote::new("dev", "pw");
        remote.add_file("/a", b"1");
        let t = remote.open();
        t.read(&p("/a"), Some(Duration::from_secs(2))).unwrap();
        t.stat(&p("/a"), None).unwrap();
        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].op, "read");
        assert_eq!(calls[0].target, "/a");
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(2)));
        assert_eq!(calls[1].timeout, None);
    }

    #[test]
    fn closed_transport_reports_transport_error() {
        let remote = MemoryRemote::new("dev", "pw");
        let t = remote.open();
        t.close().unwrap();
        assert!(matches!(
            t.stat(&p("/"), None),
            Err(BridgeError::Transport { .. })
        ));
    }

    #[test]
    fn absolute_normalizes_dot_segments() {
        assert_eq!(absolute("/a/./b/../c"), "/a/c");
        assert_eq!(absolute("rel/x"), "/rel/x");
        assert_eq!(absolute("/"), "/");
        assert_eq!(ancestors("/a/b/c"), vec!["/a", "/a/b"]);
    }
}
