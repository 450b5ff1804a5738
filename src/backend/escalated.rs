//! Escalated backend: file operations as privileged shell commands.
//!
//! Each operation runs one tool through the escalation program over an exec
//! channel. The first attempt for a tool is non-interactive
//! (`<program> -n -k -- <tool> ...`), so a tool the sudoers policy runs
//! without a password never sees the secret on its stdin. Once the program
//! answers that a password is required, that tool is remembered and run as
//! `<program> -S -k -p '' -- <tool> ...` with the secret as the first stdin
//! line and file content after it. Neither ever appears in a command line or
//! a process listing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::backend::command::{elevated_stdin, path_operand, AuthMode, ElevatedCommand};
use crate::backend::RemoteFs;
use crate::config::EscalationConfig;
use crate::error::BridgeError;
use crate::path::RemotePath;
use crate::session::Secret;
use crate::transport::{EntryKind, ExecOutput, RemoteEntry, RemoteStat, Transport};

const STAT_FORMAT: &str = "%F/%s/%Y/%a";
const LIST_FORMAT: &str = "%y/%s/%f\\0";
const WRITE_BLOCK_SIZE: &str = "bs=65536";
const MISSING_PATH: &str = "No such file or directory";
const PASSWORD_REQUIRED: &str = "a password is required";

/// State shared by every handle of one session's backend.
struct Escalation {
    secret: Secret,
    config: EscalationConfig,
    /// Tools the escalation program asked a password for.
    prompting: Mutex<HashSet<&'static str>>,
}

pub struct EscalatedBackend {
    transport: Arc<dyn Transport>,
    shared: Arc<Escalation>,
    timeout: Option<Duration>,
}

impl EscalatedBackend {
    pub fn new(transport: Arc<dyn Transport>, secret: Secret, config: EscalationConfig) -> Self {
        EscalatedBackend {
            transport,
            shared: Arc::new(Escalation {
                secret,
                config,
                prompting: Mutex::new(HashSet::new()),
            }),
            timeout: None,
        }
    }

    fn command(&self, tool: &'static str) -> ElevatedCommand {
        ElevatedCommand::new(&self.shared.config.program, tool)
    }

    fn needs_password(&self, tool: &'static str) -> bool {
        self.shared
            .prompting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(tool)
    }

    fn remember_password(&self, tool: &'static str) {
        self.shared
            .prompting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool);
    }

    /// Run `cmd` with `payload` on its stdin and classify failures.
    fn run(
        &self,
        op: &'static str,
        path: &RemotePath,
        cmd: ElevatedCommand,
        payload: &[u8],
    ) -> Result<Vec<u8>, BridgeError> {
        let tool = cmd.tool();
        if !self.needs_password(tool) {
            let line = cmd.to_command_line(AuthMode::NonInteractive);
            tracing::trace!(op, command = %line, "running elevated command");
            let output = self.transport.exec(&line, payload, self.timeout)?;
            if !password_required(&output) {
                return self.check(op, path, output);
            }
            tracing::debug!(op, tool, "escalation program asks for a password");
            self.remember_password(tool);
        }

        let line = cmd.to_command_line(AuthMode::Password);
        tracing::trace!(op, command = %line, "running elevated command");
        let stdin = elevated_stdin(&self.shared.secret, payload);
        let output = self.transport.exec(&line, &stdin, self.timeout)?;
        self.check(op, path, output)
    }

    fn check(
        &self,
        op: &'static str,
        path: &RemotePath,
        output: ExecOutput,
    ) -> Result<Vec<u8>, BridgeError> {
        match output.exit_status {
            Some(0) => Ok(output.stdout),
            None => Err(BridgeError::Escalation {
                op,
                path: path.to_string(),
                message: non_empty(output.stderr_text(), "remote command terminated abnormally"),
            }),
            Some(code) => {
                let message = output.stderr_text();
                if self.is_auth_rejection(&message) {
                    tracing::debug!(op, code, "escalation secret rejected");
                    return Err(BridgeError::Auth {
                        reason: format!("{} rejected the password", self.shared.config.program),
                    });
                }
                if message.contains(MISSING_PATH) {
                    return Err(BridgeError::NotFound {
                        path: path.to_string(),
                    });
                }
                Err(BridgeError::Escalation {
                    op,
                    path: path.to_string(),
                    message: non_empty(message, &format!("exit status {}", code)),
                })
            }
        }
    }

    fn is_auth_rejection(&self, stderr: &str) -> bool {
        let lowered = stderr.to_lowercase();
        self.shared
            .config
            .auth_patterns
            .iter()
            .any(|pattern| lowered.contains(&pattern.to_lowercase()))
    }

    /// Apply banner stripping to command output when configured.
    fn scrub(&self, stdout: Vec<u8>) -> Vec<u8> {
        if self.shared.config.strip_banner {
            strip_banner(stdout, &self.shared.config.program)
        } else {
            stdout
        }
    }

    /// `stat` with `STAT_FORMAT`; `-L` follows a final symbolic link.
    fn stat_with(&self, path: &RemotePath, follow: bool) -> Result<RemoteStat, BridgeError> {
        let mut cmd = self.command("stat");
        if follow {
            cmd = cmd.arg("-L");
        }
        let cmd = cmd.arg("-c").arg(STAT_FORMAT).path(path);
        let stdout = self.run("stat", path, cmd, b"")?;
        parse_stat("stat", path, &self.scrub(stdout))
    }
}

/// A non-interactive attempt refused because the tool needs a password.
fn password_required(output: &ExecOutput) -> bool {
    output.exit_status == Some(1)
        && output.stderr_text().to_lowercase().contains(PASSWORD_REQUIRED)
}

/// Drop the first line of `output` if it names `program`.
///
/// Output without such a line is returned unchanged.
pub fn strip_banner(output: Vec<u8>, program: &str) -> Vec<u8> {
    let Some(end) = output.iter().position(|b| *b == b'\n') else {
        return output;
    };
    let first = String::from_utf8_lossy(&output[..end]);
    if !program.is_empty() && first.contains(program) {
        output[end + 1..].to_vec()
    } else {
        output
    }
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

fn malformed(op: &'static str, path: &RemotePath, what: &str) -> BridgeError {
    BridgeError::Escalation {
        op,
        path: path.to_string(),
        message: format!("unexpected output from remote command: {}", what),
    }
}

/// Parse one `%F/%s/%Y/%a` line from `stat`.
fn parse_stat(op: &'static str, path: &RemotePath, stdout: &[u8]) -> Result<RemoteStat, BridgeError> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.trim_end_matches('\n');
    let mut fields = line.splitn(4, '/');
    let (Some(kind), Some(size), Some(mtime), Some(mode)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed(op, path, line));
    };
    let kind = match kind {
        "directory" => EntryKind::Dir,
        "regular file" | "regular empty file" => EntryKind::File,
        "symbolic link" => EntryKind::Symlink,
        _ => EntryKind::Other,
    };
    let size = size
        .trim()
        .parse::<u64>()
        .map_err(|_| malformed(op, path, line))?;
    Ok(RemoteStat {
        kind,
        size,
        modified: mtime.trim().parse::<u64>().ok(),
        permissions: u32::from_str_radix(mode.trim(), 8).ok(),
    })
}

/// Parse NUL-terminated `%y/%s/%f` records from `find`.
fn parse_listing(path: &RemotePath, stdout: &[u8]) -> Result<Vec<RemoteEntry>, BridgeError> {
    let mut entries = Vec::new();
    for record in stdout.split(|b| *b == 0) {
        if record.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(record);
        let mut fields = text.splitn(3, '/');
        let (Some(kind), Some(size), Some(name)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed("list", path, &text));
        };
        let kind = match kind {
            "d" => EntryKind::Dir,
            "f" => EntryKind::File,
            "l" => EntryKind::Symlink,
            _ => EntryKind::Other,
        };
        entries.push(RemoteEntry {
            name: name.to_string(),
            stat: RemoteStat {
                kind,
                size: size.parse().unwrap_or(0),
                modified: None,
                permissions: None,
            },
        });
    }
    Ok(entries)
}

impl RemoteFs for EscalatedBackend {
    fn stat(&self, path: &RemotePath) -> Result<RemoteStat, BridgeError> {
        self.stat_with(path, true)
    }

    fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, BridgeError> {
        let cmd = self
            .command("find")
            .arg("-H")
            .arg(path_operand(path))
            .arg("-mindepth")
            .arg("1")
            .arg("-maxdepth")
            .arg("1")
            .arg("-printf")
            .arg(LIST_FORMAT);
        let stdout = self.run("list", path, cmd, b"")?;
        parse_listing(path, &self.scrub(stdout))
    }

    fn read_file(&self, path: &RemotePath) -> Result<Vec<u8>, BridgeError> {
        let cmd = self.command("cat").path(path);
        let stdout = self.run("read", path, cmd, b"")?;
        Ok(self.scrub(stdout))
    }

    fn write_file(&self, path: &RemotePath, content: &[u8]) -> Result<(), BridgeError> {
        let cmd = self
            .command("dd")
            .arg(format!("of={}", path))
            .arg(WRITE_BLOCK_SIZE)
            .arg("status=none");
        self.run("write", path, cmd, content)?;
        Ok(())
    }

    fn mkdir(&self, path: &RemotePath) -> Result<(), BridgeError> {
        let cmd = self.command("mkdir").arg("-p").path(path);
        self.run("mkdir", path, cmd, b"")?;
        Ok(())
    }

    fn remove(&self, path: &RemotePath) -> Result<(), BridgeError> {
        // `rm -f` succeeds on missing paths; stat the entry itself first so
        // absence is reported and dangling links still count as present.
        self.stat_with(path, false)?;
        let cmd = self.command("rm").arg("-r").arg("-f").path(path);
        self.run("remove", path, cmd, b"")?;
        Ok(())
    }

    fn with_timeout(&self, timeout: Option<Duration>) -> Box<dyn RemoteFs> {
        Box::new(EscalatedBackend {
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
            timeout,
        })
    }

    fn name(&self) -> &'static str {
        "escalated"
    }
}
