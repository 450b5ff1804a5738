//! Interactive shell: one bridge, many commands.
//!
//! Lines are split with POSIX quoting rules and parsed by clap, so quoting a
//! path with spaces works the same way it does in a terminal.

use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;

use bytesize::ByteSize;
use clap::Parser;

use crate::backend::command::split_words;
use crate::bridge::{Bridge, CallOptions, EntryType, FileContent};
use crate::cli::args::{ConnectionArgs, ShellCommand, ShellLine};
use crate::cli::output::{emit, render_tree, write_stdout};
use crate::cli::{connect_request, read_secret, resolve_target};
use crate::error::BridgeError;
use crate::outcome::Outcome;
use crate::session::SessionInfo;
use crate::tree::FileNode;

const PROMPT: &str = "sshedit> ";

pub struct Shell<'a> {
    bridge: &'a Bridge,
    conn: ConnectionArgs,
    config_dir: &'a Path,
    json: bool,
    quiet: bool,
}

enum Flow {
    Continue,
    Quit,
}

impl<'a> Shell<'a> {
    pub fn new(
        bridge: &'a Bridge,
        conn: ConnectionArgs,
        config_dir: &'a Path,
        json: bool,
        quiet: bool,
    ) -> Self {
        Shell {
            bridge,
            conn,
            config_dir,
            json,
            quiet,
        }
    }

    /// Read commands from `input` until EOF or `quit`.
    pub fn run(&mut self, input: impl BufRead) -> Result<(), BridgeError> {
        let interactive = std::io::stdin().is_terminal();
        let has_target =
            self.conn.target.is_some() || self.conn.host.is_some() || self.conn.profile.is_some();
        if has_target {
            self.connect(None, false);
        }

        if interactive {
            prompt();
        }
        for line in input.lines() {
            let line = line?;
            match self.execute_line(&line) {
                Flow::Quit => break,
                Flow::Continue => {}
            }
            if interactive {
                prompt();
            }
        }
        self.bridge.disconnect();
        Ok(())
    }

    fn execute_line(&mut self, line: &str) -> Flow {
        let words = match split_words(line) {
            Ok(words) => words,
            Err(e) => {
                eprintln!("error: {}", e);
                return Flow::Continue;
            }
        };
        if words.is_empty() {
            return Flow::Continue;
        }
        match ShellLine::try_parse_from(words) {
            Ok(parsed) => self.execute(parsed.command),
            Err(e) => {
                let _ = e.print();
                Flow::Continue
            }
        }
    }

    fn execute(&mut self, command: ShellCommand) -> Flow {
        let opts = CallOptions::default();
        match command {
            ShellCommand::Connect { target, sudo } => self.connect(target.as_deref(), sudo),
            ShellCommand::Disconnect => {
                self.bridge.disconnect();
                self.show(Outcome::ok_with("Disconnected", ()), |_| {});
            }
            ShellCommand::Status => {
                self.show(Outcome::ok(self.bridge.status()), print_status);
            }
            ShellCommand::Tree { path } => {
                let outcome: Outcome<Vec<FileNode>> = self.bridge.tree_at(path.as_deref(), opts).into();
                self.show(outcome, |tree| print!("{}", render_tree(tree)));
            }
            ShellCommand::Cat { path } => {
                let outcome: Outcome<FileContent> = self.bridge.read_file(&path, opts).into();
                self.show(outcome, |file| write_stdout(&file.content));
            }
            ShellCommand::Put { local, path } => {
                let result = std::fs::read(&local)
                    .map_err(BridgeError::from)
                    .and_then(|content| {
                        self.bridge.write_file(&path, &content, opts)?;
                        Ok(content.len() as u64)
                    });
                let outcome = match result {
                    Ok(n) => Outcome::ok_with(format!("Wrote {} to {}", ByteSize(n), path), ()),
                    Err(e) => Outcome::failure(&e),
                };
                self.show(outcome, |_| {});
            }
            ShellCommand::New { kind, path } => {
                let outcome = match self.bridge.create_entry(kind, &path, opts) {
                    Ok(()) => Outcome::ok_with(format!("Created {} {}", kind_name(kind), path), ()),
                    Err(e) => Outcome::failure(&e),
                };
                self.show(outcome, |_| {});
            }
            ShellCommand::Rm { path } => {
                let outcome = match self.bridge.delete_entry(&path, opts) {
                    Ok(()) => Outcome::ok_with(format!("Deleted {}", path), ()),
                    Err(e) => Outcome::failure(&e),
                };
                self.show(outcome, |_| {});
            }
            ShellCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn connect(&mut self, target: Option<&str>, sudo: bool) {
        let mut conn = self.conn.clone();
        conn.sudo |= sudo;
        let result = resolve_target(&conn, target, self.config_dir).and_then(|resolved| {
            let secret = read_secret(&resolved)?;
            self.bridge.connect(connect_request(&resolved, secret))?;
            Ok(resolved)
        });
        let outcome = match result {
            Ok(resolved) => Outcome::ok_with(
                format!(
                    "Connected to {}@{}:{} ({})",
                    resolved.username,
                    resolved.host,
                    resolved.port,
                    if resolved.escalate { "sudo" } else { "direct" }
                ),
                (),
            ),
            Err(e) => Outcome::failure(&e),
        };
        self.show(outcome, |_| {});
    }

    fn show<T: serde::Serialize>(&self, outcome: Outcome<T>, human: impl FnOnce(&T)) {
        emit(&outcome, self.json, self.quiet, human);
    }
}

fn kind_name(kind: EntryType) -> &'static str {
    match kind {
        EntryType::File => "file",
        EntryType::Directory => "directory",
    }
}

fn prompt() {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{}", PROMPT);
    let _ = stderr.flush();
}

pub fn print_status(info: &SessionInfo) {
    println!("state:    {}", info.state);
    if let (Some(user), Some(host), Some(port)) = (&info.username, &info.host, info.port) {
        println!("remote:   {}@{}:{}", user, host, port);
    }
    if let Some(root) = &info.root_path {
        println!("root:     {}", root);
        println!("backend:  {}", if info.escalate { "sudo" } else { "direct" });
    }
}
