//! Rendering of results for the terminal.

use std::io::Write;

use serde::Serialize;

use crate::outcome::Outcome;
use crate::tree::FileNode;

/// Print an outcome and return the process exit code for it.
///
/// With `json` the envelope goes to stdout. Otherwise `human` renders the
/// payload to stdout and messages go to stderr.
pub fn emit<T: Serialize>(
    outcome: &Outcome<T>,
    json: bool,
    quiet: bool,
    human: impl FnOnce(&T),
) -> i32 {
    if json {
        match serde_json::to_string_pretty(outcome) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("error: could not encode result: {}", e),
        }
        return if outcome.is_success() { 0 } else { 1 };
    }
    match outcome {
        Outcome::Success { message, data } => {
            human(data);
            if let Some(message) = message {
                if !quiet {
                    eprintln!("{}", message);
                }
            }
            0
        }
        Outcome::Failure { message, hint, .. } => {
            eprintln!("error: {}", message);
            if let Some(hint) = hint {
                eprintln!("  hint: {}", hint);
            }
            1
        }
    }
}

/// Render a tree the way `tree(1)` does.
pub fn render_tree(nodes: &[FileNode]) -> String {
    let mut out = String::new();
    render_level(nodes, "", &mut out);
    out
}

fn render_level(nodes: &[FileNode], prefix: &str, out: &mut String) {
    for (i, node) in nodes.iter().enumerate() {
        let last = i + 1 == nodes.len();
        let branch = if last { "└── " } else { "├── " };
        out.push_str(prefix);
        out.push_str(branch);
        out.push_str(&node.name);
        if node.is_dir {
            out.push('/');
            if node.children.is_none() {
                out.push_str("  [not listed]");
            }
        }
        out.push('\n');
        if let Some(children) = &node.children {
            let next = format!("{}{}", prefix, if last { "    " } else { "│   " });
            render_level(children, &next, out);
        }
    }
}

/// Write raw bytes to stdout.
pub fn write_stdout(bytes: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(bytes).and_then(|_| stdout.flush()) {
        tracing::debug!("stdout closed: {}", e);
    }
}
