//! Remote command construction.
//!
//! Every word of an elevated command line is single-quoted, so paths with
//! quotes, spaces or shell metacharacters reach the remote program as one
//! literal argument. The secret never appears on the command line: when the
//! escalation program asks for it, it is the first line of the command's
//! standard input.

use zeroize::Zeroizing;

use crate::error::BridgeError;
use crate::path::RemotePath;
use crate::session::Secret;

/// Quote `word` for a POSIX shell.
///
/// The result is always wrapped in single quotes; embedded single quotes are
/// written as `'\''`.
pub fn quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', "'\\''"))
}

/// Render a path for tools that do not accept `--` before operands.
///
/// A relative path starting with `-` would be read as an option, so it gets a
/// `./` prefix.
pub fn path_operand(path: &RemotePath) -> String {
    if path.as_str().starts_with('-') {
        format!("./{}", path)
    } else {
        path.as_str().to_string()
    }
}

/// Split a command line into words using POSIX shell quoting rules.
///
/// Supports single quotes, double quotes and backslash escapes. Unquoted
/// operators and expansions (`;`, `|`, `&`, `<`, `>`, `(`, `)`, `` ` ``, `$`)
/// are rejected rather than interpreted.
pub fn split_words(line: &str) -> Result<Vec<String>, BridgeError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\n' => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(BridgeError::InvalidInput(
                                "unterminated single quote".into(),
                            ))
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc @ ('"' | '\\' | '$' | '`')) => current.push(esc),
                            Some('\n') => {}
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err(BridgeError::InvalidInput(
                                    "unterminated double quote".into(),
                                ))
                            }
                        },
                        Some('$') | Some('`') => {
                            return Err(BridgeError::InvalidInput(
                                "expansions inside double quotes are not supported".into(),
                            ))
                        }
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(BridgeError::InvalidInput(
                                "unterminated double quote".into(),
                            ))
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(ch) => current.push(ch),
                    None => {
                        return Err(BridgeError::InvalidInput(
                            "trailing backslash".into(),
                        ))
                    }
                }
            }
            ';' | '|' | '&' | '<' | '>' | '(' | ')' | '`' | '$' => {
                return Err(BridgeError::InvalidInput(format!(
                    "unsupported shell metacharacter '{}'",
                    c
                )));
            }
            '#' if !in_word => break,
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// How the escalation program authenticates an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// `-n`: never prompt. Fails with "a password is required" unless the
    /// sudoers policy lets the tool run without one. Nothing is read from
    /// stdin, so it belongs to the tool.
    NonInteractive,
    /// `-S -p ''`: the first stdin line is the secret, consumed by the
    /// escalation program before the tool starts.
    Password,
}

impl AuthMode {
    fn flags(self) -> &'static [&'static str] {
        match self {
            AuthMode::NonInteractive => &["-n", "-k"],
            AuthMode::Password => &["-S", "-k", "-p", ""],
        }
    }
}

/// An escalated invocation: `<program> <auth flags> -- <tool> <args...>`.
///
/// `-k` ignores cached credentials, so a password-mode invocation always
/// consumes the secret line; the empty `-p` prompt keeps the program from
/// printing a banner.
#[derive(Debug, Clone)]
pub struct ElevatedCommand {
    program: String,
    tool: &'static str,
    args: Vec<String>,
}

impl ElevatedCommand {
    pub fn new(program: &str, tool: &'static str) -> Self {
        ElevatedCommand {
            program: program.to_string(),
            tool,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `--` followed by the path.
    pub fn path(self, path: &RemotePath) -> Self {
        self.arg("--").arg(path.as_str())
    }

    pub fn tool(&self) -> &'static str {
        self.tool
    }

    pub fn words(&self, mode: AuthMode) -> Vec<String> {
        std::iter::once(self.program.as_str())
            .chain(mode.flags().iter().copied())
            .chain(["--", self.tool])
            .chain(self.args.iter().map(String::as_str))
            .map(str::to_string)
            .collect()
    }

    /// The command line as sent to the remote shell.
    pub fn to_command_line(&self, mode: AuthMode) -> String {
        self.words(mode)
            .iter()
            .map(|w| quote(w))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Standard input for an elevated command: the secret line, then `payload`.
///
/// Zeroed on drop, since it holds the secret.
pub fn elevated_stdin(secret: &Secret, payload: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut buf = Zeroizing::new(Vec::with_capacity(secret.expose().len() + 1 + payload.len()));
    buf.extend_from_slice(secret.expose().as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_simple() {
        assert_eq!(quote("simple"), "'simple'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("with spaces"), "'with spaces'");
    }

    #[test]
    fn quote_single_quotes() {
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote("'"), "''\\'''");
    }

    #[test]
    fn quote_leaves_metacharacters_inert() {
        assert_eq!(quote("$HOME"), "'$HOME'");
        assert_eq!(quote("`id`"), "'`id`'");
        assert_eq!(quote("a; rm -rf /"), "'a; rm -rf /'");
    }

    #[test]
    fn quoted_words_split_back_to_originals() {
        let nasty = [
            "/tmp/a'; rm -rf / #.txt",
            "with spaces",
            "$(reboot)",
            "`id`",
            "back\\slash",
            "\"double\"",
            "new\nline",
            "",
        ];
        for word in nasty {
            let line = format!("cat -- {}", quote(word));
            let words = split_words(&line).unwrap();
            assert_eq!(words, vec!["cat", "--", word], "word {:?}", word);
        }
    }

    #[test]
    fn split_rejects_unquoted_operators() {
        assert!(split_words("cat a; rm b").is_err());
        assert!(split_words("cat a | nc x").is_err());
        assert!(split_words("echo $HOME").is_err());
        assert!(split_words("cat > f").is_err());
    }

    #[test]
    fn split_handles_double_quotes_and_escapes() {
        assert_eq!(
            split_words(r#"put "my file.txt" a\ b"#).unwrap(),
            vec!["put", "my file.txt", "a b"]
        );
        assert_eq!(split_words(r#""a\"b""#).unwrap(), vec!["a\"b"]);
        assert!(split_words("'open").is_err());
        assert!(split_words("\"open").is_err());
    }

    #[test]
    fn split_stops_at_comment() {
        assert_eq!(split_words("tree # all").unwrap(), vec!["tree"]);
        assert_eq!(split_words("cat a#b").unwrap(), vec!["cat", "a#b"]);
    }

    #[test]
    fn elevated_command_shape() {
        let path = RemotePath::parse("/etc/my file").unwrap();
        let cmd = ElevatedCommand::new("sudo", "cat").path(&path);
        assert_eq!(cmd.tool(), "cat");
        assert_eq!(
            cmd.words(AuthMode::Password),
            ["sudo", "-S", "-k", "-p", "", "--", "cat", "--", "/etc/my file"]
        );
        assert_eq!(
            cmd.to_command_line(AuthMode::Password),
            "'sudo' '-S' '-k' '-p' '' '--' 'cat' '--' '/etc/my file'"
        );
        assert_eq!(
            cmd.to_command_line(AuthMode::NonInteractive),
            "'sudo' '-n' '-k' '--' 'cat' '--' '/etc/my file'"
        );
    }

    #[test]
    fn command_line_never_contains_secret() {
        let secret = Secret::new("s3cr3t");
        let path = RemotePath::parse("/root/x").unwrap();
        let cmd = ElevatedCommand::new("sudo", "cat").path(&path);
        let stdin = elevated_stdin(&secret, b"");
        for mode in [AuthMode::NonInteractive, AuthMode::Password] {
            assert!(!cmd.to_command_line(mode).contains("s3cr3t"));
        }
        assert_eq!(&stdin[..], b"s3cr3t\n");
    }

    #[test]
    fn stdin_carries_payload_after_secret() {
        let secret = Secret::new("pw");
        let stdin = elevated_stdin(&secret, b"a\0b\nc");
        assert_eq!(&stdin[..], b"pw\na\0b\nc");
    }

    #[test]
    fn dash_paths_get_dot_prefix() {
        let p = RemotePath::parse("-rf").unwrap();
        assert_eq!(path_operand(&p), "./-rf");
        let q = RemotePath::parse("/tmp/-x").unwrap();
        assert_eq!(path_operand(&q), "/tmp/-x");
    }
}
