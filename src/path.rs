//! Remote path handling.
//!
//! Remote paths are plain strings in forward-slash form. Normalization only
//! rewrites separators: runs of `/` collapse and a trailing `/` is dropped.
//! Input written with `\` separators only (no `/` anywhere) has every `\`
//! turned into `/`; once a `/` is present, `\` is an ordinary file name
//! character. `.` and `..` are passed through untouched for the remote side
//! to interpret.

use std::fmt;

use crate::error::BridgeError;

/// A normalized, forward-slash remote path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// Normalize `raw` into forward-slash form.
    ///
    /// Empty input and input containing NUL bytes are rejected: neither can
    /// name a remote file.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        if raw.is_empty() {
            return Err(BridgeError::InvalidInput("path is required".into()));
        }
        if raw.contains('\0') {
            return Err(BridgeError::InvalidInput(
                "path must not contain NUL bytes".into(),
            ));
        }

        let backslash_separated = !raw.contains('/');
        let mut out = String::with_capacity(raw.len());
        let mut last_was_slash = false;
        for c in raw.chars() {
            let c = if backslash_separated && c == '\\' { '/' } else { c };
            if c == '/' {
                if last_was_slash {
                    continue;
                }
                last_was_slash = true;
            } else {
                last_was_slash = false;
            }
            out.push(c);
        }
        if out.len() > 1 && out.ends_with('/') {
            out.pop();
        }
        Ok(RemotePath(out))
    }

    pub fn root() -> RemotePath {
        RemotePath("/".into())
    }

    /// A single path component taken from an already-split path.
    pub(crate) fn from_component(name: &str) -> RemotePath {
        RemotePath(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// Append a single entry name.
    pub fn join(&self, name: &str) -> RemotePath {
        if self.0 == "/" {
            RemotePath(format!("/{}", name))
        } else {
            RemotePath(format!("{}/{}", self.0, name))
        }
    }

    /// Resolve `self` against `base` unless it is already absolute.
    pub fn resolve_against(&self, base: &RemotePath) -> RemotePath {
        if self.is_absolute() {
            self.clone()
        } else {
            let mut joined = base.clone();
            for part in self.0.split('/') {
                joined = joined.join(part);
            }
            joined
        }
    }

    /// Last path component, or the whole path for `/`.
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) if idx + 1 < self.0.len() => &self.0[idx + 1..],
            _ => &self.0,
        }
    }

    /// Parent directory, if the path has one.
    pub fn parent(&self) -> Option<RemotePath> {
        match self.0.rfind('/') {
            Some(0) if self.0.len() > 1 => Some(RemotePath("/".into())),
            Some(0) | None => None,
            Some(idx) => Some(RemotePath(self.0[..idx].to_string())),
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backslashes_become_slashes() {
        let p = RemotePath::parse("C:\\srv\\app\\main.rs").unwrap();
        assert_eq!(p.as_str(), "C:/srv/app/main.rs");
        let p = RemotePath::parse("\\srv\\app").unwrap();
        assert_eq!(p.as_str(), "/srv/app");
    }

    #[test]
    fn backslash_is_a_name_character_in_slash_paths() {
        let p = RemotePath::parse("/w/a\\b.txt").unwrap();
        assert_eq!(p.as_str(), "/w/a\\b.txt");
        assert_eq!(p.file_name(), "a\\b.txt");
        let joined = RemotePath::parse("/w").unwrap().join("a\\b.txt");
        assert_eq!(RemotePath::parse(joined.as_str()).unwrap(), joined);
    }

    #[test]
    fn duplicate_and_trailing_slashes_collapse() {
        assert_eq!(RemotePath::parse("/var//www///").unwrap().as_str(), "/var/www");
        assert_eq!(RemotePath::parse("/").unwrap().as_str(), "/");
        assert_eq!(RemotePath::parse("//").unwrap().as_str(), "/");
    }

    #[test]
    fn dot_segments_are_left_alone() {
        let p = RemotePath::parse("/srv/../etc/./passwd").unwrap();
        assert_eq!(p.as_str(), "/srv/../etc/./passwd");
    }

    #[test]
    fn empty_and_nul_rejected() {
        assert!(matches!(
            RemotePath::parse(""),
            Err(BridgeError::InvalidInput(_))
        ));
        assert!(RemotePath::parse("/tmp/a\0b").is_err());
    }

    #[test]
    fn join_handles_root() {
        let root = RemotePath::parse("/").unwrap();
        assert_eq!(root.join("etc").as_str(), "/etc");
        let srv = RemotePath::parse("/srv").unwrap();
        assert_eq!(srv.join("a b.txt").as_str(), "/srv/a b.txt");
    }

    #[test]
    fn resolve_relative_against_base() {
        let base = RemotePath::parse("/home/dev/project").unwrap();
        let rel = RemotePath::parse("src/lib.rs").unwrap();
        assert_eq!(
            rel.resolve_against(&base).as_str(),
            "/home/dev/project/src/lib.rs"
        );
        let abs = RemotePath::parse("/etc/hosts").unwrap();
        assert_eq!(abs.resolve_against(&base).as_str(), "/etc/hosts");
    }

    #[test]
    fn file_name_and_parent() {
        let p = RemotePath::parse("/srv/app/main.rs").unwrap();
        assert_eq!(p.file_name(), "main.rs");
        assert_eq!(p.parent().unwrap().as_str(), "/srv/app");
        let top = RemotePath::parse("/srv").unwrap();
        assert_eq!(top.parent().unwrap().as_str(), "/");
        assert!(RemotePath::parse("/").unwrap().parent().is_none());
        assert!(RemotePath::parse("notes.txt").unwrap().parent().is_none());
        assert_eq!(RemotePath::parse("/").unwrap().file_name(), "/");
    }
}
