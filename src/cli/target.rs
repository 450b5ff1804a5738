//! Connection target parsing.
//!
//! Accepted forms:
//! - `ssh://user@host:port/path` (also `sftp://`)
//! - `user@host:/path` (scp style; the path is optional)
//! - `host`

use url::Url;

use crate::error::BridgeError;

/// Connection details named on the command line. Missing parts are filled in
/// from flags, a saved profile, or defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub path: Option<String>,
}

/// Parse a raw target string.
pub fn parse_target(input: &str) -> Result<Target, BridgeError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(BridgeError::InvalidInput("target is empty".into()));
    }

    if input.starts_with("ssh://") || input.starts_with("sftp://") {
        let url = Url::parse(input)
            .map_err(|e| BridgeError::InvalidInput(format!("invalid target '{}': {}", input, e)))?;
        return parse_ssh_url(&url, input);
    }

    parse_scp_style(input)
}

fn parse_ssh_url(url: &Url, input: &str) -> Result<Target, BridgeError> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| BridgeError::InvalidInput(format!("target '{}' has no host", input)))?;
    // IPv6 hosts come back bracketed.
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    let username = if url.username().is_empty() {
        None
    } else {
        Some(percent_decode(url.username()))
    };
    let path = match url.path() {
        "" => None,
        p => Some(percent_decode(p)),
    };
    Ok(Target {
        host,
        port: url.port(),
        username,
        path,
    })
}

/// `[user@]host[:path]`
fn parse_scp_style(input: &str) -> Result<Target, BridgeError> {
    let (username, rest) = match input.rsplit_once('@') {
        Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
        Some(_) => {
            return Err(BridgeError::InvalidInput(format!(
                "target '{}' has an empty user name",
                input
            )))
        }
        None => (None, input),
    };
    let (host, path) = match rest.split_once(':') {
        Some((host, path)) => (host, (!path.is_empty()).then(|| path.to_string())),
        None => (rest, None),
    };
    if host.is_empty() {
        return Err(BridgeError::InvalidInput(format!(
            "target '{}' has no host",
            input
        )));
    }
    Ok(Target {
        host: host.to_string(),
        port: None,
        username,
        path,
    })
}

/// Decode `%XX` escapes in a URL component.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
