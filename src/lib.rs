//! Remote filesystem bridge over SSH.
//!
//! A [`bridge::Bridge`] owns at most one SSH session and exposes file and
//! tree operations on it. Operations go either straight through SFTP or,
//! for sessions opened with escalation, through `sudo` commands on the
//! remote host.

pub mod backend;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod outcome;
pub mod path;
pub mod service;
pub mod session;
pub mod transport;
pub mod tree;

pub use bridge::{Bridge, CallOptions, EntryType, FileContent};
pub use error::{BridgeError, ErrorKind};
pub use outcome::Outcome;
pub use service::BridgeService;
pub use session::{ConnectRequest, Secret, SessionInfo, SessionState};
pub use tree::FileNode;
