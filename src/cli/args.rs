use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::bridge::EntryType;
use crate::config::HostKeyPolicy;

#[derive(Parser, Debug)]
#[command(
    name = "sshedit",
    version,
    about = "Browse and edit files on a remote host over SSH"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v for verbose, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode: suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print results as JSON envelopes
    #[arg(long, global = true)]
    pub json: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Where and how to connect. Explicit flags override the target, which
/// overrides a saved profile.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Remote target (ssh://user@host:port/path or user@host:/path)
    #[arg(short = 't', long, global = true, env = "SSHEDIT_TARGET")]
    pub target: Option<String>,

    /// Use a saved profile
    #[arg(short = 'P', long, global = true)]
    pub profile: Option<String>,

    /// Remote host name or address
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Remote SSH port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Remote user name
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Root path on the remote host (default: the login directory)
    #[arg(long, global = true)]
    pub root: Option<String>,

    /// Run file operations through sudo with the login password
    #[arg(long, global = true)]
    pub sudo: bool,

    /// Per-operation timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Host key verification policy (overrides config.toml)
    #[arg(long, value_enum, global = true)]
    pub host_keys: Option<HostKeyPolicy>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the directory tree under the root (or PATH)
    Tree(TreeArgs),

    /// Print a remote file to stdout
    Cat(PathArgs),

    /// Replace a remote file with stdin or a local file
    Write(WriteArgs),

    /// Create a remote directory and its parents
    Mkdir(PathArgs),

    /// Create an empty remote file, truncating an existing one
    Touch(PathArgs),

    /// Delete a remote file or directory tree
    Rm(PathArgs),

    /// Connect and report the session status
    Status,

    /// Interactive shell keeping one session open
    Shell,

    /// Manage saved connection profiles
    Profile(ProfileArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(clap::Args, Debug)]
pub struct TreeArgs {
    /// Directory to enumerate (default: the session root)
    pub path: Option<String>,

    /// Additional exclude patterns (can be repeated)
    #[arg(long, action = clap::ArgAction::Append)]
    pub exclude: Vec<String>,

    /// Maximum directory depth
    #[arg(long)]
    pub max_depth: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct PathArgs {
    /// Remote path
    pub path: String,
}

#[derive(clap::Args, Debug)]
pub struct WriteArgs {
    /// Remote path
    pub path: String,

    /// Read content from this local file instead of stdin
    #[arg(long)]
    pub from: Option<PathBuf>,
}

/// Arguments for the `sshedit profile` command.
#[derive(clap::Args, Debug)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub action: Option<ProfileAction>,
}

/// Subcommands for profile management.
#[derive(Subcommand, Debug)]
pub enum ProfileAction {
    /// Save a connection profile
    Add(ProfileAddArgs),

    /// Remove a saved profile
    Rm(ProfileRmArgs),

    /// List saved profiles
    List,
}

/// Arguments for `sshedit profile add`.
#[derive(clap::Args, Debug)]
pub struct ProfileAddArgs {
    /// Name for the profile (e.g., web, db-primary)
    pub name: String,

    /// Target (ssh://user@host:port/path or user@host:/path)
    #[arg(value_name = "TARGET")]
    pub target_spec: String,
}

/// Arguments for `sshedit profile rm`.
#[derive(clap::Args, Debug)]
pub struct ProfileRmArgs {
    /// Name of profile to remove
    pub name: String,
}

/// Arguments for the `sshedit completions` command.
#[derive(clap::Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

/// One line of the interactive shell.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug)]
pub enum ShellCommand {
    /// Open (or replace) the session
    Connect {
        /// Target; defaults to the one given on the command line
        target: Option<String>,
        /// Use sudo for file operations
        #[arg(long)]
        sudo: bool,
    },
    /// Close the session
    Disconnect,
    /// Show the session status
    Status,
    /// Print the tree under the root (or PATH)
    Tree { path: Option<String> },
    /// Print a file
    Cat { path: String },
    /// Replace a file with a local file's content
    Put { local: PathBuf, path: String },
    /// Create a file or directory
    New {
        #[arg(value_enum)]
        kind: EntryType,
        path: String,
    },
    /// Delete a file or directory tree
    Rm { path: String },
    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}
