use std::io::Read;

use bytesize::ByteSize;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use sshedit::bridge::{Bridge, CallOptions, EntryType, FileContent};
use sshedit::cli::args::{Cli, Commands, ConnectionArgs, ProfileAction};
use sshedit::cli::output::{emit, render_tree, write_stdout};
use sshedit::cli::shell::{print_status, Shell};
use sshedit::cli::{apply_overrides, connect_request, profile_from_target, read_secret, resolve_target};
use sshedit::config::paths::config_dir;
use sshedit::config::profiles::{validate_profile_name, ProfileStore};
use sshedit::config::{Settings, Verbosity};
use sshedit::error::BridgeError;
use sshedit::outcome::Outcome;
use sshedit::tree::FileNode;

fn main() {
    let cli = Cli::parse();

    // Convert CLI flags to verbosity level
    let verbosity = Verbosity::from((cli.quiet, cli.verbose));

    // RUST_LOG env var overrides CLI flags
    let filter = verbosity.as_tracing_filter();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr) // Keep stdout clean for output
        .init();

    tracing::debug!("Verbosity level: {:?}", verbosity);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            display_error(&err);
            std::process::exit(1);
        }
    }
}

/// Execute the dispatched command, returning the exit code.
fn run(cli: Cli) -> Result<i32, BridgeError> {
    let config_dir = config_dir()?;
    let mut settings = Settings::load(&config_dir)?;
    apply_overrides(&mut settings, &cli.connection);

    match cli.command {
        Commands::Profile(args) => {
            profile_command(args.action, &cli.connection, &config_dir, cli.quiet)?;
            Ok(0)
        }
        Commands::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "sshedit", &mut std::io::stdout());
            Ok(0)
        }
        Commands::Shell => {
            let bridge = Bridge::over_ssh(settings);
            let stdin = std::io::stdin();
            Shell::new(&bridge, cli.connection.clone(), &config_dir, cli.json, cli.quiet)
                .run(stdin.lock())?;
            Ok(0)
        }
        Commands::Tree(args) => {
            settings.tree.exclude.extend(args.exclude);
            if let Some(depth) = args.max_depth {
                settings.tree.max_depth = depth;
            }
            let bridge = connect(settings, &cli.connection, &config_dir)?;
            let outcome: Outcome<Vec<FileNode>> = bridge
                .and_then(|b| b.tree_at(args.path.as_deref(), CallOptions::default()))
                .into();
            Ok(emit(&outcome, cli.json, cli.quiet, |tree| {
                print!("{}", render_tree(tree))
            }))
        }
        Commands::Cat(args) => {
            let bridge = connect(settings, &cli.connection, &config_dir)?;
            let outcome: Outcome<FileContent> = bridge
                .and_then(|b| b.read_file(&args.path, CallOptions::default()))
                .into();
            Ok(emit(&outcome, cli.json, cli.quiet, |file| {
                write_stdout(&file.content)
            }))
        }
        Commands::Write(args) => {
            let content = match &args.from {
                Some(path) => std::fs::read(path)?,
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            let bridge = connect(settings, &cli.connection, &config_dir)?;
            let outcome = match bridge.and_then(|b| b.write_file(&args.path, &content, CallOptions::default())) {
                Ok(()) => Outcome::ok_with(
                    format!("Wrote {} to {}", ByteSize(content.len() as u64), args.path),
                    (),
                ),
                Err(e) => Outcome::failure(&e),
            };
            Ok(emit(&outcome, cli.json, cli.quiet, |_| {}))
        }
        Commands::Mkdir(args) => {
            let bridge = connect(settings, &cli.connection, &config_dir)?;
            let outcome = created(
                bridge.and_then(|b| b.create_entry(EntryType::Directory, &args.path, CallOptions::default())),
                "directory",
                &args.path,
            );
            Ok(emit(&outcome, cli.json, cli.quiet, |_| {}))
        }
        Commands::Touch(args) => {
            let bridge = connect(settings, &cli.connection, &config_dir)?;
            let outcome = created(
                bridge.and_then(|b| b.create_entry(EntryType::File, &args.path, CallOptions::default())),
                "file",
                &args.path,
            );
            Ok(emit(&outcome, cli.json, cli.quiet, |_| {}))
        }
        Commands::Rm(args) => {
            let bridge = connect(settings, &cli.connection, &config_dir)?;
            let outcome = match bridge.and_then(|b| b.delete_entry(&args.path, CallOptions::default())) {
                Ok(()) => Outcome::ok_with(format!("Deleted {}", args.path), ()),
                Err(e) => Outcome::failure(&e),
            };
            Ok(emit(&outcome, cli.json, cli.quiet, |_| {}))
        }
        Commands::Status => {
            let bridge = connect(settings, &cli.connection, &config_dir)?;
            let outcome: Outcome<_> = bridge.map(|b| b.status()).into();
            Ok(emit(&outcome, cli.json, cli.quiet, print_status))
        }
    }
}

/// Resolve the target and open a session.
///
/// The outer `Result` carries errors that happen before any remote contact
/// (bad arguments, unreadable config); the inner one carries connection
/// failures so they are reported through the same envelope as operations.
fn connect(
    settings: Settings,
    conn: &ConnectionArgs,
    config_dir: &std::path::Path,
) -> Result<Result<Bridge, BridgeError>, BridgeError> {
    let target = resolve_target(conn, None, config_dir)?;
    let secret = read_secret(&target)?;
    let bridge = Bridge::over_ssh(settings);
    Ok(bridge
        .connect(connect_request(&target, secret))
        .map(|()| bridge))
}

fn created(result: Result<(), BridgeError>, kind: &str, path: &str) -> Outcome<()> {
    match result {
        Ok(()) => Outcome::ok_with(format!("Created {} {}", kind, path), ()),
        Err(e) => Outcome::failure(&e),
    }
}

fn profile_command(
    action: Option<ProfileAction>,
    conn: &ConnectionArgs,
    config_dir: &std::path::Path,
    quiet: bool,
) -> Result<(), BridgeError> {
    let mut store = ProfileStore::load(config_dir)?;
    match action {
        Some(ProfileAction::Add(args)) => {
            validate_profile_name(&args.name)?;
            let profile = profile_from_target(&args.target_spec, conn.sudo)?;
            if !quiet {
                eprintln!(
                    "Saved profile '{}' -> {}@{}:{} {}",
                    args.name, profile.username, profile.host, profile.port, profile.root
                );
            }
            store.add(args.name, profile);
            store.save()?;
        }
        Some(ProfileAction::Rm(args)) => {
            if store.remove(&args.name) {
                store.save()?;
                if !quiet {
                    eprintln!("Removed profile '{}'", args.name);
                }
            } else {
                return Err(BridgeError::InvalidInput(format!(
                    "Profile '{}' not found",
                    args.name
                )));
            }
        }
        Some(ProfileAction::List) | None => {
            let profiles = store.list();
            if profiles.is_empty() {
                if !quiet {
                    eprintln!("No saved profiles. Add one with: sshedit profile add <NAME> <TARGET>");
                }
            } else {
                for (name, p) in profiles {
                    println!(
                        "{:<16} {}@{}:{}{}  root={}",
                        name,
                        p.username,
                        p.host,
                        p.port,
                        if p.escalate { " [sudo]" } else { "" },
                        p.root
                    );
                }
            }
        }
    }
    Ok(())
}

/// Display a BridgeError with optional suggestion hint to stderr.
fn display_error(err: &BridgeError) {
    eprintln!("error: {}", err);
    if let Some(suggestion) = err.suggestion() {
        eprintln!("  hint: {}", suggestion);
    }
}
