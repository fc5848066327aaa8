//! eBPF program-type store inspection CLI.
//!
//! Provides the `ebpf-store` binary for unprivileged tooling. Every
//! subcommand is read-only: it opens the existing hive file without write
//! access in the host context, reads, and prints. A missing hive file is
//! an error, never an empty store. Publishing is left to providers.
//!
//! The hive file and Store root come from `EBPF_STORE_HIVE` and
//! `EBPF_STORE_ROOT`, overridden by `--hive` and `--root`. Listings are
//! printed as JSON on stdout; logs go to stderr and honor `RUST_LOG`.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ebpf_store::{HostContext, SqliteHive, Store, StoreConfig, StoreError};
use ebpf_store_types::Guid;

/// Inspect the eBPF program-type store.
#[derive(Parser)]
#[command(name = "ebpf-store", about = "Inspect the eBPF program-type store")]
struct Cli {
    /// Hive database file (overrides EBPF_STORE_HIVE).
    #[arg(long, global = true)]
    hive: Option<PathBuf>,

    /// Store root key path (overrides EBPF_STORE_ROOT).
    #[arg(long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the key tree below the Store root.
    Dump,

    /// Print the blake3 fingerprint of the store contents.
    Fingerprint,

    /// List provider GUIDs.
    Providers,

    /// List the program types of a provider.
    Programs {
        #[arg(short, long)]
        provider: Guid,
    },

    /// List the section conventions of a provider.
    Sections {
        #[arg(short, long)]
        provider: Guid,
    },

    /// List helper prototypes: a provider's, or the global ones.
    Helpers {
        #[arg(short, long)]
        provider: Option<Guid>,
    },

    /// Print the effective configuration.
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = effective_config(StoreConfig::from_env(), cli.hive, cli.root);
    process::exit(run(&config, &cli.command));
}

/// CLI flags win over the environment.
fn effective_config(mut config: StoreConfig, hive: Option<PathBuf>, root: Option<String>) -> StoreConfig {
    if let Some(hive) = hive {
        config.hive_path = hive;
    }
    if let Some(root) = root {
        config.root_path = root;
    }
    config
}

/// Execute a subcommand and print its output.
///
/// Returns exit code: 0 = success, 1 = invalid input or malformed store
/// contents, 3 = I/O error.
fn run(config: &StoreConfig, command: &Commands) -> i32 {
    debug!(?command, hive = %config.hive_path.display(), root = %config.root_path, "dispatching");
    let store = match command {
        Commands::Config => None,
        _ => match config.open_read_only_store() {
            Ok(store) => Some(store),
            Err(e) => {
                eprintln!(
                    "Error: failed to open store '{}': {}",
                    config.hive_path.display(),
                    e
                );
                return 3;
            }
        },
    };

    match execute(config, store.as_ref(), command) {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(CommandError::Store(e)) => {
            eprintln!("Error: {}", e);
            exit_code(&e)
        }
        Err(CommandError::Json(e)) => {
            eprintln!("Error: failed to serialize output: {}", e);
            1
        }
        Err(CommandError::NoStore) => {
            eprintln!("Error: store not opened");
            3
        }
    }
}

#[derive(Debug)]
enum CommandError {
    Store(StoreError),
    Json(serde_json::Error),
    NoStore,
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Store(e)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(e: serde_json::Error) -> Self {
        CommandError::Json(e)
    }
}

/// Runs a subcommand and renders its output. Every subcommand except
/// `config` needs the store.
fn execute(
    config: &StoreConfig,
    store: Option<&Store<HostContext<SqliteHive>>>,
    command: &Commands,
) -> Result<String, CommandError> {
    if let Commands::Config = command {
        return Ok(serde_json::to_string_pretty(config)?);
    }
    let store = store.ok_or(CommandError::NoStore)?;

    let output = match command {
        Commands::Dump => store.snapshot()?.render_tree(),
        Commands::Fingerprint => store.snapshot()?.fingerprint().to_hex().to_string(),
        Commands::Providers => serde_json::to_string_pretty(&store.list_providers()?)?,
        Commands::Programs { provider } => {
            serde_json::to_string_pretty(&store.list_program_information(provider)?)?
        }
        Commands::Sections { provider } => {
            serde_json::to_string_pretty(&store.list_section_information(provider)?)?
        }
        Commands::Helpers { provider: Some(provider) } => {
            serde_json::to_string_pretty(&store.list_helper_prototypes(provider)?)?
        }
        Commands::Helpers { provider: None } => {
            serde_json::to_string_pretty(&store.list_global_helpers()?)?
        }
        Commands::Config => serde_json::to_string_pretty(config)?,
    };
    Ok(output)
}

fn exit_code(e: &StoreError) -> i32 {
    match e {
        StoreError::InvalidIdentifier { .. } | StoreError::MalformedRecord { .. } => 1,
        StoreError::KeyAccessFailure { .. } | StoreError::UnderlyingServiceFailure { .. } => 3,
    }
}
