//! binvault CLI
//!
//! Operator command-line interface for the binvault local state layer:
//! inspect and edit cached collections, manage attachments, sync with the
//! remote service and run integrity maintenance.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use binvault_core::{Collection, Config, Store};

mod commands;
mod output;

use output::{Output, OutputFormat};

/// Default entity field holding attachment ids
const DEFAULT_ATTACHMENT_FIELD: &str = "attachments";

#[derive(Parser)]
#[command(name = "binvault")]
#[command(about = "binvault - durable local state for donation logistics")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file to use instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show storage usage, sync mode and integrity
    Status,
    /// Read and edit cached collections
    Collection {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// Attach a file to an entity
    Attach {
        /// Collection (drivers, bins, containers, bales, pickup_requests)
        collection: Collection,
        /// Entity id
        id: String,
        /// File to attach
        file: PathBuf,
        /// Entity field holding attachment ids
        #[arg(long, default_value = DEFAULT_ATTACHMENT_FIELD)]
        field: String,
    },
    /// List an entity's attachments
    Attachments {
        collection: Collection,
        id: String,
        /// Write each attachment into this directory
        #[arg(long, value_name = "DIR")]
        save_to: Option<PathBuf>,
    },
    /// Remove an attachment from an entity
    Detach {
        collection: Collection,
        id: String,
        /// Attachment (blob) id
        blob_id: String,
        #[arg(long, default_value = DEFAULT_ATTACHMENT_FIELD)]
        field: String,
    },
    /// Rebuild attachment id lists from the blob store
    Repair {
        collection: Collection,
        #[arg(long, default_value = DEFAULT_ATTACHMENT_FIELD)]
        field: String,
    },
    /// Check whether the remote service is reachable
    Probe,
    /// Push local collections to the remote and replay queued writes
    Sync,
    /// Check that every protected collection is present
    Verify,
    /// Restore missing protected collections from the snapshot
    Recover,
    /// Export all cached collections as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Remove every cached record
    Clear {
        /// Confirm the clear
        #[arg(long)]
        yes: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum CollectionCommands {
    /// Print a collection
    #[command(alias = "ls")]
    Get { collection: Collection },
    /// Replace a collection with a JSON array
    Set {
        collection: Collection,
        /// File holding the array (stdin when omitted)
        file: Option<PathBuf>,
    },
    /// Add an entity (JSON object)
    #[command(alias = "create")]
    Add { collection: Collection, json: String },
    /// Merge a JSON object into an entity
    #[command(alias = "edit")]
    Update {
        collection: Collection,
        id: String,
        json: String,
    },
    /// Remove an entity and its attachments
    #[command(alias = "rm")]
    Remove { collection: Collection, id: String },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, remote_url, remote_enabled, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_deref(), &output);
    }

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config);
    let store = Store::open_with_config(config).context("Failed to open store")?;

    match cli.command {
        Commands::Status => commands::status::show(&store, &output).await,
        Commands::Collection { command } => {
            handle_collection_command(command, &store, &output).await
        }
        Commands::Attach {
            collection,
            id,
            file,
            field,
        } => commands::attachment::attach(&store, collection, &id, &file, &field, &output).await,
        Commands::Attachments {
            collection,
            id,
            save_to,
        } => commands::attachment::list(&store, collection, &id, save_to.as_deref(), &output).await,
        Commands::Detach {
            collection,
            id,
            blob_id,
            field,
        } => commands::attachment::detach(&store, collection, &id, &blob_id, &field, &output).await,
        Commands::Repair { collection, field } => {
            commands::attachment::repair(&store, collection, &field, &output).await
        }
        Commands::Probe => commands::sync::probe(&store, &output).await,
        Commands::Sync => commands::sync::sync(&store, &output).await,
        Commands::Verify => commands::maintenance::verify(&store, &output).await,
        Commands::Recover => commands::maintenance::recover(&store, &output).await,
        Commands::Export { output: path } => {
            commands::maintenance::export(&store, path.as_deref(), &output).await
        }
        Commands::Clear { yes } => commands::maintenance::clear(&store, yes, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

async fn handle_collection_command(
    command: CollectionCommands,
    store: &Store,
    output: &Output,
) -> Result<()> {
    match command {
        CollectionCommands::Get { collection } => {
            commands::collection::get(store, collection, output).await
        }
        CollectionCommands::Set { collection, file } => {
            commands::collection::set(store, collection, file.as_deref(), output).await
        }
        CollectionCommands::Add { collection, json } => {
            commands::collection::add(store, collection, &json, output).await
        }
        CollectionCommands::Update {
            collection,
            id,
            json,
        } => commands::collection::update(store, collection, &id, &json, output).await,
        CollectionCommands::Remove { collection, id } => {
            commands::collection::remove(store, collection, &id, output).await
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&Path>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(&key, &value, config_path, output)
        }
    }
}

/// Load from `--config` when given, otherwise the default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")
}

/// Log to stderr, filtered by BINVAULT_LOG or the configured level
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_env("BINVAULT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "binvault_core={},binvault_cli={}",
            config.log_level, config.log_level
        ))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}
