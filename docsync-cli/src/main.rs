//! docsync: incremental document-store sync CLI.
//!
//! # Usage
//!
//! ```text
//! docsync ping
//! docsync sync <source> <target> [--filter JSON] [--sort F[:desc]]... [--id-field F]... [--field F]...
//! docsync diff <source> <target> [same selection flags] [--json]
//! docsync transfer <archive|restore> [collection] [--keep-source]
//! docsync export <sql> [--json]
//! docsync schema <collection> <file>
//! ```
//!
//! Every command reads `~/.docsync/config.yaml` unless `--config` is given.

mod commands;
mod runtime;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    diff::DiffArgs, export::ExportArgs, ping::PingArgs, schema::SchemaArgs, sync::SyncArgs,
    transfer::TransferArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "docsync",
    version,
    about = "Fingerprint-gated incremental sync between document-store collections",
    long_about = None,
)]
struct Cli {
    /// Config file to use instead of ~/.docsync/config.yaml.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the document store is reachable.
    Ping(PingArgs),

    /// Stream one collection into another with hashed upserts.
    Sync(SyncArgs),

    /// Show what `sync` would insert or change, without writing.
    Diff(DiffArgs),

    /// Move a collection between the primary and archive databases.
    Transfer(TransferArgs),

    /// Run a read-only SQL query through the configured SSH tunnel.
    Export(ExportArgs),

    /// Install a `$jsonSchema` validator on a collection.
    Schema(SchemaArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    runtime::init_tracing();
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Ping(args) => args.run(config),
        Commands::Sync(args) => args.run(config),
        Commands::Diff(args) => args.run(config),
        Commands::Transfer(args) => args.run(config),
        Commands::Export(args) => args.run(config),
        Commands::Schema(args) => args.run(config),
    }
}
