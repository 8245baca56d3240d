//! `docsync ping`: connectivity check.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use docsync_archive::redact_uri;

use crate::runtime::{block_on, connect, load_config};

/// Arguments for `docsync ping`.
#[derive(Args, Debug)]
pub struct PingArgs {
    /// Also list the collections of the configured database.
    #[arg(long)]
    pub collections: bool,
}

impl PingArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let app = load_config(config)?;
        let store_config = &app.store;

        let (elapsed, collections) = block_on(async {
            let store = connect(store_config).await?;
            let started = Instant::now();
            store.ping().await.context("store did not answer ping")?;
            let elapsed = started.elapsed();
            let collections = if self.collections {
                let mut names = store
                    .list_collections(&store_config.database)
                    .await
                    .context("failed to list collections")?;
                names.sort();
                names
            } else {
                Vec::new()
            };
            anyhow::Ok((elapsed, collections))
        })??;

        println!(
            "{} {} ({}) answered in {} ms",
            "✓".green().bold(),
            redact_uri(&store_config.uri),
            store_config.database,
            elapsed.as_millis()
        );
        for name in collections {
            println!("  ·  {name}");
        }
        Ok(())
    }
}
