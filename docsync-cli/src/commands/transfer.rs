//! `docsync transfer <archive|restore> [collection]`: move a collection
//! between the primary and archive databases with the dump/restore tools.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Select};
use docsync_archive::{transfer_collection, Direction, TransferPlan};
use docsync_core::config::{ArchiveConfig, StoreConfig};
use docsync_core::types::{CollectionName, Namespace};
use docsync_store::DocumentStore;

use crate::runtime::{block_on, connect, load_config};

/// Arguments for `docsync transfer`.
#[derive(Args, Debug)]
pub struct TransferArgs {
    /// `archive` (primary -> archive) or `restore` (archive -> primary).
    #[arg(value_parser = parse_direction)]
    pub direction: Direction,

    /// Collection to move; pick from a menu when omitted.
    pub collection: Option<String>,

    /// Keep the source collection after a successful transfer.
    #[arg(long)]
    pub keep_source: bool,
}

fn parse_direction(raw: &str) -> Result<Direction, String> {
    raw.parse().map_err(|e: docsync_archive::ArchiveError| e.to_string())
}

impl TransferArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let app = load_config(config)?;
        let archive = app
            .archive
            .context("config has no `archive` section (primary and archive databases)")?;
        let (from, _) = self.direction.databases(&archive);
        let source_config = StoreConfig {
            uri: archive.uri.clone(),
            database: from.to_string(),
            ..app.store.clone()
        };

        block_on(self.execute(archive, source_config))?
    }

    async fn execute(self, archive: ArchiveConfig, source_config: StoreConfig) -> Result<()> {
        let store = connect(&source_config).await?;
        let collection = match self.collection {
            Some(name) => name,
            None => match pick_collection(&store, &source_config.database).await? {
                Some(name) => name,
                None => {
                    println!("Cancelled");
                    return Ok(());
                }
            },
        };

        let plan = TransferPlan::new(&archive, self.direction, collection)?;
        let (dump, restore) = plan.describe();
        println!("{} {dump}", "dump:   ".bright_black());
        println!("{} {restore}", "restore:".bright_black());

        let job = plan.clone();
        tokio::task::spawn_blocking(move || transfer_collection(&job))
            .await
            .context("transfer task did not complete")?
            .with_context(|| format!("transfer of '{}' failed", plan.collection))?;
        println!(
            "{} '{}' -> '{}'",
            "✓".green().bold(),
            plan.source_namespace(),
            plan.target_namespace()
        );

        if !self.keep_source {
            let source = Namespace::new(plan.from_database.clone(), plan.collection.as_str());
            store
                .drop_collection(&source)
                .await
                .with_context(|| format!("failed to drop '{source}' after transfer"))?;
            println!("  dropped '{source}'");
        }
        Ok(())
    }
}

async fn pick_collection(store: &Arc<dyn DocumentStore>, database: &str) -> Result<Option<String>> {
    let mut names: Vec<CollectionName> = store
        .list_collections(database)
        .await
        .with_context(|| format!("failed to list collections of '{database}'"))?;
    if names.is_empty() {
        println!("'{database}' has no collections");
        return Ok(None);
    }
    names.sort();
    let names: Vec<String> = names.into_iter().map(|n| n.0).collect();
    let prompt = format!("Collection to transfer from '{database}' (Esc to cancel)");

    let choice = tokio::task::spawn_blocking(move || {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(&names)
            .default(0)
            .interact_opt()
            .map(|picked| picked.map(|i| names[i].clone()))
    })
    .await
    .context("collection menu did not complete")?
    .context("collection menu failed")?;
    Ok(choice)
}
