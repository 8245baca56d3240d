//! `docsync schema <collection> <file>`: install a `$jsonSchema` validator.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use docsync_store::ValidatorOutcome;
use docsync_sync::parse_validator;

use crate::runtime::{block_on, engine, load_config};

/// Arguments for `docsync schema`.
#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Collection to validate.
    pub collection: String,

    /// JSON file holding `{"$jsonSchema": {...}}` or a bare schema.
    pub file: PathBuf,
}

impl SchemaArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let text = fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;
        let validator = parse_validator(&text)
            .with_context(|| format!("{} is not a usable validator", self.file.display()))?;
        let app = load_config(config)?;

        let collection = &self.collection;
        let outcome = block_on(async {
            let engine = engine(&app.store).await?;
            engine
                .apply_validator(collection, &validator)
                .await
                .with_context(|| format!("failed to apply validator to '{collection}'"))
        })??;

        let verb = match outcome {
            ValidatorOutcome::Created => "created".green(),
            ValidatorOutcome::Updated => "updated".yellow(),
        };
        println!(
            "{} '{collection}' {verb} with strict validation",
            "✓".green().bold()
        );
        Ok(())
    }
}
