//! `docsync sync <source> <target>`: stream a collection into another.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use docsync_sync::SyncReport;

use crate::commands::selection::SelectionArgs;
use crate::runtime::{block_on, engine, load_config};

/// Arguments for `docsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let app = load_config(config)?;
        let options = self.selection.options()?;
        let SelectionArgs { source, target, .. } = &self.selection;

        let report = block_on(async {
            let engine = engine(&app.store).await?;
            engine
                .sync_collection(source, target, &options)
                .await
                .with_context(|| format!("sync '{source}' -> '{target}' failed"))
        })??;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render sync report")?
            );
            return Ok(());
        }
        print_report(source, target, &report);
        Ok(())
    }
}

fn print_report(source: &str, target: &str, report: &SyncReport) {
    let unchanged = report.matched.saturating_sub(report.modified);
    println!(
        "{} '{source}' -> '{target}': {} records ({} inserted, {} changed, {} unchanged) in {} bulk writes",
        "✓".green().bold(),
        report.records,
        report.upserted.to_string().green(),
        report.modified.to_string().yellow(),
        unchanged.to_string().bright_black(),
        report.batches,
    );
    if report.retries > 0 {
        println!(
            "  {} {} bulk write(s) needed a resubmission",
            "!".yellow().bold(),
            report.retries
        );
    }
}
