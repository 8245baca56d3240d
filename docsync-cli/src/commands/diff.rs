//! `docsync diff <source> <target>`: what `sync` would insert or change.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use docsync_sync::DriftReport;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use crate::commands::selection::SelectionArgs;
use crate::runtime::{block_on, engine, load_config};

/// Ids listed per category before the rest are elided.
const ID_PREVIEW: usize = 10;

/// Arguments for `docsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Emit the drift report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl DiffArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let app = load_config(config)?;
        let options = self.selection.options()?;
        let SelectionArgs { source, target, .. } = &self.selection;

        let report = block_on(async {
            let engine = engine(&app.store).await?;
            engine
                .diff(source, target, &options)
                .await
                .with_context(|| format!("diff '{source}' -> '{target}' failed"))
        })??;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render drift report")?
            );
            return Ok(());
        }
        print_report(&report);
        Ok(())
    }
}

#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "")]
    marker: String,
    #[tabled(rename = "kind")]
    kind: &'static str,
    #[tabled(rename = "records")]
    count: u64,
    #[tabled(rename = "ids")]
    ids: String,
}

fn print_report(report: &DriftReport) {
    if report.is_clean() {
        println!(
            "{} '{}' and '{}' are in sync ({} records)",
            "✓".green().bold(),
            report.source,
            report.target,
            report.scanned
        );
        return;
    }

    let rows = vec![
        DriftRow {
            marker: "+".green().bold().to_string(),
            kind: "missing",
            count: report.missing.len() as u64,
            ids: preview(&report.missing),
        },
        DriftRow {
            marker: "~".yellow().bold().to_string(),
            kind: "changed",
            count: report.changed.len() as u64,
            ids: preview(&report.changed),
        },
        DriftRow {
            marker: "·".bright_black().to_string(),
            kind: "unchanged",
            count: report.unchanged,
            ids: String::new(),
        },
    ];
    println!("{} -> {}", report.source.bold(), report.target.bold());
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn preview(ids: &[Value]) -> String {
    let mut shown: Vec<String> = ids.iter().take(ID_PREVIEW).map(render_id).collect();
    if ids.len() > ID_PREVIEW {
        shown.push(format!("… {} more", ids.len() - ID_PREVIEW));
    }
    shown.join(", ")
}

fn render_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
