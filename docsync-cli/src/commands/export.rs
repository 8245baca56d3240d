//! `docsync export <sql>`: read-only query through the SSH tunnel.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use docsync_export::{SqlExporter, Table};
use tabled::{builder::Builder, settings::Style};

use crate::runtime::{block_on, load_config};

/// Arguments for `docsync export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// A single SELECT, SHOW, DESCRIBE, EXPLAIN or WITH statement.
    pub sql: String,

    /// Emit rows as a JSON array of objects.
    #[arg(long)]
    pub json: bool,
}

impl ExportArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let app = load_config(config)?;
        let tunnel = app
            .export
            .context("config has no `export` section (ssh and database settings)")?;

        let exporter = SqlExporter::new(tunnel);
        let table = block_on(exporter.query(&self.sql))?.context("export query failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&table.records())
                    .context("failed to render rows as JSON")?
            );
            return Ok(());
        }
        print_table(&table);
        Ok(())
    }
}

fn print_table(table: &Table) {
    if table.columns.is_empty() {
        println!("{}", "statement returned no result set".bright_black());
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(table.columns.iter().cloned());
    for row in &table.rows {
        builder.push_record(row.iter().map(ToString::to_string));
    }
    let mut rendered = builder.build();
    rendered.with(Style::rounded());
    println!("{rendered}");
    println!("{} row(s)", table.rows.len());
}
