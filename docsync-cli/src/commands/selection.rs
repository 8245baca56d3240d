//! Collection selection flags shared by `sync` and `diff`.

use anyhow::{bail, Context, Result};
use clap::Args;
use docsync_core::types::Document;
use docsync_store::SortKey;
use docsync_sync::{FieldSelection, IdStrategy, StreamOptions, SyncOptions, UpsertOptions};
use serde_json::Value;

#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// Collection to read from.
    pub source: String,

    /// Collection to upsert into.
    pub target: String,

    /// Source filter as a JSON object, e.g. '{"status": "active"}'.
    #[arg(long, value_name = "JSON")]
    pub filter: Option<String>,

    /// Sort key `field` or `field:desc`; repeatable. Defaults to utime, _id.
    #[arg(long = "sort", value_name = "FIELD[:desc]")]
    pub sort: Vec<String>,

    /// Build `_id` by concatenating these record fields; repeatable.
    #[arg(long = "id-field", value_name = "FIELD")]
    pub id_fields: Vec<String>,

    /// Fingerprint only these fields; repeatable. Defaults to all fields.
    #[arg(long = "field", value_name = "FIELD")]
    pub fields: Vec<String>,

    /// Documents per source batch.
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,

    /// Operations per bulk write.
    #[arg(long, default_value_t = 500)]
    pub write_batch_size: usize,
}

impl SelectionArgs {
    pub fn options(&self) -> Result<SyncOptions> {
        let mut stream = StreamOptions::default().with_batch_size(self.batch_size);
        if let Some(raw) = &self.filter {
            stream = stream.with_filter(parse_filter(raw)?);
        }
        if !self.sort.is_empty() {
            let keys = self
                .sort
                .iter()
                .map(|raw| parse_sort(raw))
                .collect::<Result<Vec<_>>>()?;
            stream = stream.with_sort(keys);
        }

        let id = if self.id_fields.is_empty() {
            IdStrategy::Native
        } else {
            IdStrategy::Composite(self.id_fields.clone())
        };
        let fields = if self.fields.is_empty() {
            FieldSelection::All
        } else {
            FieldSelection::Only(self.fields.clone())
        };

        Ok(SyncOptions {
            stream,
            upsert: UpsertOptions {
                id,
                fields,
                write_batch_size: self.write_batch_size,
            },
        })
    }
}

fn parse_filter(raw: &str) -> Result<Document> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("--filter is not valid JSON: {raw}"))?;
    match value {
        Value::Object(filter) => Ok(filter),
        other => bail!("--filter must be a JSON object, got {other}"),
    }
}

fn parse_sort(raw: &str) -> Result<SortKey> {
    let (field, direction) = raw.split_once(':').unwrap_or((raw, "asc"));
    if field.is_empty() {
        bail!("--sort needs a field name, got '{raw}'");
    }
    match direction.to_ascii_lowercase().as_str() {
        "asc" | "1" => Ok(SortKey::asc(field)),
        "desc" | "-1" => Ok(SortKey::desc(field)),
        other => bail!("unknown sort direction '{other}' in '{raw}'; expected asc or desc"),
    }
}
