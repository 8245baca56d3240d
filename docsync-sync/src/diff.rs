//! Drift check for `docsync diff`.
//!
//! Compares source fingerprints with the `doc_hash` stored in the target.
//! Nothing is written.

use std::collections::HashMap;

use docsync_core::types::{Document, DOC_HASH_FIELD, ID_FIELD};
use docsync_store::SortKey;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::cursor::{CursorReader, StreamOptions};
use crate::error::SyncError;
use crate::fingerprint::fingerprint_batch;
use crate::pipeline::{SyncEngine, SyncOptions};
use crate::upsert::record_id;

/// Per-record classification of a pending sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriftReport {
    pub source: String,
    pub target: String,
    /// Source records examined.
    pub scanned: u64,
    /// Ids absent from the target.
    pub missing: Vec<Value>,
    /// Ids whose stored hash differs from the source fingerprint.
    pub changed: Vec<Value>,
    pub unchanged: u64,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.changed.is_empty()
    }
}

pub(crate) async fn drift(
    engine: &SyncEngine,
    source: &str,
    target: &str,
    options: &SyncOptions,
) -> Result<DriftReport, SyncError> {
    let target_handle = engine.connector().resource(target).await?;
    let mut reader = engine.stream(source, options.stream.clone()).await?;
    let mut report = DriftReport {
        source: source.to_string(),
        target: target.to_string(),
        ..DriftReport::default()
    };

    let mut index = 0;
    while let Some(batch) = reader.next_batch().await? {
        let (records, hashes) = fingerprint_batch(batch, options.upsert.fields.clone()).await?;
        let ids = records
            .iter()
            .enumerate()
            .map(|(offset, record)| record_id(record, index + offset, &options.upsert.id))
            .collect::<Result<Vec<_>, _>>()?;
        index += records.len();

        let mut lookup = StreamOptions::default()
            .with_filter(in_filter(&ids))
            .with_sort(vec![SortKey::asc(ID_FIELD)]);
        lookup.projection = Some(projection());
        lookup.batch_size = options.stream.batch_size;
        let stored = CursorReader::new(target_handle.clone(), lookup)?
            .collect_all()
            .await?;
        let stored: HashMap<String, Option<String>> = stored
            .iter()
            .filter_map(|doc| {
                let id = doc.get(ID_FIELD)?;
                let hash = doc
                    .get(DOC_HASH_FIELD)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some((id_key(id), hash))
            })
            .collect();

        for (id, hash) in ids.into_iter().zip(hashes) {
            report.scanned += 1;
            match stored.get(&id_key(&id)) {
                None => report.missing.push(id),
                Some(Some(existing)) if existing == hash.as_str() => report.unchanged += 1,
                Some(_) => report.changed.push(id),
            }
        }
    }

    info!(
        source,
        target,
        scanned = report.scanned,
        missing = report.missing.len(),
        changed = report.changed.len(),
        "drift check finished"
    );
    Ok(report)
}

fn in_filter(ids: &[Value]) -> Document {
    let mut filter = Document::new();
    filter.insert(ID_FIELD.into(), json!({ "$in": ids }));
    filter
}

fn projection() -> Document {
    let mut projection = Document::new();
    projection.insert(DOC_HASH_FIELD.into(), json!(1));
    projection
}

fn id_key(id: &Value) -> String {
    id.to_string()
}
