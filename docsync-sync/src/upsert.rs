//! Hashed upserts: one expression-gated update per record.
//!
//! The update is a single `$set` pipeline stage. Every expression in a stage
//! reads the document as it was before the stage, so the `doc_hash`
//! comparison always sees the stored hash:
//!
//! - `doc_hash` takes the new fingerprint
//! - `utime` keeps its stored value when the hash is unchanged, else `now`
//! - `ctime` keeps its stored value, or `now` on insert

use docsync_core::types::{
    is_reserved_field, Document, Fingerprint, CTIME_FIELD, DOC_HASH_FIELD, ID_FIELD,
    TIMESTAMP_FORMAT, UTIME_FIELD,
};
use docsync_store::{UpdatePipeline, WriteModel};
use serde_json::{json, Value};

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of `utime` / `ctime` stamps.
pub trait Clock: Send + Sync {
    /// Current local time formatted as `%Y-%m-%d %H:%M:%S`.
    fn now(&self) -> String;
}

/// Wall clock in the local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// How the stored `_id` of a record is derived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdStrategy {
    /// Use the record's own `_id`.
    #[default]
    Native,
    /// Concatenate the text of these fields, in order, with no separator.
    Composite(Vec<String>),
}

/// The `_id` for `record`, the `index`-th record of its call.
pub fn record_id(record: &Document, index: usize, strategy: &IdStrategy) -> Result<Value, SyncError> {
    match strategy {
        IdStrategy::Native => match record.get(ID_FIELD) {
            None | Some(Value::Null) => Err(SyncError::MissingIdField {
                field: ID_FIELD.to_string(),
                index,
            }),
            Some(Value::Array(_)) => Err(SyncError::InvalidIdField {
                field: ID_FIELD.to_string(),
                index,
            }),
            Some(id) => Ok(id.clone()),
        },
        IdStrategy::Composite(fields) => {
            if fields.is_empty() {
                return Err(SyncError::InvalidOption(
                    "composite id needs at least one field".into(),
                ));
            }
            let mut id = String::new();
            for field in fields {
                match record.get(field) {
                    None | Some(Value::Null) => {
                        return Err(SyncError::MissingIdField {
                            field: field.clone(),
                            index,
                        })
                    }
                    Some(Value::String(s)) => id.push_str(s),
                    Some(v @ (Value::Number(_) | Value::Bool(_))) => id.push_str(&v.to_string()),
                    Some(_) => {
                        return Err(SyncError::InvalidIdField {
                            field: field.clone(),
                            index,
                        })
                    }
                }
            }
            Ok(Value::String(id))
        }
    }
}

// ---------------------------------------------------------------------------
// Write models
// ---------------------------------------------------------------------------

/// Build the conditional upsert of `record` under `id`.
///
/// `_id` and bookkeeping fields of the record are never copied; values are
/// wrapped in `$literal` so strings starting with `$` stay data.
pub fn build_upsert(id: Value, record: &Document, hash: &Fingerprint, now: &str) -> WriteModel {
    let mut set = Document::new();
    for (field, value) in record {
        if is_reserved_field(field) {
            continue;
        }
        set.insert(field.clone(), json!({ "$literal": value }));
    }

    let hash = hash.as_str();
    set.insert(DOC_HASH_FIELD.into(), json!({ "$literal": hash }));
    set.insert(
        UTIME_FIELD.into(),
        json!({ "$cond": [
            { "$eq": [format!("${DOC_HASH_FIELD}"), { "$literal": hash }] },
            { "$ifNull": [format!("${UTIME_FIELD}"), { "$literal": now }] },
            { "$literal": now }
        ]}),
    );
    set.insert(
        CTIME_FIELD.into(),
        json!({ "$ifNull": [format!("${CTIME_FIELD}"), { "$literal": now }] }),
    );

    let mut filter = Document::new();
    filter.insert(ID_FIELD.into(), id);
    let mut stage = Document::new();
    stage.insert("$set".into(), Value::Object(set));

    WriteModel::UpdateOne {
        filter,
        update: UpdatePipeline(vec![stage]),
        upsert: true,
    }
}

/// Build one upsert per record, failing on the first bad identifier.
///
/// `first_index` is the position of `records[0]` within the caller's input.
pub fn build_upserts(
    records: &[Document],
    hashes: &[Fingerprint],
    strategy: &IdStrategy,
    now: &str,
    first_index: usize,
) -> Result<Vec<WriteModel>, SyncError> {
    records
        .iter()
        .zip(hashes)
        .enumerate()
        .map(|(offset, (record, hash))| {
            let id = record_id(record, first_index + offset, strategy)?;
            Ok(build_upsert(id, record, hash, now))
        })
        .collect()
}
