//! Request and response shapes of the store protocol.

use docsync_core::types::{Document, ID_FIELD, UTIME_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Direction of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Wire value: `1` or `-1`.
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// One `(field, direction)` pair of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// A find request.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Vec<SortKey>,
    /// Server-side fetch size hint.
    pub batch_size: u32,
}

impl FindQuery {
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            projection: None,
            sort: Vec::new(),
            batch_size: 1000,
        }
    }

    /// Default stream order: `utime` ascending, `_id` ascending as tie-break.
    pub fn default_sort() -> Vec<SortKey> {
        vec![SortKey::asc(UTIME_FIELD), SortKey::asc(ID_FIELD)]
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sort specification as a wire document (`{field: 1 | -1, ...}`).
    pub fn sort_document(&self) -> Document {
        self.sort
            .iter()
            .map(|k| (k.field.clone(), Value::from(k.direction.as_i32())))
            .collect::<Map<String, Value>>()
    }
}

/// Aggregation-pipeline update: a list of `$set` / `$unset` stages.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePipeline(pub Vec<Document>);

/// One operation of an unordered bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    UpdateOne {
        filter: Document,
        update: UpdatePipeline,
        upsert: bool,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

impl WriteModel {
    /// Target filter of the operation, used in failure diagnostics.
    pub fn filter(&self) -> &Document {
        match self {
            WriteModel::UpdateOne { filter, .. }
            | WriteModel::DeleteOne { filter }
            | WriteModel::DeleteMany { filter } => filter,
        }
    }
}

/// Counters of a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkWriteOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
    pub deleted: u64,
}

impl BulkWriteOutcome {
    pub fn absorb(&mut self, other: &BulkWriteOutcome) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.upserted += other.upserted;
        self.deleted += other.deleted;
    }
}

/// What installing a collection validator did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorOutcome {
    /// The collection did not exist and was created with the validator.
    Created,
    /// The existing collection's validator was replaced.
    Updated,
}
