//! Resumable cursor reader.
//!
//! Streams a query's results in fixed-size batches. A lost connection is
//! survived once per stream: the broken cursor is closed, the reader pauses,
//! and a fresh cursor resumes strictly after the last document consumed, so
//! the combined output has no gaps and no duplicates.
//!
//! ```text
//! Scanning ──disconnect──▶ Recovering ──reopened──▶ Scanning
//!    │                         │
//!    ├──end──▶ Exhausted       └──error──▶ Failed
//!    └──fatal / second disconnect──▶ Failed
//! ```

use docsync_core::types::{Document, ID_FIELD};
use docsync_store::query::get_path;
use docsync_store::{FindQuery, SortDirection, SortKey, StoreError};
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::connector::{exhausted, CollectionHandle, PooledCursor};
use crate::error::SyncError;
use crate::flush::is_transient;

/// One emitted batch.
pub type Batch = Vec<Document>;

/// Query shape of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    pub filter: Document,
    pub projection: Option<Document>,
    /// Empty means `utime` ascending, then `_id` ascending.
    pub sort: Vec<SortKey>,
    pub batch_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            filter: Document::new(),
            projection: None,
            sort: Vec::new(),
            batch_size: 1000,
        }
    }
}

impl StreamOptions {
    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Scanning,
    Recovering,
    Exhausted,
    Failed,
}

/// Classified outcome of one cursor read.
enum Fetch {
    Document(Document),
    End,
    Transient(StoreError),
    Fatal(SyncError),
}

/// Lazily-opened, single-pass batch reader over one collection.
pub struct CursorReader {
    handle: CollectionHandle,
    filter: Document,
    projection: Option<Document>,
    /// Paths added to the projection only to track the resume position.
    hidden: Vec<HiddenPath>,
    sort: Vec<SortKey>,
    batch_size: usize,
    cursor: Option<PooledCursor>,
    buffer: Batch,
    last_position: Option<Vec<Value>>,
    state: ReaderState,
    recovered: bool,
    emitted: usize,
}

impl CursorReader {
    pub fn new(handle: CollectionHandle, options: StreamOptions) -> Result<Self, SyncError> {
        if options.batch_size == 0 {
            return Err(SyncError::InvalidOption("batch_size must be at least 1".into()));
        }
        let sort = total_order(options.sort);
        let (projection, hidden) = match options.projection {
            Some(p) => {
                let (p, hidden) = widen_projection(p, &sort);
                (Some(p), hidden)
            }
            None => (None, Vec::new()),
        };
        Ok(Self {
            handle,
            filter: options.filter,
            projection,
            hidden,
            sort,
            batch_size: options.batch_size,
            cursor: None,
            buffer: Vec::new(),
            last_position: None,
            state: ReaderState::Scanning,
            recovered: false,
            emitted: 0,
        })
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Next batch in sort order, `Ok(None)` once the stream has ended.
    ///
    /// After an error the reader stays failed and returns `Ok(None)`.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, SyncError> {
        loop {
            match self.state {
                ReaderState::Exhausted | ReaderState::Failed => return Ok(None),
                ReaderState::Recovering => {
                    if let Err(e) = self.recover().await {
                        return Err(self.fail(e).await);
                    }
                }
                ReaderState::Scanning => match self.fetch().await {
                    Fetch::Document(doc) => {
                        self.accept(doc);
                        if self.buffer.len() >= self.batch_size {
                            return Ok(Some(self.emit()));
                        }
                    }
                    Fetch::End => {
                        self.close_cursor().await;
                        self.state = ReaderState::Exhausted;
                        info!(
                            collection = %self.handle.namespace(),
                            documents = self.emitted + self.buffer.len(),
                            "stream exhausted"
                        );
                        if self.buffer.is_empty() {
                            return Ok(None);
                        }
                        return Ok(Some(self.emit()));
                    }
                    Fetch::Transient(e) if !self.recovered => {
                        warn!(
                            collection = %self.handle.namespace(),
                            error = %e,
                            after = self.emitted + self.buffer.len(),
                            "cursor lost its connection, resuming once"
                        );
                        self.state = ReaderState::Recovering;
                    }
                    Fetch::Transient(e) => {
                        let err = exhausted(self.handle.namespace(), e);
                        return Err(self.fail(err).await);
                    }
                    Fetch::Fatal(e) => return Err(self.fail(e).await),
                },
            }
        }
    }

    /// Drain every remaining batch into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<Document>, SyncError> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            all.extend(batch);
        }
        Ok(all)
    }

    /// The reader as a stream of batches; ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch, SyncError>> {
        stream::unfold(self, |mut reader| async move {
            match reader.next_batch().await {
                Ok(Some(batch)) => Some((Ok(batch), reader)),
                Ok(None) => None,
                Err(e) => Some((Err(e), reader)),
            }
        })
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    async fn fetch(&mut self) -> Fetch {
        if self.cursor.is_none() {
            match self.open().await {
                Ok(cursor) => self.cursor = Some(cursor),
                Err(e) => return classify(e),
            }
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Fetch::End;
        };
        match cursor.next().await {
            Ok(Some(doc)) => Fetch::Document(doc),
            Ok(None) => Fetch::End,
            Err(e) => classify(e),
        }
    }

    async fn open(&mut self) -> Result<PooledCursor, SyncError> {
        let query = self.query();
        debug!(collection = %self.handle.namespace(), filter = ?query.filter, "opening cursor");
        self.handle.open_cursor(&query).await
    }

    /// The query for the next cursor: the caller's filter, narrowed to the
    /// documents after the last accepted one.
    fn query(&self) -> FindQuery {
        let filter = match &self.last_position {
            Some(position) => conjoin(&self.filter, resume_filter(&self.sort, position)),
            None => self.filter.clone(),
        };
        let mut query = FindQuery::new(filter)
            .with_sort(self.sort.clone())
            .with_batch_size(self.batch_size.min(u32::MAX as usize) as u32);
        query.projection = self.projection.clone();
        query
    }

    async fn recover(&mut self) -> Result<(), SyncError> {
        self.close_cursor().await;
        tokio::time::sleep(self.handle.backoff()).await;
        self.recovered = true;
        match self.open().await {
            Ok(cursor) => {
                self.cursor = Some(cursor);
                self.state = ReaderState::Scanning;
                info!(collection = %self.handle.namespace(), "cursor resumed");
                Ok(())
            }
            Err(SyncError::Store(e)) => Err(exhausted(self.handle.namespace(), e)),
            Err(e) => Err(e),
        }
    }

    fn accept(&mut self, mut doc: Document) {
        self.last_position = Some(
            self.sort
                .iter()
                .map(|key| get_path(&doc, &key.field).cloned().unwrap_or(Value::Null))
                .collect(),
        );
        for hidden in &self.hidden {
            strip_path(&mut doc, &hidden.path, hidden.prune);
        }
        self.buffer.push(doc);
    }

    fn emit(&mut self) -> Batch {
        let batch = std::mem::take(&mut self.buffer);
        self.emitted += batch.len();
        debug!(collection = %self.handle.namespace(), size = batch.len(), "batch ready");
        batch
    }

    async fn fail(&mut self, err: SyncError) -> SyncError {
        self.close_cursor().await;
        self.buffer.clear();
        self.state = ReaderState::Failed;
        err
    }

    async fn close_cursor(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.close().await;
        }
    }
}

fn classify(err: SyncError) -> Fetch {
    match err {
        SyncError::Store(e) if is_transient(&e) => Fetch::Transient(e),
        other => Fetch::Fatal(other),
    }
}

// ---------------------------------------------------------------------------
// Keyset resume
// ---------------------------------------------------------------------------

/// Append `_id` ascending unless the sort already names it; an empty sort
/// becomes `utime`, `_id`.
fn total_order(sort: Vec<SortKey>) -> Vec<SortKey> {
    let mut sort = if sort.is_empty() {
        FindQuery::default_sort()
    } else {
        sort
    };
    if !sort.iter().any(|k| k.field == ID_FIELD) {
        sort.push(SortKey::asc(ID_FIELD));
    }
    sort
}

fn is_included(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => true,
    }
}

/// A projection path fetched only for resume tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HiddenPath {
    path: String,
    /// Drop parent objects the strip leaves empty.
    prune: bool,
}

/// The projection entry deciding whether `field` is returned: the field
/// itself or its closest projected ancestor.
fn covering_entry(projection: &Document, field: &str) -> Option<(String, bool)> {
    let mut path = field;
    loop {
        if let Some(flag) = projection.get(path) {
            return Some((path.to_string(), is_included(flag)));
        }
        path = path.rsplit_once('.')?.0;
    }
}

/// Make sure the projection returns every sort path; returns the paths
/// that were added and must be stripped before emission.
fn widen_projection(mut projection: Document, sort: &[SortKey]) -> (Document, Vec<HiddenPath>) {
    let inclusion = projection
        .iter()
        .any(|(k, v)| k != ID_FIELD && is_included(v));
    let mut hidden = Vec::new();
    for key in sort {
        let field = key.field.as_str();
        let covering = covering_entry(&projection, field);
        let present = match &covering {
            Some((_, included)) => *included,
            None => field == ID_FIELD || !inclusion,
        };
        if present {
            continue;
        }
        if inclusion || field == ID_FIELD {
            let root = field.split('.').next().unwrap_or(field);
            let shares_root = projection
                .keys()
                .any(|k| k == root || k.starts_with(&format!("{root}.")));
            projection.insert(field.to_string(), json!(1));
            hidden.push(HiddenPath {
                path: field.to_string(),
                prune: !shares_root,
            });
        } else if let Some((excluded, _)) = covering {
            projection.remove(&excluded);
            hidden.push(HiddenPath {
                path: excluded,
                prune: false,
            });
        }
    }
    (projection, hidden)
}

/// Remove a dotted `path`; with `prune`, parents left empty go too.
fn strip_path(doc: &mut Document, path: &str, prune: bool) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            let emptied = match doc.get_mut(head) {
                Some(Value::Object(inner)) => {
                    strip_path(inner, rest, prune);
                    inner.is_empty()
                }
                _ => false,
            };
            if prune && emptied {
                doc.remove(head);
            }
        }
    }
}

/// Filter matching documents that sort strictly after `position`.
///
/// For keys `k1..kn` this is the disjunction over `i` of
/// `k1 = p1 and ... and k(i-1) = p(i-1) and ki after pi`.
pub fn resume_filter(sort: &[SortKey], position: &[Value]) -> Document {
    let mut clauses = Vec::new();
    for (i, (key, value)) in sort.iter().zip(position).enumerate() {
        for after in after_conditions(key.direction, value) {
            let mut clause = Document::new();
            for (prefix, prefix_value) in sort.iter().zip(position).take(i) {
                clause.insert(prefix.field.clone(), json!({ "$eq": prefix_value }));
            }
            clause.insert(key.field.clone(), after);
            clauses.push(Value::Object(clause));
        }
    }

    if clauses.len() == 1 {
        if let Some(Value::Object(only)) = clauses.pop() {
            return only;
        }
    }
    let mut filter = Document::new();
    filter.insert("$or".into(), Value::Array(clauses));
    filter
}

/// Sort classes in ascending order, as `$type` aliases. Range operators
/// only compare within one class, so resuming across classes needs these.
const TYPE_CLASSES: &[&[&str]] = &[
    &["null"],
    &["number"],
    &["string", "symbol"],
    &["object"],
    &["array"],
    &["binData"],
    &["objectId"],
    &["bool"],
    &["date"],
    &["timestamp"],
    &["regex"],
];

/// Index into [`TYPE_CLASSES`]; extended-JSON wrappers count as the type
/// they encode.
fn type_class(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 4,
        Value::Bool(_) => 7,
        Value::Object(map) if map.len() == 1 => match map.keys().next().map(String::as_str) {
            Some("$numberInt" | "$numberLong" | "$numberDouble" | "$numberDecimal") => 1,
            Some("$symbol") => 2,
            Some("$binary") => 5,
            Some("$oid") => 6,
            Some("$date") => 8,
            Some("$timestamp") => 9,
            Some("$regularExpression") => 10,
            _ => 3,
        },
        Value::Object(_) => 3,
    }
}

fn type_aliases(classes: &[&[&str]]) -> Value {
    Value::Array(
        classes
            .iter()
            .flat_map(|aliases| aliases.iter().map(|a| json!(a)))
            .collect(),
    )
}

/// Conditions on one key selecting values that sort after `value`: a
/// larger value of the same class, or any value of a class beyond it.
///
/// Null and missing sort lowest, so they follow every value in descending
/// order and precede every value in ascending order.
fn after_conditions(direction: SortDirection, value: &Value) -> Vec<Value> {
    let class = type_class(value);
    match direction {
        SortDirection::Ascending if value.is_null() => vec![json!({ "$ne": null })],
        SortDirection::Ascending => {
            let mut conditions = vec![json!({ "$gt": value })];
            let later = TYPE_CLASSES.get(class + 1..).unwrap_or_default();
            if !later.is_empty() {
                conditions.push(json!({ "$type": type_aliases(later) }));
            }
            conditions
        }
        SortDirection::Descending if value.is_null() => Vec::new(),
        SortDirection::Descending => {
            let mut conditions = vec![json!({ "$lt": value })];
            let earlier = TYPE_CLASSES.get(1..class).unwrap_or_default();
            if !earlier.is_empty() {
                conditions.push(json!({ "$type": type_aliases(earlier) }));
            }
            conditions.push(Value::Null);
            conditions
        }
    }
}

fn conjoin(filter: &Document, extra: Document) -> Document {
    if filter.is_empty() {
        return extra;
    }
    let mut combined = Document::new();
    combined.insert(
        "$and".into(),
        Value::Array(vec![Value::Object(filter.clone()), Value::Object(extra)]),
    );
    combined
}
