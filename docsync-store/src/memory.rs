//! Embedded [`DocumentStore`] backed by in-process collections.
//!
//! Queries and pipeline updates run through [`crate::query`] and
//! [`crate::expr`], so writes behave like the server's for the operators
//! the sync engine emits. Faults can be queued to exercise the engine's
//! recovery paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docsync_core::types::{CollectionName, Document, Namespace, ID_FIELD};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use crate::error::{BulkWriteFailure, StoreError, WriteConcernErrorDetail, WriteErrorDetail};
use crate::expr::apply_pipeline;
use crate::model::{BulkWriteOutcome, FindQuery, UpdatePipeline, ValidatorOutcome, WriteModel};
use crate::query::{compare_values, matches, project, sort_documents};
use crate::store::{DocumentCursor, DocumentStore};

const DUPLICATE_KEY: i32 = 11000;
const IMMUTABLE_FIELD: i32 = 66;
const FAILED_TO_PARSE: i32 = 9;

/// A queued failure for the next `bulk_write` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkFault {
    /// Nothing is applied; the call fails with [`StoreError::Disconnected`].
    Disconnect,
    /// Operations at the given indices fail with the given codes; the rest apply.
    WriteErrors(Vec<(usize, i32)>),
    /// Every operation applies, then a write-concern error is reported.
    WriteConcern(i32),
}

/// Call counters, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub pings: u64,
    pub finds: u64,
    pub bulk_writes: u64,
    pub deletes: u64,
    /// Cursors opened and not yet closed or dropped.
    pub open_cursors: usize,
}

#[derive(Default)]
struct Counters {
    pings: AtomicU64,
    finds: AtomicU64,
    bulk_writes: AtomicU64,
    deletes: AtomicU64,
}

/// In-process document store.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<Namespace, Vec<Document>>>,
    unreachable: AtomicBool,
    read_faults: Mutex<HashMap<CollectionName, VecDeque<usize>>>,
    bulk_faults: Mutex<VecDeque<BulkFault>>,
    delete_faults: AtomicUsize,
    validators: RwLock<BTreeMap<Namespace, Document>>,
    counters: Counters,
    open_cursors: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Seeding and inspection
    // -----------------------------------------------------------------------

    /// Append documents verbatim, creating the collection if needed.
    pub fn insert_many(&self, namespace: &Namespace, docs: impl IntoIterator<Item = Document>) {
        self.collections
            .write()
            .entry(namespace.clone())
            .or_default()
            .extend(docs);
    }

    /// Snapshot of a collection in storage order.
    pub fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        self.collections
            .read()
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// The document whose `_id` equals `id`.
    pub fn get(&self, namespace: &Namespace, id: &Value) -> Option<Document> {
        self.collections.read().get(namespace).and_then(|docs| {
            docs.iter()
                .find(|d| {
                    d.get(ID_FIELD)
                        .map(|v| compare_values(Some(v), Some(id)).is_eq())
                        .unwrap_or(false)
                })
                .cloned()
        })
    }

    /// The validator last installed on `namespace`.
    pub fn validator(&self, namespace: &Namespace) -> Option<Document> {
        self.validators.read().get(namespace).cloned()
    }

    pub fn count(&self, namespace: &Namespace) -> usize {
        self.collections
            .read()
            .get(namespace)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            pings: self.counters.pings.load(Ordering::SeqCst),
            finds: self.counters.finds.load(Ordering::SeqCst),
            bulk_writes: self.counters.bulk_writes.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
            open_cursors: self.open_cursors.load(Ordering::SeqCst),
        }
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    /// While unreachable every call fails with [`StoreError::Disconnected`].
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// The next cursor opened on `collection` yields `after` documents and
    /// then reports a lost connection on every further read.
    pub fn inject_read_disconnect(&self, collection: impl Into<CollectionName>, after: usize) {
        self.read_faults
            .lock()
            .entry(collection.into())
            .or_default()
            .push_back(after);
    }

    /// Queue a failure for the next `bulk_write`.
    pub fn inject_bulk_fault(&self, fault: BulkFault) {
        self.bulk_faults.lock().push_back(fault);
    }

    /// The next `times` delete calls fail with a lost connection.
    pub fn inject_delete_disconnects(&self, times: usize) {
        self.delete_faults.fetch_add(times, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected("server unreachable".into()));
        }
        Ok(())
    }

    fn take_delete_fault(&self) -> bool {
        self.delete_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// Write application
// ---------------------------------------------------------------------------

fn apply_model(
    docs: &mut Vec<Document>,
    model: &WriteModel,
    outcome: &mut BulkWriteOutcome,
) -> Result<(), (i32, String)> {
    let parse = |e: StoreError| (FAILED_TO_PARSE, e.to_string());
    match model {
        WriteModel::UpdateOne {
            filter,
            update,
            upsert,
        } => {
            let mut position = None;
            for (i, doc) in docs.iter().enumerate() {
                if matches(doc, filter).map_err(parse)? {
                    position = Some(i);
                    break;
                }
            }
            match position {
                Some(i) => update_in_place(&mut docs[i], update, outcome),
                None if *upsert => insert_upserted(docs, filter, update, outcome),
                None => Ok(()),
            }
        }
        WriteModel::DeleteOne { filter } => {
            for i in 0..docs.len() {
                if matches(&docs[i], filter).map_err(parse)? {
                    docs.remove(i);
                    outcome.deleted += 1;
                    break;
                }
            }
            Ok(())
        }
        WriteModel::DeleteMany { filter } => {
            let deleted = remove_matching(docs, filter).map_err(parse)?;
            outcome.deleted += deleted;
            Ok(())
        }
    }
}

fn update_in_place(
    doc: &mut Document,
    update: &UpdatePipeline,
    outcome: &mut BulkWriteOutcome,
) -> Result<(), (i32, String)> {
    let updated = apply_pipeline(doc, update).map_err(|e| (FAILED_TO_PARSE, e.to_string()))?;
    if updated.get(ID_FIELD) != doc.get(ID_FIELD) {
        return Err((
            IMMUTABLE_FIELD,
            "the (immutable) field '_id' was found to have been altered".into(),
        ));
    }
    outcome.matched += 1;
    if updated != *doc {
        *doc = updated;
        outcome.modified += 1;
    }
    Ok(())
}

fn insert_upserted(
    docs: &mut Vec<Document>,
    filter: &Document,
    update: &UpdatePipeline,
    outcome: &mut BulkWriteOutcome,
) -> Result<(), (i32, String)> {
    // equality terms of the filter seed the new document
    let seed: Document = filter
        .iter()
        .filter(|(k, v)| !k.starts_with('$') && !k.contains('.') && !is_operator(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let inserted = apply_pipeline(&seed, update).map_err(|e| (FAILED_TO_PARSE, e.to_string()))?;
    let Some(id) = inserted.get(ID_FIELD) else {
        return Err((FAILED_TO_PARSE, "upserted document has no _id".into()));
    };
    let duplicate = docs.iter().any(|d| {
        d.get(ID_FIELD)
            .map(|existing| compare_values(Some(existing), Some(id)).is_eq())
            .unwrap_or(false)
    });
    if duplicate {
        return Err((DUPLICATE_KEY, format!("E11000 duplicate key error: _id {id}")));
    }
    docs.push(inserted);
    outcome.upserted += 1;
    Ok(())
}

fn is_operator(value: &Value) -> bool {
    matches!(value, Value::Object(m) if m.keys().any(|k| k.starts_with('$')))
}

fn remove_matching(docs: &mut Vec<Document>, filter: &Document) -> Result<u64, StoreError> {
    let hits = docs
        .iter()
        .map(|doc| matches(doc, filter))
        .collect::<Result<Vec<_>, _>>()?;
    let mut hits = hits.into_iter();
    let before = docs.len();
    docs.retain(|_| !hits.next().unwrap_or(false));
    Ok((before - docs.len()) as u64)
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct MemoryCursor {
    pending: VecDeque<Document>,
    fail_after: Option<usize>,
    yielded: usize,
    open: Option<Arc<AtomicUsize>>,
}

impl MemoryCursor {
    fn release(&mut self) {
        if let Some(counter) = self.open.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next(&mut self) -> Result<Option<Document>, StoreError> {
        if self.fail_after.is_some_and(|limit| self.yielded >= limit) {
            return Err(StoreError::Disconnected("connection reset by peer".into()));
        }
        let next = self.pending.pop_front();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.counters.pings.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()
    }

    async fn find(
        &self,
        namespace: &Namespace,
        query: &FindQuery,
    ) -> Result<Box<dyn DocumentCursor>, StoreError> {
        self.counters.finds.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let mut selected = Vec::new();
        if let Some(docs) = self.collections.read().get(namespace) {
            for doc in docs {
                if matches(doc, &query.filter)? {
                    selected.push(doc.clone());
                }
            }
        }
        sort_documents(&mut selected, &query.sort);
        let pending = match &query.projection {
            Some(projection) => selected
                .into_iter()
                .map(|d| project(d, projection))
                .collect::<Result<VecDeque<_>, _>>()?,
            None => selected.into(),
        };

        let fail_after = self
            .read_faults
            .lock()
            .get_mut(&namespace.collection)
            .and_then(VecDeque::pop_front);
        debug!(%namespace, matched = pending.len(), ?fail_after, "memory find");

        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCursor {
            pending,
            fail_after,
            yielded: 0,
            open: Some(Arc::clone(&self.open_cursors)),
        }))
    }

    async fn bulk_write(
        &self,
        namespace: &Namespace,
        models: &[WriteModel],
    ) -> Result<BulkWriteOutcome, StoreError> {
        self.counters.bulk_writes.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let fault = self.bulk_faults.lock().pop_front();
        if fault == Some(BulkFault::Disconnect) {
            return Err(StoreError::Disconnected("connection closed during write".into()));
        }
        let injected: HashMap<usize, i32> = match &fault {
            Some(BulkFault::WriteErrors(list)) => list.iter().copied().collect(),
            _ => HashMap::new(),
        };

        let mut outcome = BulkWriteOutcome::default();
        let mut write_errors = Vec::new();
        {
            let mut collections = self.collections.write();
            let docs = collections.entry(namespace.clone()).or_default();
            for (index, model) in models.iter().enumerate() {
                if let Some(code) = injected.get(&index) {
                    write_errors.push(WriteErrorDetail {
                        index,
                        code: *code,
                        message: format!("injected failure {code}"),
                    });
                    continue;
                }
                if let Err((code, message)) = apply_model(docs, model, &mut outcome) {
                    write_errors.push(WriteErrorDetail {
                        index,
                        code,
                        message,
                    });
                }
            }
        }

        let write_concern_error = match fault {
            Some(BulkFault::WriteConcern(code)) => Some(WriteConcernErrorDetail {
                code,
                message: format!("injected write concern failure {code}"),
            }),
            _ => None,
        };
        if write_errors.is_empty() && write_concern_error.is_none() {
            return Ok(outcome);
        }
        Err(StoreError::BulkWrite(BulkWriteFailure {
            outcome,
            write_errors,
            write_concern_error,
        }))
    }

    async fn delete_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
    ) -> Result<u64, StoreError> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if self.take_delete_fault() {
            return Err(StoreError::Disconnected("connection reset during delete".into()));
        }
        let mut outcome = BulkWriteOutcome::default();
        let mut collections = self.collections.write();
        if let Some(docs) = collections.get_mut(namespace) {
            apply_model(
                docs,
                &WriteModel::DeleteOne {
                    filter: filter.clone(),
                },
                &mut outcome,
            )
            .map_err(|(code, message)| StoreError::Command { code, message })?;
        }
        Ok(outcome.deleted)
    }

    async fn delete_many(
        &self,
        namespace: &Namespace,
        filter: &Document,
    ) -> Result<u64, StoreError> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if self.take_delete_fault() {
            return Err(StoreError::Disconnected("connection reset during delete".into()));
        }
        let mut collections = self.collections.write();
        match collections.get_mut(namespace) {
            Some(docs) => remove_matching(docs, filter),
            None => Ok(0),
        }
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<CollectionName>, StoreError> {
        self.check_reachable()?;
        Ok(self
            .collections
            .read()
            .keys()
            .filter(|ns| ns.database == database)
            .map(|ns| ns.collection.clone())
            .collect())
    }

    async fn drop_collection(&self, namespace: &Namespace) -> Result<(), StoreError> {
        self.check_reachable()?;
        self.collections.write().remove(namespace);
        self.validators.write().remove(namespace);
        Ok(())
    }

    // Validators are recorded, not enforced.
    async fn apply_validator(
        &self,
        namespace: &Namespace,
        validator: &Document,
    ) -> Result<ValidatorOutcome, StoreError> {
        self.check_reachable()?;
        let outcome = {
            let mut collections = self.collections.write();
            if collections.contains_key(namespace) {
                ValidatorOutcome::Updated
            } else {
                collections.insert(namespace.clone(), Vec::new());
                ValidatorOutcome::Created
            }
        };
        self.validators
            .write()
            .insert(namespace.clone(), validator.clone());
        debug!(%namespace, ?outcome, "memory validator installed");
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn ns() -> Namespace {
        Namespace::new("Test", "people")
    }

    fn set(fields: Value) -> UpdatePipeline {
        UpdatePipeline(vec![doc(json!({ "$set": fields }))])
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates() {
        let store = MemoryStore::new();
        let model = WriteModel::UpdateOne {
            filter: doc(json!({"_id": "a"})),
            update: set(json!({"name": {"$literal": "Ann"}})),
            upsert: true,
        };
        let outcome = store.bulk_write(&ns(), &[model.clone()]).await.unwrap();
        assert_eq!(outcome.upserted, 1);
        assert_eq!(store.get(&ns(), &json!("a")).unwrap()["name"], json!("Ann"));

        let outcome = store.bulk_write(&ns(), &[model]).await.unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.modified, 0);
        assert_eq!(store.count(&ns()), 1);
    }

    #[tokio::test]
    async fn find_sorts_filters_and_projects() {
        let store = MemoryStore::new();
        store.insert_many(
            &ns(),
            vec![
                doc(json!({"_id": 3, "k": "x", "v": 1})),
                doc(json!({"_id": 1, "k": "x", "v": 2})),
                doc(json!({"_id": 2, "k": "y", "v": 3})),
            ],
        );
        let query = FindQuery::new(doc(json!({"k": "x"})))
            .with_sort(vec![crate::model::SortKey::asc("_id")])
            .with_projection(doc(json!({"v": 1})));
        let mut cursor = store.find(&ns(), &query).await.unwrap();
        assert_eq!(store.stats().open_cursors, 1);
        let first = cursor.next().await.unwrap().unwrap();
        assert_eq!(Value::Object(first), json!({"_id": 1, "v": 2}));
        let second = cursor.next().await.unwrap().unwrap();
        assert_eq!(second["_id"], json!(3));
        assert!(cursor.next().await.unwrap().is_none());
        cursor.close().await;
        assert_eq!(store.stats().open_cursors, 0);
    }

    #[tokio::test]
    async fn dropped_cursor_is_released() {
        let store = MemoryStore::new();
        let cursor = store.find(&ns(), &FindQuery::new(Document::new())).await.unwrap();
        assert_eq!(store.stats().open_cursors, 1);
        drop(cursor);
        assert_eq!(store.stats().open_cursors, 0);
    }

    #[tokio::test]
    async fn read_disconnect_fires_after_n_documents() {
        let store = MemoryStore::new();
        store.insert_many(
            &ns(),
            (0..5).map(|i| doc(json!({"_id": i}))),
        );
        store.inject_read_disconnect("people", 2);
        let mut cursor = store.find(&ns(), &FindQuery::new(Document::new())).await.unwrap();
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap_err().is_disconnect());
        assert!(cursor.next().await.unwrap_err().is_disconnect());

        // the fault is consumed by one cursor
        let mut fresh = store.find(&ns(), &FindQuery::new(Document::new())).await.unwrap();
        let mut seen = 0;
        while fresh.next().await.unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 5);
    }

    #[tokio::test]
    async fn write_errors_fault_applies_other_operations() {
        let store = MemoryStore::new();
        let models: Vec<_> = (0..3)
            .map(|i| WriteModel::UpdateOne {
                filter: doc(json!({"_id": i})),
                update: set(json!({"v": {"$literal": i}})),
                upsert: true,
            })
            .collect();
        store.inject_bulk_fault(BulkFault::WriteErrors(vec![(1, 11000)]));
        let err = store.bulk_write(&ns(), &models).await.unwrap_err();
        let StoreError::BulkWrite(failure) = err else {
            panic!("expected bulk write failure");
        };
        assert_eq!(failure.write_errors.len(), 1);
        assert_eq!(failure.write_errors[0].index, 1);
        assert_eq!(failure.outcome.upserted, 2);
        assert!(store.get(&ns(), &json!(1)).is_none());
    }

    #[tokio::test]
    async fn duplicate_key_on_upsert_is_a_write_error() {
        let store = MemoryStore::new();
        store.insert_many(&ns(), vec![doc(json!({"_id": "a", "state": "old"}))]);
        let model = WriteModel::UpdateOne {
            filter: doc(json!({"_id": "a", "state": "new"})),
            update: set(json!({"x": 1})),
            upsert: true,
        };
        let err = store.bulk_write(&ns(), &[model]).await.unwrap_err();
        let StoreError::BulkWrite(failure) = err else {
            panic!("expected bulk write failure");
        };
        assert_eq!(failure.write_errors[0].code, DUPLICATE_KEY);
    }

    #[tokio::test]
    async fn unreachable_store_fails_everything() {
        let store = MemoryStore::new();
        store.set_reachable(false);
        assert!(store.ping().await.unwrap_err().is_disconnect());
        assert!(store
            .find(&ns(), &FindQuery::new(Document::new()))
            .await
            .is_err());
        store.set_reachable(true);
        store.ping().await.unwrap();
        assert_eq!(store.stats().pings, 2);
    }

    #[tokio::test]
    async fn deletes_and_collection_listing() {
        let store = MemoryStore::new();
        store.insert_many(&ns(), (0..4).map(|i| doc(json!({"_id": i, "even": i % 2 == 0}))));
        store.insert_many(&Namespace::new("Test", "alpha"), Vec::new());
        store.insert_many(&Namespace::new("Other", "zeta"), Vec::new());

        assert_eq!(store.delete_many(&ns(), &doc(json!({"even": true}))).await.unwrap(), 2);
        assert_eq!(store.delete_one(&ns(), &doc(json!({}))).await.unwrap(), 1);
        assert_eq!(store.count(&ns()), 1);

        store.inject_delete_disconnects(1);
        assert!(store
            .delete_one(&ns(), &doc(json!({})))
            .await
            .unwrap_err()
            .is_disconnect());

        let names = store.list_collections("Test").await.unwrap();
        assert_eq!(names, vec![CollectionName::from("alpha"), CollectionName::from("people")]);
        store.drop_collection(&ns()).await.unwrap();
        assert_eq!(store.list_collections("Test").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validator_creates_then_updates() {
        let store = MemoryStore::new();
        let first = doc(json!({"$jsonSchema": {"required": ["doc_hash"]}}));
        let second = doc(json!({"$jsonSchema": {"required": ["utime"]}}));

        assert_eq!(
            store.apply_validator(&ns(), &first).await.unwrap(),
            ValidatorOutcome::Created
        );
        assert_eq!(store.list_collections("Test").await.unwrap().len(), 1);
        assert_eq!(
            store.apply_validator(&ns(), &second).await.unwrap(),
            ValidatorOutcome::Updated
        );
        assert_eq!(store.validator(&ns()), Some(second));

        store.drop_collection(&ns()).await.unwrap();
        assert!(store.validator(&ns()).is_none());
    }
}
