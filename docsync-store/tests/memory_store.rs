//! MemoryStore behind the `DocumentStore` trait object.

use std::sync::Arc;

use docsync_core::{Document, Namespace};
use docsync_store::{
    BulkFault, DocumentStore, FindQuery, MemoryStore, SortKey, StoreError, UpdatePipeline,
    WriteModel,
};
use serde_json::{json, Value};

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn gated_upsert(id: &str, hash: &str, now: &str) -> WriteModel {
    let unchanged = json!({"$eq": [{"$ifNull": ["$doc_hash", ""]}, {"$literal": hash}]});
    WriteModel::UpdateOne {
        filter: doc(json!({"_id": id})),
        update: UpdatePipeline(vec![doc(json!({"$set": {
            "_id": {"$literal": id},
            "doc_hash": {"$literal": hash},
            "utime": {"$cond": [unchanged, "$utime", {"$literal": now}]},
            "ctime": {"$ifNull": ["$ctime", {"$literal": now}]},
        }}))]),
        upsert: true,
    }
}

#[tokio::test]
async fn gated_upsert_moves_utime_only_on_change() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let ns = Namespace::new("Test", "people");

    store
        .bulk_write(&ns, &[gated_upsert("a", "h1", "2024-01-01 00:00:00")])
        .await
        .unwrap();
    store
        .bulk_write(&ns, &[gated_upsert("a", "h1", "2024-02-01 00:00:00")])
        .await
        .unwrap();

    let mut cursor = store.find(&ns, &FindQuery::new(Document::new())).await.unwrap();
    let stored = cursor.next().await.unwrap().unwrap();
    assert_eq!(stored["utime"], json!("2024-01-01 00:00:00"));

    let outcome = store
        .bulk_write(&ns, &[gated_upsert("a", "h2", "2024-03-01 00:00:00")])
        .await
        .unwrap();
    assert_eq!(outcome.modified, 1);

    let mut cursor = store.find(&ns, &FindQuery::new(Document::new())).await.unwrap();
    let stored = cursor.next().await.unwrap().unwrap();
    assert_eq!(stored["utime"], json!("2024-03-01 00:00:00"));
    assert_eq!(stored["ctime"], json!("2024-01-01 00:00:00"));
}

#[tokio::test]
async fn write_concern_fault_applies_batch_and_reports() {
    let memory = Arc::new(MemoryStore::new());
    let ns = Namespace::new("Test", "people");
    memory.inject_bulk_fault(BulkFault::WriteConcern(64));

    let err = memory
        .bulk_write(&ns, &[gated_upsert("a", "h1", "2024-01-01 00:00:00")])
        .await
        .unwrap_err();
    match err {
        StoreError::BulkWrite(failure) => {
            assert!(failure.write_errors.is_empty());
            assert_eq!(failure.write_concern_error.unwrap().code, 64);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(memory.count(&ns), 1);
}

#[tokio::test]
async fn keyset_filter_resumes_after_last_key() {
    let memory = MemoryStore::new();
    let ns = Namespace::new("Test", "events");
    memory.insert_many(
        &ns,
        vec![
            doc(json!({"_id": 1, "utime": "2024-01-02 00:00:00"})),
            doc(json!({"_id": 2, "utime": "2024-01-01 00:00:00"})),
            doc(json!({"_id": 3, "utime": "2024-01-02 00:00:00"})),
        ],
    );
    let resume = doc(json!({"$or": [
        {"utime": {"$gt": "2024-01-02 00:00:00"}},
        {"utime": "2024-01-02 00:00:00", "_id": {"$gt": 1}},
    ]}));
    let query = FindQuery::new(resume).with_sort(FindQuery::default_sort());
    let mut cursor = memory.find(&ns, &query).await.unwrap();
    let next = cursor.next().await.unwrap().unwrap();
    assert_eq!(next["_id"], json!(3));
    assert!(cursor.next().await.unwrap().is_none());

    let sort = vec![SortKey::desc("_id")];
    let mut cursor = memory
        .find(&ns, &FindQuery::new(Document::new()).with_sort(sort))
        .await
        .unwrap();
    assert_eq!(cursor.next().await.unwrap().unwrap()["_id"], json!(3));
}
