//! Bulk write flusher.
//!
//! Write models accumulate until the threshold and go out as one unordered
//! bulk write. A transient failure gets exactly one whole-batch resubmission
//! after a pause; anything else surfaces with per-operation detail.

use docsync_store::{BulkWriteFailure, BulkWriteOutcome, StoreError, WriteModel};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connector::{exhausted, CollectionHandle};
use crate::error::{FailedOperation, SyncError};

/// Server codes that signal contention or failover rather than a bad write.
pub const TRANSIENT_CODES: [i32; 13] = [
    6,     // HostUnreachable
    7,     // HostNotFound
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    112,   // WriteConflict
    189,   // PrimarySteppedDown
    262,   // ExceededTimeLimit
    9001,  // SocketException
    10107, // NotWritablePrimary
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13435, // NotPrimaryNoSecondaryOk
    13436, // NotPrimaryOrSecondary
];

/// Default number of operations per bulk write.
pub const DEFAULT_WRITE_BATCH: usize = 500;

pub fn is_transient_code(code: i32) -> bool {
    TRANSIENT_CODES.contains(&code)
}

/// Lost connection, or a command failure with a transient code.
pub fn is_transient(err: &StoreError) -> bool {
    err.is_disconnect() || err.code().is_some_and(is_transient_code)
}

/// Counters accumulated over every flush of a sync call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records read or submitted.
    pub records: u64,
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
    pub deleted: u64,
    /// Flushes that needed their one resubmission.
    pub retries: u64,
    /// Bulk writes that completed.
    pub batches: u64,
}

/// Threshold-triggered batcher over one collection.
pub struct BatchFlusher<'a> {
    handle: &'a CollectionHandle,
    threshold: usize,
    pending: Vec<WriteModel>,
    report: SyncReport,
}

impl<'a> BatchFlusher<'a> {
    pub fn new(handle: &'a CollectionHandle, threshold: usize) -> Result<Self, SyncError> {
        if threshold == 0 {
            return Err(SyncError::InvalidOption(
                "write batch size must be at least 1".into(),
            ));
        }
        Ok(Self {
            handle,
            threshold,
            pending: Vec::with_capacity(threshold),
            report: SyncReport::default(),
        })
    }

    /// Queue one operation, flushing when the threshold is reached.
    pub async fn push(&mut self, model: WriteModel) -> Result<(), SyncError> {
        self.pending.push(model);
        self.report.records += 1;
        if self.pending.len() >= self.threshold {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush the remainder and return the totals.
    pub async fn finish(mut self) -> Result<SyncReport, SyncError> {
        if !self.pending.is_empty() {
            self.flush().await?;
        }
        Ok(self.report)
    }

    async fn flush(&mut self) -> Result<(), SyncError> {
        let batch = std::mem::take(&mut self.pending);
        let handle = self.handle;
        let collection = handle.namespace();
        debug!(collection = %collection, size = batch.len(), "flushing bulk write");

        let first = match handle.bulk_write(&batch).await {
            Ok(outcome) => {
                self.record(&outcome);
                return Ok(());
            }
            Err(SyncError::Store(e)) => e,
            Err(e) => return Err(e),
        };

        let retryable = match &first {
            StoreError::BulkWrite(failure) => failure.codes().any(is_transient_code),
            other => is_transient(other),
        };
        if !retryable {
            return Err(match first {
                StoreError::BulkWrite(failure) => permanent(collection.to_string(), failure, &batch),
                other => SyncError::Store(other),
            });
        }

        let codes: Vec<i32> = match &first {
            StoreError::BulkWrite(failure) => failure.codes().collect(),
            _ => Vec::new(),
        };
        warn!(
            collection = %collection,
            codes = ?codes,
            error = %first,
            size = batch.len(),
            "bulk write hit a transient failure, resubmitting once"
        );
        tokio::time::sleep(handle.backoff()).await;
        self.report.retries += 1;

        match handle.bulk_write(&batch).await {
            Ok(outcome) => {
                self.record(&outcome);
                Ok(())
            }
            Err(SyncError::Store(StoreError::BulkWrite(failure))) => {
                Err(permanent(collection.to_string(), failure, &batch))
            }
            Err(SyncError::Store(e)) => Err(exhausted(collection, e)),
            Err(e) => Err(e),
        }
    }

    fn record(&mut self, outcome: &BulkWriteOutcome) {
        self.report.matched += outcome.matched;
        self.report.modified += outcome.modified;
        self.report.upserted += outcome.upserted;
        self.report.deleted += outcome.deleted;
        self.report.batches += 1;
        info!(
            collection = %self.handle.namespace(),
            matched = outcome.matched,
            modified = outcome.modified,
            upserted = outcome.upserted,
            "bulk write applied"
        );
    }
}

/// Attach each failed operation's filter to its error.
fn permanent(collection: String, failure: BulkWriteFailure, batch: &[WriteModel]) -> SyncError {
    let failures = failure
        .write_errors
        .into_iter()
        .map(|e| FailedOperation {
            filter: batch.get(e.index).map(|m| m.filter().clone()),
            index: e.index,
            code: e.code,
            message: e.message,
        })
        .collect();
    SyncError::PermanentWrite {
        collection,
        failures,
        write_concern: failure.write_concern_error,
        outcome: failure.outcome,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connector::{Connector, RECOVERY_BACKOFF};
    use docsync_core::types::{Document, Namespace, PoolBounds};
    use docsync_store::{BulkFault, MemoryStore, UpdatePipeline};
    use rstest::rstest;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn upsert(i: i64) -> WriteModel {
        WriteModel::UpdateOne {
            filter: doc(json!({"_id": i})),
            update: UpdatePipeline(vec![doc(json!({"$set": {"v": {"$literal": i}}}))]),
            upsert: true,
        }
    }

    async fn handle(store: &Arc<MemoryStore>) -> CollectionHandle {
        Connector::new(store.clone(), "Test", PoolBounds::default())
            .resource("out")
            .await
            .unwrap()
    }

    #[rstest]
    #[case(6, true)]
    #[case(112, true)]
    #[case(13436, true)]
    #[case(11000, false)]
    #[case(64, false)]
    fn transient_code_table(#[case] code: i32, #[case] expected: bool) {
        assert_eq!(is_transient_code(code), expected);
    }

    #[tokio::test]
    async fn flushes_at_threshold_and_on_finish() {
        let store = Arc::new(MemoryStore::new());
        let handle = handle(&store).await;
        let mut flusher = BatchFlusher::new(&handle, 2).unwrap();
        for i in 0..5 {
            flusher.push(upsert(i)).await.unwrap();
        }
        assert_eq!(store.stats().bulk_writes, 2);
        let report = flusher.finish().await.unwrap();
        assert_eq!(store.stats().bulk_writes, 3);
        assert_eq!(report.batches, 3);
        assert_eq!(report.upserted, 5);
        assert_eq!(report.records, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_write_error_is_retried_once() {
        let store = Arc::new(MemoryStore::new());
        let handle = handle(&store).await;
        store.inject_bulk_fault(BulkFault::WriteErrors(vec![(1, 112)]));

        let mut flusher = BatchFlusher::new(&handle, 10).unwrap();
        for i in 0..3 {
            flusher.push(upsert(i)).await.unwrap();
        }
        let started = tokio::time::Instant::now();
        let report = flusher.finish().await.unwrap();
        assert!(started.elapsed() >= RECOVERY_BACKOFF);
        assert_eq!(report.retries, 1);
        assert_eq!(store.stats().bulk_writes, 2);
        assert_eq!(store.count(&Namespace::new("Test", "out")), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_retried_once() {
        let store = Arc::new(MemoryStore::new());
        let handle = handle(&store).await;
        store.inject_bulk_fault(BulkFault::Disconnect);
        let mut flusher = BatchFlusher::new(&handle, 10).unwrap();
        flusher.push(upsert(1)).await.unwrap();
        let report = flusher.finish().await.unwrap();
        assert_eq!(report.retries, 1);
        assert_eq!(report.upserted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_disconnect_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let handle = handle(&store).await;
        store.inject_bulk_fault(BulkFault::Disconnect);
        store.inject_bulk_fault(BulkFault::Disconnect);
        let mut flusher = BatchFlusher::new(&handle, 10).unwrap();
        flusher.push(upsert(1)).await.unwrap();
        let err = flusher.finish().await.unwrap_err();
        assert!(matches!(err, SyncError::RecoveryExhausted { .. }), "got: {err}");
        assert_eq!(store.stats().bulk_writes, 2);
    }

    #[tokio::test]
    async fn permanent_error_carries_operation_detail() {
        let store = Arc::new(MemoryStore::new());
        let handle = handle(&store).await;
        store.inject_bulk_fault(BulkFault::WriteErrors(vec![(2, 11000)]));
        let mut flusher = BatchFlusher::new(&handle, 10).unwrap();
        for i in 0..4 {
            flusher.push(upsert(i)).await.unwrap();
        }
        let err = flusher.finish().await.unwrap_err();
        let SyncError::PermanentWrite {
            collection,
            failures,
            outcome,
            ..
        } = err
        else {
            panic!("expected a permanent write error");
        };
        assert_eq!(collection, "Test.out");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 2);
        assert_eq!(failures[0].code, 11000);
        assert_eq!(failures[0].filter, Some(doc(json!({"_id": 2}))));
        assert_eq!(outcome.upserted, 3);
        assert_eq!(store.stats().bulk_writes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_on_resubmission_is_permanent() {
        let store = Arc::new(MemoryStore::new());
        let handle = handle(&store).await;
        store.inject_bulk_fault(BulkFault::WriteErrors(vec![(0, 189)]));
        store.inject_bulk_fault(BulkFault::WriteErrors(vec![(0, 189)]));
        let mut flusher = BatchFlusher::new(&handle, 10).unwrap();
        flusher.push(upsert(7)).await.unwrap();
        let err = flusher.finish().await.unwrap_err();
        assert!(matches!(err, SyncError::PermanentWrite { .. }), "got: {err}");
        assert_eq!(store.stats().bulk_writes, 2);
    }

    #[tokio::test]
    async fn write_concern_failure_is_surfaced() {
        let store = Arc::new(MemoryStore::new());
        let handle = handle(&store).await;
        store.inject_bulk_fault(BulkFault::WriteConcern(64));
        let mut flusher = BatchFlusher::new(&handle, 10).unwrap();
        flusher.push(upsert(1)).await.unwrap();
        let err = flusher.finish().await.unwrap_err();
        let SyncError::PermanentWrite { write_concern, failures, .. } = err else {
            panic!("expected a permanent write error");
        };
        assert!(failures.is_empty());
        assert_eq!(write_concern.unwrap().code, 64);
    }
}
