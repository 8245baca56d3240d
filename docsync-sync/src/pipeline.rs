//! Sync pipeline entrypoint shared by the CLI commands.
//!
//! Source batches flow through the cursor reader, get fingerprinted on the
//! blocking pool, become conditional upserts and leave through the flusher.

use std::sync::Arc;

use docsync_core::types::Document;
use tracing::info;

use crate::connector::Connector;
use crate::cursor::{CursorReader, StreamOptions};
use crate::diff::{drift, DriftReport};
use crate::error::SyncError;
use crate::fingerprint::{fingerprint_batch, FieldSelection};
use crate::flush::{BatchFlusher, SyncReport, DEFAULT_WRITE_BATCH};
use crate::upsert::{build_upserts, Clock, IdStrategy, SystemClock};

/// How records become upserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOptions {
    pub id: IdStrategy,
    pub fields: FieldSelection,
    pub write_batch_size: usize,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            id: IdStrategy::Native,
            fields: FieldSelection::All,
            write_batch_size: DEFAULT_WRITE_BATCH,
        }
    }
}

/// Source selection plus upsert behaviour for a collection-to-collection sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOptions {
    pub stream: StreamOptions,
    pub upsert: UpsertOptions,
}

/// The incremental sync engine over one database.
#[derive(Clone)]
pub struct SyncEngine {
    connector: Connector,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Open a resumable batch reader over `collection`.
    pub async fn stream(
        &self,
        collection: &str,
        options: StreamOptions,
    ) -> Result<CursorReader, SyncError> {
        let handle = self.connector.resource(collection).await?;
        CursorReader::new(handle, options)
    }

    /// Every matching document of `collection`, in sort order.
    pub async fn fetch_all(
        &self,
        collection: &str,
        options: StreamOptions,
    ) -> Result<Vec<Document>, SyncError> {
        self.stream(collection, options).await?.collect_all().await
    }

    /// Upsert `records` into `collection`, moving `utime` only for records
    /// whose fingerprint changed.
    ///
    /// Identifiers are checked before anything is written.
    pub async fn upsert_hashed(
        &self,
        collection: &str,
        records: Vec<Document>,
        options: &UpsertOptions,
    ) -> Result<SyncReport, SyncError> {
        let handle = self.connector.resource(collection).await?;
        let now = self.clock.now();
        let (records, hashes) = fingerprint_batch(records, options.fields.clone()).await?;
        let models = build_upserts(&records, &hashes, &options.id, &now, 0)?;

        let mut flusher = BatchFlusher::new(&handle, options.write_batch_size)?;
        for model in models {
            flusher.push(model).await?;
        }
        let report = flusher.finish().await?;
        info!(
            collection = %handle.namespace(),
            records = report.records,
            upserted = report.upserted,
            modified = report.modified,
            "upsert finished"
        );
        Ok(report)
    }

    /// Stream `source` into `target` with hashed upserts.
    pub async fn sync_collection(
        &self,
        source: &str,
        target: &str,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let target_handle = self.connector.resource(target).await?;
        let mut reader = self.stream(source, options.stream.clone()).await?;
        let mut flusher = BatchFlusher::new(&target_handle, options.upsert.write_batch_size)?;

        let mut index = 0;
        while let Some(batch) = reader.next_batch().await? {
            let now = self.clock.now();
            let (records, hashes) = fingerprint_batch(batch, options.upsert.fields.clone()).await?;
            let models = build_upserts(&records, &hashes, &options.upsert.id, &now, index)?;
            index += records.len();
            for model in models {
                flusher.push(model).await?;
            }
        }

        let report = flusher.finish().await?;
        info!(
            source,
            target,
            records = report.records,
            upserted = report.upserted,
            modified = report.modified,
            retries = report.retries,
            "sync finished"
        );
        Ok(report)
    }

    /// What `sync_collection` would change, without writing.
    pub async fn diff(
        &self,
        source: &str,
        target: &str,
        options: &SyncOptions,
    ) -> Result<DriftReport, SyncError> {
        drift(self, source, target, options).await
    }

    /// Delete the first document of `collection` matching `filter`.
    pub async fn delete_one(&self, collection: &str, filter: &Document) -> Result<u64, SyncError> {
        self.connector
            .resource(collection)
            .await?
            .delete_one(filter)
            .await
    }

    /// Delete every document of `collection` matching `filter`.
    pub async fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64, SyncError> {
        self.connector
            .resource(collection)
            .await?
            .delete_many(filter)
            .await
    }
}
