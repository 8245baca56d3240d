//! The document-store protocol seam.

use async_trait::async_trait;
use docsync_core::types::{CollectionName, Document, Namespace};

use crate::error::StoreError;
use crate::model::{BulkWriteOutcome, FindQuery, ValidatorOutcome, WriteModel};

/// A server-side iteration handle over a query's matching documents.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Next document, `Ok(None)` once the scan is exhausted.
    async fn next(&mut self) -> Result<Option<Document>, StoreError>;

    /// Release the server-side cursor. Safe to call more than once.
    async fn close(&mut self);
}

/// A networked document store addressed by [`Namespace`].
///
/// Implementations report reconnect-class failures as
/// [`StoreError::Disconnected`] and partial bulk failures as
/// [`StoreError::BulkWrite`]; retry policy lives in the caller.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Liveness check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Open a cursor over `query`.
    async fn find(
        &self,
        namespace: &Namespace,
        query: &FindQuery,
    ) -> Result<Box<dyn DocumentCursor>, StoreError>;

    /// Execute `models` as one unordered bulk write.
    async fn bulk_write(
        &self,
        namespace: &Namespace,
        models: &[WriteModel],
    ) -> Result<BulkWriteOutcome, StoreError>;

    /// Delete the first document matching `filter`; returns the deleted count.
    async fn delete_one(&self, namespace: &Namespace, filter: &Document)
        -> Result<u64, StoreError>;

    /// Delete every document matching `filter`; returns the deleted count.
    async fn delete_many(
        &self,
        namespace: &Namespace,
        filter: &Document,
    ) -> Result<u64, StoreError>;

    /// Names of the collections in `database`, sorted.
    async fn list_collections(&self, database: &str) -> Result<Vec<CollectionName>, StoreError>;

    /// Drop a collection. Dropping a missing collection is not an error.
    async fn drop_collection(&self, namespace: &Namespace) -> Result<(), StoreError>;

    /// Install `validator` with strict level and error action, creating the
    /// collection when it does not exist yet.
    async fn apply_validator(
        &self,
        namespace: &Namespace,
        validator: &Document,
    ) -> Result<ValidatorOutcome, StoreError>;
}
