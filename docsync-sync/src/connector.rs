//! Connection guard: liveness check plus a bounded, process-wide pool.
//!
//! Every store call borrows one permit from a shared [`Semaphore`] sized to
//! the pool maximum. A cursor borrows a permit per read, so idle cursors
//! never hold the pool against writers.

use std::sync::Arc;
use std::time::Duration;

use docsync_core::types::{CollectionName, Document, Namespace, PoolBounds};
use docsync_store::{
    BulkWriteOutcome, DocumentCursor, DocumentStore, FindQuery, StoreError, ValidatorOutcome,
    WriteModel,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::SyncError;

/// Pause before the single retry after a lost connection.
pub const RECOVERY_BACKOFF: Duration = Duration::from_millis(500);

/// Shared entry point to one database of a store.
#[derive(Clone)]
pub struct Connector {
    store: Arc<dyn DocumentStore>,
    database: String,
    bounds: PoolBounds,
    permits: Arc<Semaphore>,
    backoff: Duration,
}

impl Connector {
    pub fn new(store: Arc<dyn DocumentStore>, database: impl Into<String>, bounds: PoolBounds) -> Self {
        let max = bounds.max.max(1) as usize;
        Self {
            store,
            database: database.into(),
            bounds,
            permits: Arc::new(Semaphore::new(max)),
            backoff: RECOVERY_BACKOFF,
        }
    }

    /// Override the recovery pause.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn bounds(&self) -> PoolBounds {
        self.bounds
    }

    /// Permits not currently borrowed.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Ping the store, then hand out a handle to `collection`.
    pub async fn resource(
        &self,
        collection: impl Into<CollectionName>,
    ) -> Result<CollectionHandle, SyncError> {
        let namespace = Namespace::new(self.database.clone(), collection);
        {
            let _permit = acquire(&self.permits).await?;
            self.store.ping().await?;
        }
        debug!(%namespace, "store reachable");
        Ok(CollectionHandle {
            store: Arc::clone(&self.store),
            namespace,
            permits: Arc::clone(&self.permits),
            backoff: self.backoff,
        })
    }

    /// Collections of the configured database.
    pub async fn list_collections(&self) -> Result<Vec<CollectionName>, SyncError> {
        let _permit = acquire(&self.permits).await?;
        Ok(self.store.list_collections(&self.database).await?)
    }
}

async fn acquire(permits: &Arc<Semaphore>) -> Result<OwnedSemaphorePermit, SyncError> {
    Arc::clone(permits)
        .acquire_owned()
        .await
        .map_err(|_| SyncError::PoolClosed)
}

/// A collection reached through a [`Connector`].
#[derive(Clone)]
pub struct CollectionHandle {
    store: Arc<dyn DocumentStore>,
    namespace: Namespace,
    permits: Arc<Semaphore>,
    backoff: Duration,
}

impl CollectionHandle {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Open a cursor over `query`.
    pub async fn open_cursor(&self, query: &FindQuery) -> Result<PooledCursor, SyncError> {
        let inner = {
            let _permit = acquire(&self.permits).await?;
            self.store.find(&self.namespace, query).await?
        };
        Ok(PooledCursor {
            inner,
            permits: Arc::clone(&self.permits),
        })
    }

    /// Install a collection validator, creating the collection if needed.
    pub async fn apply_validator(
        &self,
        validator: &Document,
    ) -> Result<ValidatorOutcome, SyncError> {
        let _permit = acquire(&self.permits).await?;
        Ok(self.store.apply_validator(&self.namespace, validator).await?)
    }

    /// One unordered bulk write, no retry.
    pub async fn bulk_write(&self, models: &[WriteModel]) -> Result<BulkWriteOutcome, SyncError> {
        let _permit = acquire(&self.permits).await?;
        Ok(self.store.bulk_write(&self.namespace, models).await?)
    }

    /// Delete the first match, retrying once after a lost connection.
    pub async fn delete_one(&self, filter: &Document) -> Result<u64, SyncError> {
        self.delete(filter, false).await
    }

    /// Delete every match, retrying once after a lost connection.
    pub async fn delete_many(&self, filter: &Document) -> Result<u64, SyncError> {
        self.delete(filter, true).await
    }

    async fn delete(&self, filter: &Document, many: bool) -> Result<u64, SyncError> {
        match self.delete_attempt(filter, many).await {
            Err(e) if e.is_disconnect() => {
                warn!(
                    collection = %self.namespace,
                    error = %e,
                    "delete lost its connection, retrying once"
                );
                tokio::time::sleep(self.backoff).await;
                self.delete_attempt(filter, many)
                    .await
                    .map_err(|source| exhausted(&self.namespace, source))
            }
            other => Ok(other?),
        }
    }

    async fn delete_attempt(&self, filter: &Document, many: bool) -> Result<u64, StoreError> {
        // pool closure surfaces as a lost connection so it shares the retry path
        let _permit = acquire(&self.permits)
            .await
            .map_err(|e| StoreError::Disconnected(e.to_string()))?;
        if many {
            self.store.delete_many(&self.namespace, filter).await
        } else {
            self.store.delete_one(&self.namespace, filter).await
        }
    }
}

/// Map a failure on the retry attempt.
pub(crate) fn exhausted(namespace: &Namespace, source: StoreError) -> SyncError {
    if source.is_disconnect() {
        SyncError::RecoveryExhausted {
            collection: namespace.to_string(),
            source,
        }
    } else {
        SyncError::Store(source)
    }
}

/// A store cursor whose reads are bounded by the pool.
pub struct PooledCursor {
    inner: Box<dyn DocumentCursor>,
    permits: Arc<Semaphore>,
}

impl PooledCursor {
    /// Next document; the permit is held only while the read is in flight.
    pub async fn next(&mut self) -> Result<Option<Document>, SyncError> {
        let _permit = acquire(&self.permits).await?;
        Ok(self.inner.next().await?)
    }

    /// Release the server cursor.
    pub async fn close(mut self) {
        self.inner.close().await;
    }
}
