//! Error types for docsync-sync.

use docsync_core::types::Document;
use docsync_store::{BulkWriteOutcome, StoreError, WriteConcernErrorDetail};
use thiserror::Error;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the store that no retry policy applies to.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The connection dropped again after the one allowed recovery.
    #[error("connection to {collection} lost again after recovery: {source}")]
    RecoveryExhausted {
        collection: String,
        #[source]
        source: StoreError,
    },

    /// A bulk write failed with non-transient errors, or failed again on
    /// resubmission.
    #[error(
        "bulk write to {collection} failed: {} operation(s) rejected{}",
        .failures.len(),
        concern_suffix(.write_concern)
    )]
    PermanentWrite {
        collection: String,
        failures: Vec<FailedOperation>,
        write_concern: Option<WriteConcernErrorDetail>,
        /// Operations the server did apply.
        outcome: BulkWriteOutcome,
    },

    /// An identifying field is absent or null.
    #[error("record {index} has no value for id field '{field}'")]
    MissingIdField { field: String, index: usize },

    /// An identifying field holds an array or object.
    #[error("record {index} has a non-scalar value for id field '{field}'")]
    InvalidIdField { field: String, index: usize },

    /// A caller-supplied option is out of range.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A collection validator that cannot be installed as given.
    #[error("invalid validator: {0}")]
    InvalidValidator(String),

    /// The fingerprint worker panicked or was cancelled.
    #[error("fingerprint task failed: {0}")]
    Hashing(String),

    /// The connection pool was shut down.
    #[error("connection pool closed")]
    PoolClosed,
}

fn concern_suffix(concern: &Option<WriteConcernErrorDetail>) -> String {
    concern
        .as_ref()
        .map(|w| format!(", write concern error {}: {}", w.code, w.message))
        .unwrap_or_default()
}

/// One rejected operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedOperation {
    /// Position of the operation in the flushed batch.
    pub index: usize,
    pub code: i32,
    pub message: String,
    /// Filter of the rejected operation, when the index is in range.
    pub filter: Option<Document>,
}
