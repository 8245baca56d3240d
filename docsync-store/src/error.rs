//! Error types for docsync-store.

use std::fmt;

use thiserror::Error;

use crate::model::BulkWriteOutcome;

/// All errors a store backend can report.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The transport dropped; the request may be retried on a fresh connection.
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// An unordered bulk write finished with per-operation failures.
    #[error("{0}")]
    BulkWrite(BulkWriteFailure),

    /// The server rejected a command.
    #[error("command failed with code {code}: {message}")]
    Command { code: i32, message: String },

    /// A filter, sort or projection could not be interpreted.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// An update or query operator the backend does not implement.
    #[error("unsupported operator '{0}'")]
    Unsupported(String),

    /// Conversion between wire documents and JSON documents failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Client-side failure with no server error code (bad URI, auth, ...).
    #[error("driver error: {0}")]
    Driver(String),
}

impl StoreError {
    /// True for reconnect-class failures.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, StoreError::Disconnected(_))
    }

    /// Server error code, when the failure carries exactly one.
    pub fn code(&self) -> Option<i32> {
        match self {
            StoreError::Command { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// One failed operation inside a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteErrorDetail {
    /// Position of the operation in the submitted batch.
    pub index: usize,
    pub code: i32,
    pub message: String,
}

/// Write-concern failure that applies to the batch as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConcernErrorDetail {
    pub code: i32,
    pub message: String,
}

/// Partial-failure report of an unordered bulk write.
///
/// Operations not listed in `write_errors` were applied; `outcome` counts them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteFailure {
    pub outcome: BulkWriteOutcome,
    pub write_errors: Vec<WriteErrorDetail>,
    pub write_concern_error: Option<WriteConcernErrorDetail>,
}

impl BulkWriteFailure {
    /// Every error code carried by the report.
    pub fn codes(&self) -> impl Iterator<Item = i32> + '_ {
        self.write_errors
            .iter()
            .map(|e| e.code)
            .chain(self.write_concern_error.iter().map(|e| e.code))
    }
}

impl fmt::Display for BulkWriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bulk write failed: {} write error(s)",
            self.write_errors.len()
        )?;
        if let Some(wce) = &self.write_concern_error {
            write!(f, ", write concern error {}: {}", wce.code, wce.message)?;
        }
        Ok(())
    }
}
