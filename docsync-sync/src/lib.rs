//! # docsync-sync
//!
//! Incremental, fingerprint-gated collection sync.
//!
//! Build a [`SyncEngine`] over a [`Connector`] and call
//! [`SyncEngine::sync_collection`] to stream one collection into another,
//! or [`SyncEngine::upsert_hashed`] to push an in-memory batch. Transport
//! loss is survived once per stream and once per bulk write.

pub mod connector;
pub mod cursor;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod flush;
pub mod pipeline;
pub mod schema;
pub mod upsert;

pub use connector::{CollectionHandle, Connector, RECOVERY_BACKOFF};
pub use cursor::{Batch, CursorReader, ReaderState, StreamOptions};
pub use diff::DriftReport;
pub use error::{FailedOperation, SyncError};
pub use fingerprint::{fingerprint, FieldSelection};
pub use flush::{BatchFlusher, SyncReport, TRANSIENT_CODES};
pub use pipeline::{SyncEngine, SyncOptions, UpsertOptions};
pub use schema::parse_validator;
pub use upsert::{Clock, IdStrategy, SystemClock};
