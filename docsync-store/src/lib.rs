//! # docsync-store
//!
//! The document-store protocol the sync engine talks to, plus backends.
//!
//! - [`DocumentStore`] / [`DocumentCursor`]: the seam (find, unordered bulk
//!   write, deletes, liveness ping, collection listing, validators)
//! - [`query`] / [`expr`]: filter, sort, projection and update-expression
//!   semantics shared by the in-memory backend
//! - [`MemoryStore`]: embedded backend with fault injection
//! - `MongoStore`: official driver backend (feature `mongodb`)

pub mod error;
pub mod expr;
pub mod memory;
pub mod model;
pub mod query;
mod store;

#[cfg(feature = "mongodb")]
pub mod mongo;

pub use error::{BulkWriteFailure, StoreError, WriteConcernErrorDetail, WriteErrorDetail};
pub use memory::{BulkFault, MemoryStats, MemoryStore};
pub use model::{
    BulkWriteOutcome, FindQuery, SortDirection, SortKey, UpdatePipeline, ValidatorOutcome,
    WriteModel,
};
pub use store::{DocumentCursor, DocumentStore};

#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;
