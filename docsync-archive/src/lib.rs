//! Collection transfer between databases through the external archive tools.
//!
//! The dump process writes an archive stream to stdout which is piped
//! straight into the restore process; nothing touches disk.

pub mod error;
pub mod pipe;
pub mod plan;

pub use error::ArchiveError;
pub use pipe::transfer_collection;
pub use plan::{redact_uri, Direction, TransferPlan};
