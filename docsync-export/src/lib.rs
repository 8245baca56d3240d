//! Read-only relational export through an SSH tunnel.
//!
//! [`SqlExporter::query`] forwards a local port to the database host with
//! `ssh -N -L`, runs the statement over the MySQL protocol against that port
//! and returns the typed result set as a [`Table`].

pub mod error;
pub mod exporter;
pub mod sql;
pub mod table;
pub mod tunnel;

pub use error::ExportError;
pub use exporter::SqlExporter;
pub use sql::ensure_read_only;
pub use table::{Cell, ColumnKind, Table};
pub use tunnel::TunnelGuard;
