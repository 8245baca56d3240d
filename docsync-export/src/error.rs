use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Error surface for the SQL export path.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error from {program}: {source}")]
    Io {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tunnel on port {port} not ready after {waited:?}")]
    TunnelTimeout { port: u16, waited: Duration },

    #[error("ssh exited before the tunnel came up ({status})")]
    TunnelExited { status: ExitStatus },

    #[error("only read-only statements are allowed: {0}")]
    NotReadOnly(String),

    #[error("database query failed: {0}")]
    Query(#[from] mysql_async::Error),

    #[error("column `{column}` holds text that is not valid UTF-8: {message}")]
    Decode { column: String, message: String },
}

pub(crate) fn io_err(program: impl Into<PathBuf>, source: std::io::Error) -> ExportError {
    ExportError::Io {
        program: program.into(),
        source,
    }
}

pub(crate) fn spawn_err(program: impl Into<PathBuf>, source: std::io::Error) -> ExportError {
    ExportError::Spawn {
        program: program.into(),
        source,
    }
}
