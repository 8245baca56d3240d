use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Error surface for dump/restore transfers.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while waiting on {program}: {source}")]
    Io {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Either side of the pipe exited unsuccessfully.
    #[error("dump {dump}, restore {restore}")]
    ProcessFailed { dump: ExitStatus, restore: ExitStatus },

    #[error("unknown transfer direction '{0}' (expected 'archive' or 'restore')")]
    UnknownDirection(String),

    #[error("collection name must not be empty")]
    EmptyCollection,
}

pub(crate) fn io_err(program: impl Into<PathBuf>, source: std::io::Error) -> ArchiveError {
    ArchiveError::Io {
        program: program.into(),
        source,
    }
}

pub(crate) fn spawn_err(program: impl Into<PathBuf>, source: std::io::Error) -> ArchiveError {
    ArchiveError::Spawn {
        program: program.into(),
        source,
    }
}
