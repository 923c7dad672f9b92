//! Error types raised by the log store.

use std::path::PathBuf;

use thiserror::Error;
use transitviz_core::{MalformedRecord, SimulationId};

/// Errors surfaced by on-disk session data access.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: MalformedRecord,
    },

    #[error("session log for `{0}` has no header")]
    HeaderMissing(SimulationId),

    #[error("session `{0}` is corrupted")]
    Corrupted(SimulationId),

    #[error("invalid offset {offset} for file size {file_size}")]
    InvalidOffset { offset: u64, file_size: u64 },
}

pub type Result<T> = std::result::Result<T, StoreError>;
