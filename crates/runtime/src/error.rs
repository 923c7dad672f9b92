//! Unified error types surfaced by the runtime API.
//!
//! Storage- and codec-level failures are converted to status changes at the
//! store/replay boundary; what remains here is what callers of the registry
//! and server can actually observe.

use thiserror::Error;
use transitviz_core::{NameError, SimulationId};

pub use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The referenced session is unknown to the registry. Handlers log this
    /// and no-op toward external callers; it never reaches the transport.
    #[error("simulation `{0}` not found")]
    SessionNotFound(SimulationId),

    #[error("invalid simulation name: {0}")]
    Validation(#[from] NameError),

    #[error("failed to spawn worker process: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("worker process join failed: {0}")]
    WorkerJoin(#[source] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transport I/O error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("server inbound channel closed")]
    InboundChannelClosed,
}
