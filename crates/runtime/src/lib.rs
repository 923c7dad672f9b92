//! Runtime orchestration for the TransitViz simulation coordinator.
//!
//! This crate wires together the persisted session log store, the
//! replay/resync engine, the session registry and state machine, the
//! room-based transport hub, and the worker-side event collector. Consumers
//! embed [`ServerRuntime`] to serve viewers, or [`worker::run_worker`] to
//! execute one simulation bound to a session id.
//!
//! Modules are organized by responsibility:
//! - [`store`] owns all on-disk session data (logs, polylines, corruption)
//! - [`replay`] computes minimal catch-up payloads for reconnecting viewers
//! - [`registry`] tracks session lifecycle and relays control messages
//! - [`transport`] provides the typed message hub and WebSocket bridges
//! - [`worker`] converts domain events into persisted/broadcast updates
//! - [`launcher`] spawns and joins simulation worker processes
pub mod config;
pub mod error;
pub mod launcher;
pub mod registry;
pub mod replay;
pub mod server;
pub mod store;
pub mod transport;
pub mod worker;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use launcher::{ProcessLauncher, WorkerHandle, WorkerLauncher};
pub use registry::{Session, SessionRegistry};
pub use replay::{ReplayEngine, ResyncPayload};
pub use server::ServerRuntime;
pub use store::{LogStore, PolylineLeg, PolylineTable, SessionLog, StoreError};
pub use transport::{ConnectionId, Hub, Room};
