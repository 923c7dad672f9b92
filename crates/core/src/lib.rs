//! Shared data model for the TransitViz simulation coordinator.
//!
//! `transitviz-core` defines the canonical record types written to session
//! logs (header, delta updates, environment checkpoints), the status enums
//! shared between the registry and the wire protocol, and the save-format
//! version scheme. Everything here is pure data: no I/O, no async, so the
//! runtime, the worker and offline tools can all depend on it.
pub mod codec;
pub mod id;
pub mod record;
pub mod status;
pub mod version;

pub use codec::{MalformedRecord, decode, encode};
pub use id::{NameError, SAVE_FILE_SEPARATOR, SimulationId, validate_name};
pub use record::{
    ApplyError, BASE_ORDER, Environment, Header, Order, Passenger, Position, Record, Stop,
    Timestamp, Update, UpdateKind, Vehicle,
};
pub use status::{PassengerStatus, SimulationStatus, VehicleStatus};
pub use version::{SAVE_VERSION, SaveVersion, VersionClass};
