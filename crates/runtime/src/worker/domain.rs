//! Boundary to the external simulation engine.
//!
//! The engine itself (vehicle and passenger behavior, optimization) is an
//! external collaborator; the core consumes it only as an ordered stream
//! of typed domain events plus a completion sentinel.

use serde::{Deserialize, Serialize};
use transitviz_core::{Position, Stop, Timestamp};

use crate::store::PolylineLeg;

/// One ordered event from the simulation engine.
///
/// Serializable so engine adapters can ship event streams across process
/// or file boundaries; the log format itself never contains these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    PassengerReleased {
        time: Timestamp,
        id: String,
        name: Option<String>,
    },
    PassengerAssigned {
        time: Timestamp,
        id: String,
    },
    PassengerReady {
        time: Timestamp,
        id: String,
    },
    PassengerBoarded {
        time: Timestamp,
        id: String,
    },
    PassengerAlighted {
        time: Timestamp,
        id: String,
    },
    VehicleReady {
        time: Timestamp,
        id: String,
        mode: Option<String>,
        previous_stops: Vec<Stop>,
        current_stop: Option<Stop>,
        next_stops: Vec<Stop>,
        /// Route geometry, when the engine has it; goes to the side table,
        /// never into the log.
        polylines: Option<Vec<PolylineLeg>>,
    },
    VehicleWaiting {
        time: Timestamp,
        id: String,
    },
    VehicleBoarding {
        time: Timestamp,
        id: String,
    },
    VehicleDeparted {
        time: Timestamp,
        id: String,
        previous_stops: Vec<Stop>,
        current_stop: Option<Stop>,
        next_stops: Vec<Stop>,
    },
    VehicleArrived {
        time: Timestamp,
        id: String,
        previous_stops: Vec<Stop>,
        current_stop: Option<Stop>,
        next_stops: Vec<Stop>,
    },
    VehicleCompleted {
        time: Timestamp,
        id: String,
    },
    VehiclePositionUpdated {
        time: Timestamp,
        id: String,
        position: Position,
    },
    /// Route re-planned mid-run (engine notification).
    VehicleRouteChanged {
        time: Timestamp,
        id: String,
        previous_stops: Vec<Stop>,
        current_stop: Option<Stop>,
        next_stops: Vec<Stop>,
        polylines: Option<Vec<PolylineLeg>>,
    },
}

impl DomainEvent {
    pub fn time(&self) -> Timestamp {
        match self {
            DomainEvent::PassengerReleased { time, .. }
            | DomainEvent::PassengerAssigned { time, .. }
            | DomainEvent::PassengerReady { time, .. }
            | DomainEvent::PassengerBoarded { time, .. }
            | DomainEvent::PassengerAlighted { time, .. }
            | DomainEvent::VehicleReady { time, .. }
            | DomainEvent::VehicleWaiting { time, .. }
            | DomainEvent::VehicleBoarding { time, .. }
            | DomainEvent::VehicleDeparted { time, .. }
            | DomainEvent::VehicleArrived { time, .. }
            | DomainEvent::VehicleCompleted { time, .. }
            | DomainEvent::VehiclePositionUpdated { time, .. }
            | DomainEvent::VehicleRouteChanged { time, .. } => *time,
        }
    }
}

/// Ordered event stream from the external engine.
///
/// Events arrive in simulated-time order; `None` from [`next_event`] is
/// the "no more events" sentinel signaling run completion. The core's only
/// obligations to this collaborator are to map each event deterministically
/// to zero or more update records and to stamp the final header on
/// completion.
///
/// [`next_event`]: EventSource::next_event
pub trait EventSource: Send {
    fn next_event(&mut self) -> Option<DomainEvent>;

    /// The engine's current estimate of the simulated end time.
    fn estimated_end_time(&self) -> Timestamp;

    /// Cap the simulated horizon; applied before the next event is pulled,
    /// so a live configuration edit takes effect mid-run.
    fn set_max_time(&mut self, max_time: Option<Timestamp>);
}
