//! Log record types: session header, delta updates and checkpoints.
//!
//! A session log is a JSON Lines file: the header on line 1, then update
//! records with a full [`Environment`] checkpoint interleaved at the
//! writer's checkpoint cadence. Replaying the updates between two
//! checkpoints onto the earlier checkpoint deterministically reproduces the
//! later one; [`Environment::apply`] is that replay step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::SimulationId;
use crate::status::{PassengerStatus, VehicleStatus};
use crate::version::{SAVE_VERSION, SaveVersion};

/// Simulated-clock time in seconds.
pub type Timestamp = f64;

/// Per-session record sequence number.
///
/// Updates are numbered `0, 1, 2, ...` with no gaps; a checkpoint carries
/// the order of the *next* update (the one whose arrival triggered the
/// snapshot), so a checkpoint at order `K` contains exactly the updates
/// with order `< K`. The synthesized empty base checkpoint sits at `-1`.
pub type Order = i64;

/// Order of the synthesized empty base environment.
pub const BASE_ORDER: Order = -1;

/// Geographic position of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

/// A single stop on a vehicle's route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub arrival_time: Timestamp,
    /// Absent for a terminal stop the vehicle never leaves.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub departure_time: Option<Timestamp>,
}

/// A passenger as rendered by viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passenger {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    pub status: PassengerStatus,
}

/// A vehicle as rendered by viewers.
///
/// Route geometry is not carried here: polylines live in the per-session
/// side table and `polylines_version` announces invalidations instead of
/// resending geometry on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<String>,
    pub status: VehicleStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub position: Option<Position>,
    pub previous_stops: Vec<Stop>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_stop: Option<Stop>,
    pub next_stops: Vec<Stop>,
    #[serde(default)]
    pub polylines_version: u64,
}

/// Payload of one state-change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum UpdateKind {
    CreatePassenger(Passenger),
    CreateVehicle(Vehicle),
    UpdatePassengerStatus {
        id: String,
        status: PassengerStatus,
    },
    UpdateVehicleStatus {
        id: String,
        status: VehicleStatus,
    },
    UpdateVehicleStops {
        id: String,
        previous_stops: Vec<Stop>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        current_stop: Option<Stop>,
        next_stops: Vec<Stop>,
    },
    UpdateVehiclePosition {
        id: String,
        position: Position,
    },
}

/// One incremental state-change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    #[serde(flatten)]
    pub kind: UpdateKind,
    pub timestamp: Timestamp,
    pub order: Order,
}

/// Full reconstructed visualization state at a given log position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub passengers: BTreeMap<String, Passenger>,
    pub vehicles: BTreeMap<String, Vehicle>,
    pub timestamp: Timestamp,
    pub estimated_end_time: Timestamp,
    pub order: Order,
}

/// Replay failure: an update referenced an entity the environment has
/// never seen, which means the delta stream is inconsistent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("passenger `{0}` not found")]
    UnknownPassenger(String),

    #[error("vehicle `{0}` not found")]
    UnknownVehicle(String),
}

impl Environment {
    /// The deterministic base state viewers replay deltas onto.
    pub fn empty_base() -> Self {
        Self {
            passengers: BTreeMap::new(),
            vehicles: BTreeMap::new(),
            timestamp: 0.0,
            estimated_end_time: 0.0,
            order: BASE_ORDER,
        }
    }

    /// Apply one delta in order.
    ///
    /// Advances `timestamp` to the update's timestamp; `order` bookkeeping
    /// is left to the caller, which knows whether it is replaying or
    /// writing.
    pub fn apply(&mut self, update: &Update) -> Result<(), ApplyError> {
        match &update.kind {
            UpdateKind::CreatePassenger(passenger) => {
                self.passengers
                    .insert(passenger.id.clone(), passenger.clone());
            }
            UpdateKind::CreateVehicle(vehicle) => {
                self.vehicles.insert(vehicle.id.clone(), vehicle.clone());
            }
            UpdateKind::UpdatePassengerStatus { id, status } => {
                self.passengers
                    .get_mut(id)
                    .ok_or_else(|| ApplyError::UnknownPassenger(id.clone()))?
                    .status = *status;
            }
            UpdateKind::UpdateVehicleStatus { id, status } => {
                self.vehicles
                    .get_mut(id)
                    .ok_or_else(|| ApplyError::UnknownVehicle(id.clone()))?
                    .status = *status;
            }
            UpdateKind::UpdateVehicleStops {
                id,
                previous_stops,
                current_stop,
                next_stops,
            } => {
                let vehicle = self
                    .vehicles
                    .get_mut(id)
                    .ok_or_else(|| ApplyError::UnknownVehicle(id.clone()))?;
                vehicle.previous_stops = previous_stops.clone();
                vehicle.current_stop = *current_stop;
                vehicle.next_stops = next_stops.clone();
            }
            UpdateKind::UpdateVehiclePosition { id, position } => {
                self.vehicles
                    .get_mut(id)
                    .ok_or_else(|| ApplyError::UnknownVehicle(id.clone()))?
                    .position = Some(*position);
            }
        }
        self.timestamp = update.timestamp;
        Ok(())
    }
}

/// First record of a session log (`SimulationInformation`).
///
/// Rewritten in place once when the session ends, to record the final
/// simulated-clock bounds and the last update order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub version: SaveVersion,
    pub simulation_id: SimulationId,
    pub name: String,
    pub start_time: String,
    /// Input dataset identifier.
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub simulation_start_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub simulation_end_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_update_order: Option<Order>,
}

impl Header {
    /// Header for a freshly created session, stamped with the current
    /// save-format version.
    pub fn new(id: &SimulationId, data: impl Into<String>) -> Self {
        Self {
            version: SAVE_VERSION,
            simulation_id: id.clone(),
            name: id.name().unwrap_or_default().to_string(),
            start_time: id.start_time().unwrap_or_default().to_string(),
            data: data.into(),
            simulation_start_time: None,
            simulation_end_time: None,
            last_update_order: None,
        }
    }
}

/// Any line of a session log.
///
/// The variants have disjoint required fields, so an untagged decode is
/// unambiguous; which kind a line *should* be is determined by its
/// position, and mismatches surface as corruption at the store layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    Header(Header),
    Environment(Environment),
    Update(Update),
}

impl Record {
    pub fn order(&self) -> Option<Order> {
        match self {
            Record::Header(_) => None,
            Record::Environment(environment) => Some(environment.order),
            Record::Update(update) => Some(update.order),
        }
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Record::Header(_) => None,
            Record::Environment(environment) => Some(environment.timestamp),
            Record::Update(update) => Some(update.timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    fn sample_vehicle() -> Vehicle {
        Vehicle {
            id: "bus-12".into(),
            mode: Some("bus".into()),
            status: VehicleStatus::Enroute,
            position: Some(Position {
                lat: 45.508,
                lon: -73.561,
            }),
            previous_stops: vec![Stop {
                arrival_time: 10.0,
                departure_time: Some(20.0),
            }],
            current_stop: None,
            next_stops: vec![Stop {
                arrival_time: 95.0,
                departure_time: None,
            }],
            polylines_version: 3,
        }
    }

    fn sample_passenger() -> Passenger {
        Passenger {
            id: "p-7".into(),
            name: Some("Ada".into()),
            status: PassengerStatus::Assigned,
        }
    }

    #[test]
    fn every_update_kind_round_trips() {
        let kinds = vec![
            UpdateKind::CreatePassenger(sample_passenger()),
            UpdateKind::CreateVehicle(sample_vehicle()),
            UpdateKind::UpdatePassengerStatus {
                id: "p-7".into(),
                status: PassengerStatus::Onboard,
            },
            UpdateKind::UpdateVehicleStatus {
                id: "bus-12".into(),
                status: VehicleStatus::Alighting,
            },
            UpdateKind::UpdateVehicleStops {
                id: "bus-12".into(),
                previous_stops: vec![],
                current_stop: Some(Stop {
                    arrival_time: 40.0,
                    departure_time: None,
                }),
                next_stops: vec![],
            },
            UpdateKind::UpdateVehiclePosition {
                id: "bus-12".into(),
                position: Position { lat: 1.0, lon: 2.0 },
            },
        ];

        for (order, kind) in kinds.into_iter().enumerate() {
            let update = Update {
                kind,
                timestamp: 12.5,
                order: order as Order,
            };
            let line = encode(&update).unwrap();
            assert_eq!(decode::<Update>(&line).unwrap(), update);
        }
    }

    #[test]
    fn update_kind_uses_stable_tokens() {
        let update = Update {
            kind: UpdateKind::UpdateVehicleStatus {
                id: "bus-12".into(),
                status: VehicleStatus::Idle,
            },
            timestamp: 0.0,
            order: 0,
        };
        let line = encode(&update).unwrap();
        assert!(line.contains("\"type\":\"updateVehicleStatus\""));
        assert!(line.contains("\"status\":\"idle\""));
    }

    #[test]
    fn header_and_environment_round_trip() {
        let id = SimulationId::from_raw("20250101-080000000---demo");
        let mut header = Header::new(&id, "gtfs-montreal");
        header.simulation_start_time = Some(0.0);
        let line = encode(&header).unwrap();
        assert_eq!(decode::<Header>(&line).unwrap(), header);
        assert_eq!(header.name, "demo");
        assert_eq!(header.start_time, "20250101-080000000");

        let mut environment = Environment::empty_base();
        environment
            .passengers
            .insert("p-7".into(), sample_passenger());
        environment.vehicles.insert("bus-12".into(), sample_vehicle());
        environment.order = 42;
        let line = encode(&environment).unwrap();
        assert_eq!(decode::<Environment>(&line).unwrap(), environment);
    }

    #[test]
    fn untagged_record_resolves_each_variant() {
        let id = SimulationId::from_raw("20250101-080000000---demo");
        let header_line = encode(&Header::new(&id, "data")).unwrap();
        assert!(matches!(
            decode::<Record>(&header_line).unwrap(),
            Record::Header(_)
        ));

        let env_line = encode(&Environment::empty_base()).unwrap();
        assert!(matches!(
            decode::<Record>(&env_line).unwrap(),
            Record::Environment(_)
        ));

        let update_line = encode(&Update {
            kind: UpdateKind::CreatePassenger(sample_passenger()),
            timestamp: 1.0,
            order: 0,
        })
        .unwrap();
        assert!(matches!(
            decode::<Record>(&update_line).unwrap(),
            Record::Update(_)
        ));
    }

    #[test]
    fn applying_deltas_reproduces_state() {
        let mut environment = Environment::empty_base();
        let updates = vec![
            Update {
                kind: UpdateKind::CreateVehicle(sample_vehicle()),
                timestamp: 5.0,
                order: 0,
            },
            Update {
                kind: UpdateKind::UpdateVehicleStatus {
                    id: "bus-12".into(),
                    status: VehicleStatus::Boarding,
                },
                timestamp: 8.0,
                order: 1,
            },
            Update {
                kind: UpdateKind::UpdateVehiclePosition {
                    id: "bus-12".into(),
                    position: Position { lat: 45.6, lon: -73.5 },
                },
                timestamp: 9.0,
                order: 2,
            },
        ];
        for update in &updates {
            environment.apply(update).unwrap();
        }

        let vehicle = &environment.vehicles["bus-12"];
        assert_eq!(vehicle.status, VehicleStatus::Boarding);
        assert_eq!(vehicle.position, Some(Position { lat: 45.6, lon: -73.5 }));
        assert_eq!(environment.timestamp, 9.0);
    }

    #[test]
    fn applying_to_unknown_entity_fails() {
        let mut environment = Environment::empty_base();
        let update = Update {
            kind: UpdateKind::UpdatePassengerStatus {
                id: "ghost".into(),
                status: PassengerStatus::Ready,
            },
            timestamp: 1.0,
            order: 0,
        };
        assert_eq!(
            environment.apply(&update),
            Err(ApplyError::UnknownPassenger("ghost".into()))
        );
    }
}
