//! Typed message kinds for the viewer/worker/control protocol.
//!
//! Every message travels as `{"kind": "...", "payload": {...}}`; the kind
//! tokens are the protocol contract, independent of which pub/sub transport
//! carries them. Unknown kinds are logged and dropped by the receiving
//! side, never treated as fatal.

use serde::{Deserialize, Serialize};
use transitviz_core::{
    Environment, Order, SimulationId, SimulationStatus, Timestamp, Update,
};

use crate::store::PolylineTable;

/// Connection groups used for room-based broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Room {
    /// Viewers.
    Client,
    /// Simulation worker processes.
    Simulation,
    /// Operational scripts (shutdown etc.).
    Script,
}

/// First message on every connection, naming its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum Handshake {
    Join { room: Room },
}

/// Requests sent by viewers (and scripts) to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientRequest {
    StartSimulation {
        name: String,
        data: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        max_duration: Option<Timestamp>,
    },
    StopSimulation {
        id: SimulationId,
    },
    PauseSimulation {
        id: SimulationId,
    },
    ResumeSimulation {
        id: SimulationId,
    },
    GetSimulations,
    GetMissingSimulationStates {
        id: SimulationId,
        visualization_time: Timestamp,
        loaded_orders: Vec<Order>,
    },
    GetPolylines {
        id: SimulationId,
    },
    EditSimulationConfiguration {
        id: SimulationId,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        max_duration: Option<Timestamp>,
    },
    /// Script-room request: stop every worker, then the server itself.
    Terminate,
}

/// Events sent by a simulation worker to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum WorkerEvent {
    /// Sent on (re)connect so a lost session can re-adopt its worker.
    SimulationIdentification {
        id: SimulationId,
        data: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        simulation_start_time: Option<Timestamp>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp: Option<Timestamp>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        estimated_end_time: Option<Timestamp>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        max_duration: Option<Timestamp>,
        status: SimulationStatus,
    },
    SimulationStart {
        id: SimulationId,
        simulation_start_time: Timestamp,
    },
    #[serde(rename = "simulation-pause")]
    SimulationPaused {
        id: SimulationId,
    },
    #[serde(rename = "simulation-resume")]
    SimulationResumed {
        id: SimulationId,
    },
    /// Acknowledgement that a stop request reached the worker; the registry
    /// transitions to STOPPING on this, never on the relay itself.
    SimulationStopping {
        id: SimulationId,
    },
    SimulationEnd {
        id: SimulationId,
    },
    SimulationUpdateTime {
        id: SimulationId,
        timestamp: Timestamp,
    },
    SimulationUpdateEstimatedEndTime {
        id: SimulationId,
        estimated_end_time: Timestamp,
    },
    SimulationUpdatePolylinesVersion {
        id: SimulationId,
        version: u64,
    },
    /// Live delta, relayed to the client room. At-most-once: the persisted
    /// log is the durable source of truth.
    SimulationUpdate {
        id: SimulationId,
        update: Update,
    },
}

/// One row of the session list broadcast to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SimulationId,
    pub name: String,
    pub status: SimulationStatus,
    pub start_time: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub simulation_start_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub simulation_end_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_simulation_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub estimated_end_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_duration: Option<Timestamp>,
}

/// Pushes sent by the server to the client room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerPush {
    Simulations {
        simulations: Vec<SessionSummary>,
    },
    SimulationUpdate {
        id: SimulationId,
        update: Update,
    },
    MissingSimulationStates {
        id: SimulationId,
        checkpoints: Vec<Environment>,
        updates: Vec<Update>,
    },
    Polylines {
        id: SimulationId,
        polylines: PolylineTable,
    },
    SimulationUpdateTime {
        id: SimulationId,
        timestamp: Timestamp,
    },
    SimulationUpdateEstimatedEndTime {
        id: SimulationId,
        estimated_end_time: Timestamp,
    },
    SimulationUpdatePolylinesVersion {
        id: SimulationId,
        version: u64,
    },
    StartSimulationResponse {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        id: Option<SimulationId>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
}

/// Control messages relayed from the server to one worker connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ControlCommand {
    StopSimulation,
    PauseSimulation,
    ResumeSimulation,
    EditSimulationConfiguration {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        max_duration: Option<Timestamp>,
    },
    /// The session is COMPLETED server-side; the worker may close without
    /// triggering a LOST transition.
    CanDisconnect,
}

/// Anything the server can write to a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Push(ServerPush),
    Control(ControlCommand),
}

impl From<ServerPush> for Outbound {
    fn from(push: ServerPush) -> Self {
        Outbound::Push(push)
    }
}

impl From<ControlCommand> for Outbound {
    fn from(command: ControlCommand) -> Self {
        Outbound::Control(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_kebab_case_tokens() {
        let request = ClientRequest::GetMissingSimulationStates {
            id: SimulationId::from_raw("20250101-080000000---demo"),
            visualization_time: 120.0,
            loaded_orders: vec![0, 1, 2],
        };
        let wire = serde_json::to_string(&request).unwrap();
        assert!(wire.contains("\"kind\":\"get-missing-simulation-states\""));
        assert!(wire.contains("\"visualizationTime\":120.0"));
        assert_eq!(
            serde_json::from_str::<ClientRequest>(&wire).unwrap(),
            request
        );
    }

    #[test]
    fn unit_kinds_round_trip_without_payload() {
        let wire = serde_json::to_string(&ClientRequest::GetSimulations).unwrap();
        assert_eq!(wire, "{\"kind\":\"get-simulations\"}");
        assert_eq!(
            serde_json::from_str::<ClientRequest>(&wire).unwrap(),
            ClientRequest::GetSimulations
        );
    }

    #[test]
    fn handshake_names_its_room() {
        let wire = "{\"kind\":\"join\",\"payload\":{\"room\":\"simulation\"}}";
        assert_eq!(
            serde_json::from_str::<Handshake>(wire).unwrap(),
            Handshake::Join {
                room: Room::Simulation
            }
        );
    }

    #[test]
    fn worker_events_round_trip() {
        let event = WorkerEvent::SimulationIdentification {
            id: SimulationId::from_raw("20250101-080000000---demo"),
            data: "dataset".into(),
            simulation_start_time: Some(0.0),
            timestamp: Some(42.0),
            estimated_end_time: Some(3600.0),
            max_duration: None,
            status: SimulationStatus::Running,
        };
        let wire = serde_json::to_string(&event).unwrap();
        assert!(wire.contains("\"kind\":\"simulation-identification\""));
        assert!(wire.contains("\"status\":\"running\""));
        assert_eq!(serde_json::from_str::<WorkerEvent>(&wire).unwrap(), event);
    }
}
