//! One tracked simulation run.

use transitviz_core::{SimulationId, SimulationStatus, Timestamp};

use crate::transport::{ConnectionId, SessionSummary};

/// In-memory record of one simulation session.
///
/// Owned exclusively by the [`super::SessionRegistry`]; `status` is only
/// ever written there, so what viewers see always reflects what the worker
/// has actually acknowledged.
#[derive(Debug)]
pub struct Session {
    pub id: SimulationId,
    pub name: String,
    pub data: String,
    pub status: SimulationStatus,
    /// Bound worker connection, while one exists.
    pub control_connection: Option<ConnectionId>,
    pub simulation_start_time: Option<Timestamp>,
    pub simulation_end_time: Option<Timestamp>,
    pub current_simulation_time: Option<Timestamp>,
    pub estimated_end_time: Option<Timestamp>,
    pub max_duration: Option<Timestamp>,
}

impl Session {
    pub fn new(id: SimulationId, data: impl Into<String>, status: SimulationStatus) -> Self {
        let name = id.name().unwrap_or_default().to_string();
        Self {
            id,
            name,
            data: data.into(),
            status,
            control_connection: None,
            simulation_start_time: None,
            simulation_end_time: None,
            current_simulation_time: None,
            estimated_end_time: None,
            max_duration: None,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            start_time: self.id.start_time().unwrap_or_default().to_string(),
            data: self.data.clone(),
            simulation_start_time: self.simulation_start_time,
            simulation_end_time: self.simulation_end_time,
            current_simulation_time: self.current_simulation_time,
            estimated_end_time: self.estimated_end_time,
            max_duration: self.max_duration,
        }
    }
}
