//! Status enums shared between the registry, the log format and the wire.
//!
//! All statuses round-trip through stable lowercase string tokens rather
//! than numeric codes, so the on-disk format stays forward-compatible when
//! variants are added.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a simulation session.
///
/// `Starting`/`Running`/`Paused`/`Stopping`/`Lost` describe a session bound
/// (or expected to be bound) to a live worker; the rest are assigned only
/// from persisted-log inspection and never transition back.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SimulationStatus {
    Starting,
    Paused,
    Running,
    Stopping,
    Completed,
    Lost,
    Corrupted,
    Outdated,
    Future,
}

impl SimulationStatus {
    /// Whether the session should currently have a worker process behind it.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::Paused | Self::Stopping | Self::Lost
        )
    }
}

/// Status of a passenger within the simulated environment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PassengerStatus {
    Release,
    Assigned,
    Ready,
    Onboard,
    Complete,
}

/// Status of a vehicle within the simulated environment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VehicleStatus {
    Release,
    Idle,
    Boarding,
    Enroute,
    Alighting,
    Complete,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn simulation_status_tokens_round_trip() {
        for status in [
            SimulationStatus::Starting,
            SimulationStatus::Paused,
            SimulationStatus::Running,
            SimulationStatus::Stopping,
            SimulationStatus::Completed,
            SimulationStatus::Lost,
            SimulationStatus::Corrupted,
            SimulationStatus::Outdated,
            SimulationStatus::Future,
        ] {
            let token = status.to_string();
            assert_eq!(SimulationStatus::from_str(&token).unwrap(), status);
        }
    }

    #[test]
    fn entity_status_tokens_are_lowercase() {
        assert_eq!(VehicleStatus::Enroute.to_string(), "enroute");
        assert_eq!(PassengerStatus::Onboard.to_string(), "onboard");
        assert_eq!(
            serde_json::to_string(&VehicleStatus::Alighting).unwrap(),
            "\"alighting\""
        );
    }

    #[test]
    fn live_statuses_expect_a_worker() {
        assert!(SimulationStatus::Lost.is_live());
        assert!(SimulationStatus::Stopping.is_live());
        assert!(!SimulationStatus::Completed.is_live());
        assert!(!SimulationStatus::Corrupted.is_live());
    }
}
