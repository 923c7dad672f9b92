//! Event collector: domain events in, persisted and broadcast updates out.
//!
//! The collector is the single writer of its session's log. It assigns
//! orders, interleaves checkpoints at the configured cadence, maintains
//! the polylines side table, and mirrors progress to a [`LiveSink`].

use transitviz_core::{
    ApplyError, Environment, Header, Order, Passenger, PassengerStatus, Timestamp, Update,
    UpdateKind, Vehicle, VehicleStatus,
};

use crate::store::{PolylineLeg, PolylineTable, SessionLog, StoreError};

use super::domain::DomainEvent;

/// Best-effort live notifications emitted alongside persistence.
///
/// Every update is appended to the log before the sink sees it, so a crash
/// between the two can only lose a live delta, never a persisted record.
pub trait LiveSink {
    fn started(&mut self, simulation_start_time: Timestamp);
    fn update(&mut self, update: &Update);
    fn time_changed(&mut self, timestamp: Timestamp);
    fn estimated_end_time_changed(&mut self, estimated_end_time: Timestamp);
    fn polylines_version_changed(&mut self, version: u64);
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("inconsistent delta stream: {0}")]
    Apply(#[from] ApplyError),
}

/// Sole writer of one session's visualization data.
pub struct Collector<S: LiveSink> {
    log: SessionLog,
    sink: S,
    header: Header,
    environment: Environment,
    next_order: Order,
    save_step: i64,
    max_time: Option<Timestamp>,
    polylines: PolylineTable,
}

impl<S: LiveSink> Collector<S> {
    pub fn new(
        log: SessionLog,
        header: Header,
        sink: S,
        save_step: i64,
    ) -> Result<Self, CollectError> {
        log.init_header(&header)?;
        Ok(Self {
            log,
            sink,
            header,
            environment: Environment::empty_base(),
            next_order: 0,
            save_step,
            max_time: None,
            polylines: PolylineTable::default(),
        })
    }

    pub fn set_max_time(&mut self, max_time: Option<Timestamp>) {
        self.max_time = max_time;
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn records_written(&self) -> Order {
        self.next_order
    }

    /// Map one domain event to its update records. Zero, one or two
    /// records result, deterministically per event kind.
    pub fn process_event(
        &mut self,
        event: DomainEvent,
        estimated_end_time: Timestamp,
    ) -> Result<(), CollectError> {
        match event {
            DomainEvent::PassengerReleased { time, id, name } => {
                self.record(
                    UpdateKind::CreatePassenger(Passenger {
                        id,
                        name,
                        status: PassengerStatus::Release,
                    }),
                    time,
                    estimated_end_time,
                )?;
            }
            DomainEvent::PassengerAssigned { time, id } => {
                self.passenger_status(id, PassengerStatus::Assigned, time, estimated_end_time)?;
            }
            DomainEvent::PassengerReady { time, id } => {
                self.passenger_status(id, PassengerStatus::Ready, time, estimated_end_time)?;
            }
            DomainEvent::PassengerBoarded { time, id } => {
                self.passenger_status(id, PassengerStatus::Onboard, time, estimated_end_time)?;
            }
            DomainEvent::PassengerAlighted { time, id } => {
                self.passenger_status(id, PassengerStatus::Complete, time, estimated_end_time)?;
            }
            DomainEvent::VehicleReady {
                time,
                id,
                mode,
                previous_stops,
                current_stop,
                next_stops,
                polylines,
            } => {
                if let Some(legs) = polylines {
                    self.rewrite_polylines(id.clone(), legs)?;
                }
                self.record(
                    UpdateKind::CreateVehicle(Vehicle {
                        id,
                        mode,
                        status: VehicleStatus::Release,
                        position: None,
                        previous_stops,
                        current_stop,
                        next_stops,
                        polylines_version: self.polylines.version,
                    }),
                    time,
                    estimated_end_time,
                )?;
            }
            DomainEvent::VehicleWaiting { time, id } => {
                self.vehicle_status(id, VehicleStatus::Idle, time, estimated_end_time)?;
            }
            DomainEvent::VehicleBoarding { time, id } => {
                self.vehicle_status(id, VehicleStatus::Boarding, time, estimated_end_time)?;
            }
            DomainEvent::VehicleDeparted {
                time,
                id,
                previous_stops,
                current_stop,
                next_stops,
            } => {
                self.vehicle_status(id.clone(), VehicleStatus::Enroute, time, estimated_end_time)?;
                self.record(
                    UpdateKind::UpdateVehicleStops {
                        id,
                        previous_stops,
                        current_stop,
                        next_stops,
                    },
                    time,
                    estimated_end_time,
                )?;
            }
            DomainEvent::VehicleArrived {
                time,
                id,
                previous_stops,
                current_stop,
                next_stops,
            } => {
                self.vehicle_status(
                    id.clone(),
                    VehicleStatus::Alighting,
                    time,
                    estimated_end_time,
                )?;
                self.record(
                    UpdateKind::UpdateVehicleStops {
                        id,
                        previous_stops,
                        current_stop,
                        next_stops,
                    },
                    time,
                    estimated_end_time,
                )?;
            }
            DomainEvent::VehicleCompleted { time, id } => {
                self.vehicle_status(id, VehicleStatus::Complete, time, estimated_end_time)?;
            }
            DomainEvent::VehiclePositionUpdated { time, id, position } => {
                self.record(
                    UpdateKind::UpdateVehiclePosition { id, position },
                    time,
                    estimated_end_time,
                )?;
            }
            DomainEvent::VehicleRouteChanged {
                time,
                id,
                previous_stops,
                current_stop,
                next_stops,
                polylines,
            } => {
                if let Some(legs) = polylines {
                    self.rewrite_polylines(id.clone(), legs)?;
                }
                self.record(
                    UpdateKind::UpdateVehicleStops {
                        id,
                        previous_stops,
                        current_stop,
                        next_stops,
                    },
                    time,
                    estimated_end_time,
                )?;
            }
        }
        Ok(())
    }

    fn passenger_status(
        &mut self,
        id: String,
        status: PassengerStatus,
        time: Timestamp,
        estimated_end_time: Timestamp,
    ) -> Result<(), CollectError> {
        self.record(
            UpdateKind::UpdatePassengerStatus { id, status },
            time,
            estimated_end_time,
        )
    }

    fn vehicle_status(
        &mut self,
        id: String,
        status: VehicleStatus,
        time: Timestamp,
        estimated_end_time: Timestamp,
    ) -> Result<(), CollectError> {
        self.record(
            UpdateKind::UpdateVehicleStatus { id, status },
            time,
            estimated_end_time,
        )
    }

    fn rewrite_polylines(
        &mut self,
        vehicle_id: String,
        legs: Vec<PolylineLeg>,
    ) -> Result<(), CollectError> {
        self.polylines.version += 1;
        self.polylines.vehicles.insert(vehicle_id, legs);
        self.log.set_polylines(&self.polylines)?;
        self.sink.polylines_version_changed(self.polylines.version);
        Ok(())
    }

    fn record(
        &mut self,
        kind: UpdateKind,
        timestamp: Timestamp,
        estimated_end_time: Timestamp,
    ) -> Result<(), CollectError> {
        // Checkpoint cadence: every `save_step`-th record is a snapshot,
        // written before the triggering update is applied. The checkpoint
        // therefore contains exactly the updates with a smaller order.
        if self.next_order % self.save_step == 0 {
            self.environment.order = self.next_order;
            self.log.append_checkpoint(&self.environment)?;
            self.next_order += 1;
        }

        if self.header.simulation_start_time.is_none() {
            self.header.simulation_start_time = Some(timestamp);
            self.log.rewrite_header(&self.header)?;
            self.sink.started(timestamp);
        }

        if self.environment.timestamp != timestamp {
            self.sink.time_changed(timestamp);
        }

        let capped = match self.max_time {
            Some(max_time) => estimated_end_time.min(max_time),
            None => estimated_end_time,
        };
        if capped != self.environment.estimated_end_time {
            self.environment.estimated_end_time = capped;
            self.sink.estimated_end_time_changed(capped);
        }

        let update = Update {
            kind,
            timestamp,
            order: self.next_order,
        };
        self.environment.apply(&update)?;
        self.environment.order = self.next_order;
        self.log.append_update(&update)?;
        self.sink.update(&update);
        self.next_order += 1;
        Ok(())
    }

    /// Stamp the final simulated-clock bounds and last order into the
    /// header. Called once, on the engine's completion sentinel.
    pub fn finish(&mut self) -> Result<(), CollectError> {
        self.header.simulation_end_time = Some(self.environment.timestamp);
        self.header.last_update_order = if self.next_order > 0 {
            Some(self.next_order - 1)
        } else {
            None
        };
        self.log.rewrite_header(&self.header)?;
        Ok(())
    }
}
