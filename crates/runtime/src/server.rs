//! High-level server orchestrator.
//!
//! One logical thread services every connection callback: the accept loop
//! funnels parsed messages into a single channel, and [`ServerRuntime`]
//! drains it, dispatching to the registry. Handlers are short and
//! non-blocking aside from file I/O, and never let a per-session failure
//! escape to the transport layer.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::launcher::WorkerLauncher;
use crate::registry::SessionRegistry;
use crate::replay::ReplayEngine;
use crate::store::LogStore;
use crate::transport::{
    ClientRequest, ConnectionId, Hub, Inbound, Room, ServerPush, WorkerEvent, serve,
};

/// Owns the registry, hub and accept loop for one server process.
pub struct ServerRuntime {
    config: RuntimeConfig,
    registry: SessionRegistry,
    hub: Arc<Hub>,
}

impl ServerRuntime {
    pub fn new(config: RuntimeConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let hub = Arc::new(Hub::new());
        let store = LogStore::new(&config.simulations_dir);
        let engine = ReplayEngine::new(config.resync_radius);
        let registry = SessionRegistry::new(store, engine, Arc::clone(&hub), launcher);
        Self {
            config,
            registry,
            hub,
        }
    }

    /// Serve until a script-room terminate request arrives.
    pub async fn run(mut self, listener: TcpListener) -> Result<()> {
        self.registry.discover_saved();

        let (inbound_tx, mut inbound_rx) =
            mpsc::channel::<Inbound>(self.config.inbound_buffer_size);
        let accept = tokio::spawn(serve(listener, Arc::clone(&self.hub), inbound_tx));

        while let Some(message) = inbound_rx.recv().await {
            match message {
                Inbound::Client { conn, request } => {
                    if self.handle_client(conn, request).await {
                        break;
                    }
                }
                Inbound::Worker { conn, event } => self.handle_worker(conn, event),
                Inbound::Disconnected { conn, room } => {
                    if room == Room::Simulation {
                        self.registry.on_control_disconnect(conn);
                    }
                }
            }
        }

        accept.abort();
        tracing::info!("server loop stopped");
        Ok(())
    }

    /// Returns `true` when the server should shut down.
    async fn handle_client(&mut self, conn: ConnectionId, request: ClientRequest) -> bool {
        match request {
            ClientRequest::StartSimulation {
                name,
                data,
                max_duration,
            } => {
                match self
                    .registry
                    .start_simulation(&name, &data, max_duration)
                    .await
                {
                    Ok(id) => self.hub.send(
                        conn,
                        ServerPush::StartSimulationResponse {
                            id: Some(id),
                            error: None,
                        },
                    ),
                    Err(err) => {
                        // Request validation is the one failure a caller
                        // receives directly instead of a status change.
                        tracing::warn!("start-simulation rejected: {err}");
                        self.hub.send(
                            conn,
                            ServerPush::StartSimulationResponse {
                                id: None,
                                error: Some(err.to_string()),
                            },
                        );
                    }
                }
            }
            ClientRequest::StopSimulation { id } => self.registry.stop_simulation(&id),
            ClientRequest::PauseSimulation { id } => self.registry.pause_simulation(&id),
            ClientRequest::ResumeSimulation { id } => self.registry.resume_simulation(&id),
            ClientRequest::GetSimulations => self.registry.emit_simulations(),
            ClientRequest::GetMissingSimulationStates {
                id,
                visualization_time,
                loaded_orders,
            } => {
                self.registry
                    .get_missing_states(conn, &id, visualization_time, loaded_orders);
            }
            ClientRequest::GetPolylines { id } => self.registry.get_polylines(conn, &id),
            ClientRequest::EditSimulationConfiguration { id, max_duration } => {
                self.registry.edit_configuration(&id, max_duration);
            }
            ClientRequest::Terminate => {
                tracing::info!("terminate requested, stopping all workers");
                self.registry
                    .terminate(self.config.worker_join_timeout)
                    .await;
                return true;
            }
        }
        false
    }

    fn handle_worker(&mut self, conn: ConnectionId, event: WorkerEvent) {
        match event {
            WorkerEvent::SimulationIdentification {
                id,
                data,
                simulation_start_time,
                timestamp,
                estimated_end_time,
                max_duration,
                status,
            } => self.registry.on_worker_identify(
                &id,
                &data,
                simulation_start_time,
                timestamp,
                estimated_end_time,
                max_duration,
                status,
                conn,
            ),
            WorkerEvent::SimulationStart {
                id,
                simulation_start_time,
            } => self
                .registry
                .on_worker_start(&id, simulation_start_time, conn),
            WorkerEvent::SimulationPaused { id } => self.registry.on_worker_pause(&id),
            WorkerEvent::SimulationResumed { id } => self.registry.on_worker_resume(&id),
            WorkerEvent::SimulationStopping { id } => self.registry.on_worker_stopping(&id),
            WorkerEvent::SimulationEnd { id } => self.registry.on_worker_end(&id),
            WorkerEvent::SimulationUpdateTime { id, timestamp } => {
                self.registry.on_update_time(&id, timestamp);
            }
            WorkerEvent::SimulationUpdateEstimatedEndTime {
                id,
                estimated_end_time,
            } => {
                self.registry
                    .on_update_estimated_end_time(&id, estimated_end_time);
            }
            WorkerEvent::SimulationUpdatePolylinesVersion { id, version } => {
                self.registry.on_update_polylines_version(&id, version);
            }
            WorkerEvent::SimulationUpdate { id, update } => {
                self.registry.on_live_update(&id, update);
            }
        }
    }
}
