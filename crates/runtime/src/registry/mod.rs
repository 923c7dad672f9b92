//! Session registry and lifecycle state machine.
//!
//! The registry owns the `SimulationId -> Session` table behind the single
//! server loop. Control relays (stop/pause/resume/edit) never mutate
//! status themselves: status changes only on the worker's own
//! acknowledgement events, so what viewers see always reflects what the
//! worker has actually done. Operations referencing an unknown session log
//! an error and no-op toward external callers.

mod session;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use transitviz_core::{Header, Order, SimulationId, SimulationStatus, Timestamp, VersionClass};

pub use session::Session;

use crate::error::{Result, RuntimeError};
use crate::launcher::{WorkerHandle, WorkerLauncher};
use crate::replay::ReplayEngine;
use crate::store::{LogStore, StoreError};
use crate::transport::{ConnectionId, ControlCommand, Hub, Room, ServerPush};

/// In-memory table of every known session, live or persisted.
pub struct SessionRegistry {
    sessions: HashMap<SimulationId, Session>,
    workers: HashMap<SimulationId, WorkerHandle>,
    store: LogStore,
    engine: ReplayEngine,
    hub: Arc<Hub>,
    launcher: Arc<dyn WorkerLauncher>,
}

impl SessionRegistry {
    pub fn new(
        store: LogStore,
        engine: ReplayEngine,
        hub: Arc<Hub>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            workers: HashMap::new(),
            store,
            engine,
            hub,
            launcher,
        }
    }

    pub fn session(&self, id: &SimulationId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Register sessions found in the simulations directory.
    ///
    /// Static terminal statuses (COMPLETED, OUTDATED, FUTURE, CORRUPTED)
    /// are assigned here from log inspection only. A current-version log
    /// without an end time was interrupted mid-run: it surfaces as LOST so
    /// a still-alive worker can re-identify and adopt it.
    pub fn discover_saved(&mut self) {
        let ids = match self.store.list_sessions() {
            Ok(ids) => ids,
            Err(err) => {
                tracing::error!("failed to scan simulations directory: {err}");
                return;
            }
        };

        for id in ids {
            if self.sessions.contains_key(&id) {
                continue;
            }
            let log = match self.store.open(&id) {
                Ok(log) => log,
                Err(err) => {
                    tracing::error!("failed to open session {id}: {err}");
                    continue;
                }
            };

            let session = match log.classify() {
                Ok(class) => {
                    let header = match log.read_header() {
                        Ok(header) => header,
                        Err(err) => {
                            tracing::warn!("skipping session {id} without header: {err}");
                            continue;
                        }
                    };
                    let status = match class {
                        VersionClass::Current if header.simulation_end_time.is_some() => {
                            SimulationStatus::Completed
                        }
                        VersionClass::Current => SimulationStatus::Lost,
                        VersionClass::Outdated => SimulationStatus::Outdated,
                        VersionClass::Future => SimulationStatus::Future,
                    };
                    let mut session = Session::new(id.clone(), header.data, status);
                    session.simulation_start_time = header.simulation_start_time;
                    session.simulation_end_time = header.simulation_end_time;
                    session.current_simulation_time = header.simulation_end_time;
                    session
                }
                Err(StoreError::Corrupted(_)) => {
                    Session::new(id.clone(), "", SimulationStatus::Corrupted)
                }
                Err(StoreError::HeaderMissing(_)) => {
                    tracing::warn!("skipping empty session directory {id}");
                    continue;
                }
                Err(err) => {
                    tracing::error!("failed to classify session {id}: {err}");
                    continue;
                }
            };

            self.sessions.insert(id, session);
        }

        tracing::info!("registry knows {} session(s)", self.sessions.len());
    }

    /// Validate the name, allocate an id, spawn the worker process and
    /// record the session as STARTING.
    pub async fn start_simulation(
        &mut self,
        name: &str,
        data: &str,
        max_duration: Option<Timestamp>,
    ) -> Result<SimulationId> {
        let id = SimulationId::generate(name).map_err(RuntimeError::Validation)?;

        let log = self.store.open(&id)?;
        log.init_header(&Header::new(&id, data))?;

        let handle = self.launcher.spawn(&id, data, max_duration).await?;
        self.workers.insert(id.clone(), handle);

        let mut session = Session::new(id.clone(), data, SimulationStatus::Starting);
        session.max_duration = max_duration;
        self.sessions.insert(id.clone(), session);

        tracing::info!("started simulation {id}");
        self.emit_simulations();
        Ok(id)
    }

    fn session_mut(&mut self, id: &SimulationId) -> Option<&mut Session> {
        let session = self.sessions.get_mut(id);
        if session.is_none() {
            tracing::error!("simulation {id} not found");
        }
        session
    }

    // ------------------------------------------------------------------
    // Control relays: forwarded to the worker's bound connection, status
    // untouched.
    // ------------------------------------------------------------------

    fn relay(&mut self, id: &SimulationId, command: ControlCommand) {
        let Some(session) = self.session_mut(id) else {
            return;
        };
        let Some(conn) = session.control_connection else {
            tracing::error!("simulation {id} has no bound control connection");
            return;
        };
        self.hub.send(conn, command);
    }

    pub fn stop_simulation(&mut self, id: &SimulationId) {
        self.relay(id, ControlCommand::StopSimulation);
    }

    pub fn pause_simulation(&mut self, id: &SimulationId) {
        self.relay(id, ControlCommand::PauseSimulation);
    }

    pub fn resume_simulation(&mut self, id: &SimulationId) {
        self.relay(id, ControlCommand::ResumeSimulation);
    }

    /// Forwarded live to the worker; takes effect on its next estimated
    /// end time computation.
    pub fn edit_configuration(&mut self, id: &SimulationId, max_duration: Option<Timestamp>) {
        let Some(session) = self.session_mut(id) else {
            return;
        };
        session.max_duration = max_duration;
        self.relay(id, ControlCommand::EditSimulationConfiguration { max_duration });
        self.emit_simulations();
    }

    // ------------------------------------------------------------------
    // Worker acknowledgement events: the only place statuses move.
    // ------------------------------------------------------------------

    pub fn on_worker_start(
        &mut self,
        id: &SimulationId,
        simulation_start_time: Timestamp,
        conn: ConnectionId,
    ) {
        let Some(session) = self.session_mut(id) else {
            return;
        };
        session.status = SimulationStatus::Running;
        session.simulation_start_time = Some(simulation_start_time);
        session.control_connection = Some(conn);
        self.emit_simulations();
    }

    pub fn on_worker_pause(&mut self, id: &SimulationId) {
        if let Some(session) = self.session_mut(id) {
            session.status = SimulationStatus::Paused;
            self.emit_simulations();
        }
    }

    pub fn on_worker_resume(&mut self, id: &SimulationId) {
        if let Some(session) = self.session_mut(id) {
            session.status = SimulationStatus::Running;
            self.emit_simulations();
        }
    }

    pub fn on_worker_stopping(&mut self, id: &SimulationId) {
        if let Some(session) = self.session_mut(id) {
            session.status = SimulationStatus::Stopping;
            self.emit_simulations();
        }
    }

    pub fn on_worker_end(&mut self, id: &SimulationId) {
        let Some(session) = self.session_mut(id) else {
            return;
        };
        session.status = SimulationStatus::Completed;
        session.simulation_end_time = session.current_simulation_time;
        let conn = session.control_connection;
        if let Some(conn) = conn {
            self.hub.send(conn, ControlCommand::CanDisconnect);
        }
        self.emit_simulations();
    }

    /// Adopt a re-identifying worker.
    ///
    /// A no-op unless the session is known and currently LOST; this guards
    /// against a duplicate identification racing a still-healthy
    /// connection. Replaying the same identification twice has no further
    /// effect once adopted.
    #[allow(clippy::too_many_arguments)]
    pub fn on_worker_identify(
        &mut self,
        id: &SimulationId,
        data: &str,
        simulation_start_time: Option<Timestamp>,
        timestamp: Option<Timestamp>,
        estimated_end_time: Option<Timestamp>,
        max_duration: Option<Timestamp>,
        status: SimulationStatus,
        conn: ConnectionId,
    ) {
        match self.sessions.get_mut(id) {
            None => {
                tracing::error!("ignoring identification for unknown simulation {id}");
            }
            Some(session) if session.status != SimulationStatus::Lost => {
                tracing::debug!(
                    "ignoring identification for {id}: status is {}, not lost",
                    session.status
                );
            }
            Some(session) => {
                tracing::info!("simulation {id} re-identified as {status}");
                session.status = status;
                session.data = data.to_string();
                session.simulation_start_time = simulation_start_time;
                session.current_simulation_time = timestamp;
                session.estimated_end_time = estimated_end_time;
                session.max_duration = max_duration;
                session.control_connection = Some(conn);
                self.emit_simulations();
            }
        }
    }

    /// Unexpected loss of a bound control connection.
    ///
    /// COMPLETED sessions disconnect as part of the `can-disconnect`
    /// handshake; anything else still live transitions to LOST.
    pub fn on_control_disconnect(&mut self, conn: ConnectionId) {
        let Some(session) = self
            .sessions
            .values_mut()
            .find(|session| session.control_connection == Some(conn))
        else {
            tracing::debug!("disconnect of unbound connection {conn}");
            return;
        };

        session.control_connection = None;
        if session.status == SimulationStatus::Completed {
            return;
        }

        tracing::warn!("lost worker connection for simulation {}", session.id);
        session.status = SimulationStatus::Lost;
        self.emit_simulations();
    }

    // ------------------------------------------------------------------
    // Live progress mirroring and viewer queries.
    // ------------------------------------------------------------------

    pub fn on_update_time(&mut self, id: &SimulationId, timestamp: Timestamp) {
        let Some(session) = self.session_mut(id) else {
            return;
        };
        session.current_simulation_time = Some(timestamp);
        self.hub.broadcast(
            Room::Client,
            ServerPush::SimulationUpdateTime {
                id: id.clone(),
                timestamp,
            },
        );
    }

    pub fn on_update_estimated_end_time(&mut self, id: &SimulationId, estimated_end_time: Timestamp) {
        let Some(session) = self.session_mut(id) else {
            return;
        };
        session.estimated_end_time = Some(estimated_end_time);
        self.hub.broadcast(
            Room::Client,
            ServerPush::SimulationUpdateEstimatedEndTime {
                id: id.clone(),
                estimated_end_time,
            },
        );
    }

    pub fn on_update_polylines_version(&mut self, id: &SimulationId, version: u64) {
        if self.session_mut(id).is_none() {
            return;
        }
        self.hub.broadcast(
            Room::Client,
            ServerPush::SimulationUpdatePolylinesVersion {
                id: id.clone(),
                version,
            },
        );
    }

    /// Relay one live delta to viewers. At-most-once delivery; the log is
    /// the durable source of truth.
    pub fn on_live_update(&mut self, id: &SimulationId, update: transitviz_core::Update) {
        if self.session_mut(id).is_none() {
            return;
        }
        self.hub.broadcast(
            Room::Client,
            ServerPush::SimulationUpdate {
                id: id.clone(),
                update,
            },
        );
    }

    /// Answer a viewer resync request with the minimal missing records.
    pub fn get_missing_states(
        &mut self,
        conn: ConnectionId,
        id: &SimulationId,
        visualization_time: Timestamp,
        loaded_orders: Vec<Order>,
    ) {
        if self.sessions.get(id).is_none() {
            tracing::error!("simulation {id} not found");
            return;
        }
        let log = match self.store.open(id) {
            Ok(log) => log,
            Err(err) => {
                tracing::error!("failed to open session {id}: {err}");
                return;
            }
        };

        let loaded: BTreeSet<Order> = loaded_orders.into_iter().collect();
        match self.engine.resync(&log, visualization_time, &loaded) {
            Ok(payload) => {
                self.hub.send(
                    conn,
                    ServerPush::MissingSimulationStates {
                        id: id.clone(),
                        checkpoints: payload.checkpoints,
                        updates: payload.updates,
                    },
                );
            }
            Err(StoreError::Corrupted(_)) => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.status = SimulationStatus::Corrupted;
                }
                self.emit_simulations();
            }
            Err(err) => {
                tracing::error!("resync for {id} failed: {err}");
            }
        }
    }

    pub fn get_polylines(&mut self, conn: ConnectionId, id: &SimulationId) {
        if self.sessions.get(id).is_none() {
            tracing::error!("simulation {id} not found");
            return;
        }
        let polylines = self
            .store
            .open(id)
            .and_then(|log| log.get_polylines());
        match polylines {
            Ok(polylines) => {
                self.hub.send(
                    conn,
                    ServerPush::Polylines {
                        id: id.clone(),
                        polylines,
                    },
                );
            }
            Err(err) => tracing::error!("failed to read polylines for {id}: {err}"),
        }
    }

    /// Broadcast the current session list to every viewer.
    pub fn emit_simulations(&self) {
        let mut simulations: Vec<_> = self
            .sessions
            .values()
            .map(Session::summary)
            .collect();
        simulations.sort_by(|a, b| a.id.cmp(&b.id));
        self.hub
            .broadcast(Room::Client, ServerPush::Simulations { simulations });
    }

    /// Relay stop to every live worker, then join their processes.
    ///
    /// The stop signal itself is asynchronous; the join (with timeout and
    /// kill) is what guarantees termination for server shutdown.
    pub async fn terminate(&mut self, join_timeout: Duration) {
        let live: Vec<SimulationId> = self
            .sessions
            .values()
            .filter(|session| session.status.is_live() && session.control_connection.is_some())
            .map(|session| session.id.clone())
            .collect();
        for id in live {
            self.stop_simulation(&id);
        }

        let workers: Vec<_> = self.workers.drain().collect();
        for (id, handle) in workers {
            if let Err(err) = handle.join(join_timeout).await {
                tracing::error!("failed to join worker for {id}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use transitviz_core::{NameError, SAVE_VERSION, SaveVersion};

    struct MockLauncher {
        spawned: Mutex<Vec<SimulationId>>,
    }

    impl MockLauncher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                spawned: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WorkerLauncher for MockLauncher {
        async fn spawn(
            &self,
            id: &SimulationId,
            _data: &str,
            _max_duration: Option<Timestamp>,
        ) -> Result<WorkerHandle> {
            self.spawned.lock().unwrap().push(id.clone());
            Ok(WorkerHandle::detached())
        }
    }

    fn registry(dir: &TempDir) -> (SessionRegistry, Arc<MockLauncher>, Arc<Hub>) {
        let launcher = MockLauncher::new();
        let hub = Arc::new(Hub::new());
        let registry = SessionRegistry::new(
            LogStore::new(dir.path()),
            ReplayEngine::new(1),
            Arc::clone(&hub),
            launcher.clone() as Arc<dyn WorkerLauncher>,
        );
        (registry, launcher, hub)
    }

    #[tokio::test]
    async fn start_rejects_invalid_names_before_allocating() {
        let dir = TempDir::new().unwrap();
        let (mut registry, launcher, _hub) = registry(&dir);

        let err = registry.start_simulation("ab", "dataset", None).await;
        assert!(matches!(
            err,
            Err(RuntimeError::Validation(NameError::TooShort))
        ));
        assert!(launcher.spawned.lock().unwrap().is_empty());
        assert!(registry.sessions.is_empty());
    }

    #[tokio::test]
    async fn start_spawns_a_worker_and_records_starting() {
        let dir = TempDir::new().unwrap();
        let (mut registry, launcher, _hub) = registry(&dir);

        let id = registry
            .start_simulation("rush-hour", "dataset", Some(3600.0))
            .await
            .unwrap();
        assert_eq!(launcher.spawned.lock().unwrap().as_slice(), &[id.clone()]);

        let session = registry.session(&id).unwrap();
        assert_eq!(session.status, SimulationStatus::Starting);
        assert_eq!(session.max_duration, Some(3600.0));

        // The log exists with its header before the worker produces events.
        let log = registry.store.open(&id).unwrap();
        assert_eq!(log.read_header().unwrap().data, "dataset");
    }

    #[tokio::test]
    async fn lifecycle_follows_worker_acknowledgements() {
        let dir = TempDir::new().unwrap();
        let (mut registry, _launcher, hub) = registry(&dir);
        let (conn, mut worker_rx) = hub.register(Room::Simulation);

        let id = registry
            .start_simulation("rush-hour", "dataset", None)
            .await
            .unwrap();

        registry.on_worker_start(&id, 0.0, conn);
        assert_eq!(
            registry.session(&id).unwrap().status,
            SimulationStatus::Running
        );

        // Relays do not mutate status.
        registry.stop_simulation(&id);
        assert_eq!(
            registry.session(&id).unwrap().status,
            SimulationStatus::Running
        );
        assert!(matches!(
            worker_rx.try_recv().unwrap(),
            crate::transport::Outbound::Control(ControlCommand::StopSimulation)
        ));

        registry.on_worker_stopping(&id);
        assert_eq!(
            registry.session(&id).unwrap().status,
            SimulationStatus::Stopping
        );

        registry.on_update_time(&id, 42.0);
        registry.on_worker_end(&id);
        let session = registry.session(&id).unwrap();
        assert_eq!(session.status, SimulationStatus::Completed);
        assert_eq!(session.simulation_end_time, Some(42.0));
        assert!(matches!(
            worker_rx.try_recv().unwrap(),
            crate::transport::Outbound::Control(ControlCommand::CanDisconnect)
        ));

        // Expected disconnect after completion: no LOST transition.
        registry.on_control_disconnect(conn);
        assert_eq!(
            registry.session(&id).unwrap().status,
            SimulationStatus::Completed
        );
    }

    #[tokio::test]
    async fn lost_and_reidentification_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut registry, _launcher, hub) = registry(&dir);
        let (conn, _rx) = hub.register(Room::Simulation);

        let id = registry
            .start_simulation("rush-hour", "dataset", None)
            .await
            .unwrap();
        registry.on_worker_start(&id, 0.0, conn);

        // Identification while healthy is a no-op.
        let (other, _other_rx) = hub.register(Room::Simulation);
        registry.on_worker_identify(
            &id,
            "other-data",
            None,
            None,
            None,
            None,
            SimulationStatus::Paused,
            other,
        );
        let session = registry.session(&id).unwrap();
        assert_eq!(session.status, SimulationStatus::Running);
        assert_eq!(session.control_connection, Some(conn));

        registry.on_control_disconnect(conn);
        assert_eq!(
            registry.session(&id).unwrap().status,
            SimulationStatus::Lost
        );

        registry.on_worker_identify(
            &id,
            "dataset",
            Some(0.0),
            Some(17.0),
            Some(900.0),
            None,
            SimulationStatus::Running,
            other,
        );
        let session = registry.session(&id).unwrap();
        assert_eq!(session.status, SimulationStatus::Running);
        assert_eq!(session.control_connection, Some(other));
        assert_eq!(session.current_simulation_time, Some(17.0));

        // Replaying the identification has no additional effect.
        registry.on_worker_identify(
            &id,
            "dataset",
            Some(0.0),
            Some(17.0),
            Some(900.0),
            None,
            SimulationStatus::Running,
            other,
        );
        assert_eq!(
            registry.session(&id).unwrap().status,
            SimulationStatus::Running
        );
    }

    #[tokio::test]
    async fn unknown_sessions_are_noops() {
        let dir = TempDir::new().unwrap();
        let (mut registry, _launcher, hub) = registry(&dir);
        let (conn, _rx) = hub.register(Room::Simulation);
        let ghost = SimulationId::from_raw("20250101-080000000---ghost");

        registry.stop_simulation(&ghost);
        registry.pause_simulation(&ghost);
        registry.on_worker_start(&ghost, 0.0, conn);
        registry.on_worker_identify(
            &ghost,
            "",
            None,
            None,
            None,
            None,
            SimulationStatus::Running,
            conn,
        );
        assert!(registry.sessions.is_empty());
    }

    #[tokio::test]
    async fn discovery_classifies_persisted_logs() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path());

        // Completed: current version with an end time.
        let completed = SimulationId::from_raw("20250101-080000000---done");
        let log = store.open(&completed).unwrap();
        let mut header = Header::new(&completed, "dataset");
        header.simulation_start_time = Some(0.0);
        header.simulation_end_time = Some(100.0);
        log.init_header(&header).unwrap();

        // Interrupted: current version, no end time.
        let interrupted = SimulationId::from_raw("20250101-090000000---interrupted");
        let log = store.open(&interrupted).unwrap();
        log.init_header(&Header::new(&interrupted, "dataset"))
            .unwrap();

        // Outdated and future versions.
        let outdated = SimulationId::from_raw("20250101-100000000---old");
        let log = store.open(&outdated).unwrap();
        let mut header = Header::new(&outdated, "dataset");
        header.version = SaveVersion { major: 8, minor: 3 };
        log.init_header(&header).unwrap();

        let future = SimulationId::from_raw("20250101-110000000---new");
        let log = store.open(&future).unwrap();
        let mut header = Header::new(&future, "dataset");
        header.version = SaveVersion {
            major: SAVE_VERSION.major,
            minor: SAVE_VERSION.minor + 1,
        };
        log.init_header(&header).unwrap();

        // Corrupted, regardless of content.
        let corrupted = SimulationId::from_raw("20250101-120000000---bad");
        let log = store.open(&corrupted).unwrap();
        log.init_header(&Header::new(&corrupted, "dataset")).unwrap();
        log.mark_corrupted().unwrap();

        let (mut registry, _launcher, _hub) = registry(&dir);
        registry.discover_saved();

        let status = |id: &SimulationId| registry.session(id).unwrap().status;
        assert_eq!(status(&completed), SimulationStatus::Completed);
        assert_eq!(status(&interrupted), SimulationStatus::Lost);
        assert_eq!(status(&outdated), SimulationStatus::Outdated);
        assert_eq!(status(&future), SimulationStatus::Future);
        assert_eq!(status(&corrupted), SimulationStatus::Corrupted);
    }

    #[tokio::test]
    async fn resync_failure_surfaces_corruption_to_viewers() {
        let dir = TempDir::new().unwrap();
        let (mut registry, _launcher, hub) = registry(&dir);
        let (viewer, mut viewer_rx) = hub.register(Room::Client);

        let id = registry
            .start_simulation("rush-hour", "dataset", None)
            .await
            .unwrap();
        // Damage the log behind the registry's back: a garbage record after
        // the valid header.
        let log = registry.store.open(&id).unwrap();
        let mut content = std::fs::read_to_string(log.log_path()).unwrap();
        content.push_str("not json\n");
        std::fs::write(log.log_path(), content).unwrap();

        // Drain the session-list broadcasts emitted so far.
        while viewer_rx.try_recv().is_ok() {}

        registry.get_missing_states(viewer, &id, 10.0, Vec::new());
        assert_eq!(
            registry.session(&id).unwrap().status,
            SimulationStatus::Corrupted
        );

        // The viewer was told via a fresh session list, not an error.
        let mut saw_corrupted = false;
        while let Ok(outbound) = viewer_rx.try_recv() {
            if let crate::transport::Outbound::Push(ServerPush::Simulations { simulations }) =
                outbound
            {
                saw_corrupted = simulations
                    .iter()
                    .any(|s| s.status == SimulationStatus::Corrupted);
            }
        }
        assert!(saw_corrupted);
    }
}
