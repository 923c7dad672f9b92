//! Simulation worker process internals.
//!
//! One worker process executes one simulation, bound to its session id. It
//! connects to the server's simulation room, identifies itself, drives the
//! external engine's event stream through the [`Collector`], and honors
//! pause/resume/stop control messages. If the connection drops mid-run the
//! worker keeps simulating and reconnects with a fresh identification; the
//! log is the durable source of truth and the server surfaces the session
//! as LOST until the re-identification lands.

mod collector;
mod domain;

pub use collector::{CollectError, Collector, LiveSink};
pub use domain::{DomainEvent, EventSource};

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use transitviz_core::{Header, SimulationId, SimulationStatus, Timestamp, Update};

use crate::store::{LogStore, StoreError};
use crate::transport::{ControlCommand, WorkerEvent, WorkerReceiver, WorkerSender, connect_worker};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Configuration for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub server_url: String,
    pub simulation_id: SimulationId,
    pub data: String,
    pub simulations_dir: PathBuf,
    pub max_duration: Option<Timestamp>,
    pub save_step: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Control state shared between the connection task and the drive loop.
struct ControlState {
    paused: AtomicBool,
    stopped: AtomicBool,
    max_time: std::sync::Mutex<Option<Timestamp>>,
    max_time_dirty: AtomicBool,
    /// Wakes the drive loop out of a pause (permit-carrying, so a resume
    /// that lands before the loop parks is not lost).
    wake: Notify,
}

impl ControlState {
    fn new(max_time: Option<Timestamp>) -> Self {
        Self {
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            max_time: std::sync::Mutex::new(max_time),
            max_time_dirty: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn max_time(&self) -> Option<Timestamp> {
        *self.max_time.lock().expect("control state lock poisoned")
    }

    fn take_max_time_dirty(&self) -> bool {
        self.max_time_dirty.swap(false, Ordering::AcqRel)
    }
}

/// Forwards collector notifications onto the worker's outbound channel.
///
/// Best-effort by design: if the connection task is between attempts the
/// events queue up; if it is gone the deltas are dropped and viewers catch
/// up from the log.
struct ChannelSink {
    id: SimulationId,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl ChannelSink {
    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }
}

impl LiveSink for ChannelSink {
    fn started(&mut self, simulation_start_time: Timestamp) {
        self.emit(WorkerEvent::SimulationStart {
            id: self.id.clone(),
            simulation_start_time,
        });
    }

    fn update(&mut self, update: &Update) {
        self.emit(WorkerEvent::SimulationUpdate {
            id: self.id.clone(),
            update: update.clone(),
        });
    }

    fn time_changed(&mut self, timestamp: Timestamp) {
        self.emit(WorkerEvent::SimulationUpdateTime {
            id: self.id.clone(),
            timestamp,
        });
    }

    fn estimated_end_time_changed(&mut self, estimated_end_time: Timestamp) {
        self.emit(WorkerEvent::SimulationUpdateEstimatedEndTime {
            id: self.id.clone(),
            estimated_end_time,
        });
    }

    fn polylines_version_changed(&mut self, version: u64) {
        self.emit(WorkerEvent::SimulationUpdatePolylinesVersion {
            id: self.id.clone(),
            version,
        });
    }
}

/// Run one simulation to completion (or stop), bound to a session id.
pub async fn run_worker(
    config: WorkerConfig,
    mut source: impl EventSource,
) -> Result<(), WorkerError> {
    let store = LogStore::new(&config.simulations_dir);
    let log = store.open(&config.simulation_id)?;
    let header = match log.read_header() {
        Ok(header) => header,
        Err(StoreError::HeaderMissing(_)) => Header::new(&config.simulation_id, &config.data),
        Err(err) => return Err(err.into()),
    };

    let control = Arc::new(ControlState::new(config.max_duration));
    let (events_tx, events_rx) = mpsc::unbounded_channel::<WorkerEvent>();

    let connection = tokio::spawn(connection_task(
        config.clone(),
        header.simulation_start_time,
        Arc::clone(&control),
        events_rx,
    ));

    let sink = ChannelSink {
        id: config.simulation_id.clone(),
        events: events_tx.clone(),
    };
    let mut collector = Collector::new(log, header, sink, config.save_step)?;
    collector.set_max_time(config.max_duration);
    source.set_max_time(config.max_duration);

    loop {
        if control.stopped() {
            tracing::info!("simulation {} stopping on request", config.simulation_id);
            break;
        }
        if control.paused() {
            control.wake.notified().await;
            continue;
        }
        if control.take_max_time_dirty() {
            let max_time = control.max_time();
            collector.set_max_time(max_time);
            source.set_max_time(max_time);
        }

        let Some(event) = source.next_event() else {
            break; // completion sentinel
        };
        collector.process_event(event, source.estimated_end_time())?;

        // The engine pull is synchronous; yield so the connection task
        // stays responsive between events.
        tokio::task::yield_now().await;
    }

    collector.finish()?;
    let _ = events_tx.send(WorkerEvent::SimulationEnd {
        id: config.simulation_id.clone(),
    });
    // Closing the channel tells the connection task to drain, wait for the
    // server's can-disconnect and hang up.
    drop(collector);
    drop(events_tx);

    if tokio::time::timeout(Duration::from_secs(15), connection)
        .await
        .is_err()
    {
        tracing::warn!("connection task still busy at shutdown");
    }

    tracing::info!("simulation {} finished", config.simulation_id);
    Ok(())
}

/// Owns the server connection: sends queued events, applies control
/// commands, and reconnects (with a fresh identification) after a drop.
async fn connection_task(
    config: WorkerConfig,
    simulation_start_time: Option<Timestamp>,
    control: Arc<ControlState>,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    let mut first_attempt = true;

    loop {
        let (mut sender, mut receiver) = match connect_worker(&config.server_url).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!("cannot reach server: {err}; retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        // A fresh session is still STARTING until its first update; after
        // any reconnect we report what the worker is actually doing so a
        // LOST session can adopt it as-is.
        let status = if first_attempt && simulation_start_time.is_none() {
            SimulationStatus::Starting
        } else if control.paused() {
            SimulationStatus::Paused
        } else {
            SimulationStatus::Running
        };
        first_attempt = false;

        let identification = WorkerEvent::SimulationIdentification {
            id: config.simulation_id.clone(),
            data: config.data.clone(),
            simulation_start_time,
            timestamp: None,
            estimated_end_time: None,
            max_duration: control.max_time(),
            status,
        };
        if sender.send(&identification).await.is_err() {
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }

        let reconnect = serve_connection(&config, &control, &mut events, &mut sender, &mut receiver)
            .await;
        if !reconnect {
            return;
        }
        tracing::warn!("server connection lost, reconnecting");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Pump one live connection. Returns `true` to reconnect, `false` when the
/// run is over and the socket was closed cleanly.
async fn serve_connection(
    config: &WorkerConfig,
    control: &ControlState,
    events: &mut mpsc::UnboundedReceiver<WorkerEvent>,
    sender: &mut WorkerSender,
    receiver: &mut WorkerReceiver,
) -> bool {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    // At-most-once: an event that fails to send is gone,
                    // the log already holds it.
                    if sender.send(&event).await.is_err() {
                        return true;
                    }
                }
                None => {
                    // Drive loop is done; give the server a moment to
                    // answer simulation-end with can-disconnect.
                    let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
                        while let Some(command) = receiver.next_command().await {
                            if command == ControlCommand::CanDisconnect {
                                break;
                            }
                        }
                    })
                    .await;
                    let _ = sender.close().await;
                    return false;
                }
            },
            command = receiver.next_command() => match command {
                Some(command) => {
                    if let Some(ack) = apply_command(config, control, command) {
                        if sender.send(&ack).await.is_err() {
                            return true;
                        }
                    }
                }
                None => return true,
            },
        }
    }
}

/// Apply one control command to the shared state; returns the event that
/// acknowledges it, if any.
fn apply_command(
    config: &WorkerConfig,
    control: &ControlState,
    command: ControlCommand,
) -> Option<WorkerEvent> {
    let id = config.simulation_id.clone();
    match command {
        ControlCommand::PauseSimulation => {
            control.paused.store(true, Ordering::Release);
            Some(WorkerEvent::SimulationPaused { id })
        }
        ControlCommand::ResumeSimulation => {
            control.paused.store(false, Ordering::Release);
            control.wake.notify_one();
            Some(WorkerEvent::SimulationResumed { id })
        }
        ControlCommand::StopSimulation => {
            control.stopped.store(true, Ordering::Release);
            control.wake.notify_one();
            Some(WorkerEvent::SimulationStopping { id })
        }
        ControlCommand::EditSimulationConfiguration { max_duration } => {
            *control
                .max_time
                .lock()
                .expect("control state lock poisoned") = max_duration;
            control.max_time_dirty.store(true, Ordering::Release);
            None
        }
        ControlCommand::CanDisconnect => None,
    }
}
