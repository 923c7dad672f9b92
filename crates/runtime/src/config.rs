//! Runtime configuration shared across the server, store and workers.

use std::path::PathBuf;

/// Save a full environment checkpoint every this many records.
pub const STATE_SAVE_STEP: i64 = 1000;

/// Checkpoints kept on each side of the bracketing checkpoint during a
/// resync, so viewers can scrub nearby without a new round trip.
pub const RESYNC_RADIUS: usize = 5;

/// Runtime configuration shared across the orchestrator and workers.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Root directory holding one subdirectory per session.
    pub simulations_dir: PathBuf,
    /// Checkpoint cadence, in records.
    pub state_save_step: i64,
    /// Resync window radius, in checkpoints.
    pub resync_radius: usize,
    /// Buffer size for the server's inbound message channel.
    pub inbound_buffer_size: usize,
    /// How long `terminate` waits for a worker process before killing it.
    pub worker_join_timeout: std::time::Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            simulations_dir: PathBuf::from("saved_simulations"),
            state_save_step: STATE_SAVE_STEP,
            resync_radius: RESYNC_RADIUS,
            inbound_buffer_size: 1024,
            worker_join_timeout: std::time::Duration::from_secs(10),
        }
    }
}
