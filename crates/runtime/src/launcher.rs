//! Spawning and joining simulation worker processes.
//!
//! Each simulation runs as an independent OS process; true parallelism is
//! across sessions, not within the registry. The launcher trait keeps the
//! registry testable without forking real processes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use transitviz_core::{SimulationId, Timestamp};

use crate::error::{Result, RuntimeError};

/// Handle on a spawned worker process.
///
/// `detached` covers workers this process does not own (re-identified
/// after a server restart) and test doubles.
pub struct WorkerHandle {
    child: Option<Child>,
}

impl WorkerHandle {
    pub fn detached() -> Self {
        Self { child: None }
    }

    pub fn from_child(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// Wait for the worker to exit, killing it after `timeout`.
    ///
    /// Stopping a session never blocks the registry on this; only callers
    /// that must guarantee termination (server shutdown) join explicitly.
    pub async fn join(mut self, timeout: Duration) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                if !status.success() {
                    tracing::warn!("worker exited with status {status}");
                }
                Ok(())
            }
            Ok(Err(err)) => Err(RuntimeError::WorkerJoin(err)),
            Err(_elapsed) => {
                tracing::warn!("worker did not exit within {timeout:?}, killing it");
                child.kill().await.map_err(RuntimeError::WorkerJoin)?;
                Ok(())
            }
        }
    }
}

/// Spawns one worker process per simulation, bound to a session id.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn spawn(
        &self,
        id: &SimulationId,
        data: &str,
        max_duration: Option<Timestamp>,
    ) -> Result<WorkerHandle>;
}

/// Launches the server executable in worker mode.
pub struct ProcessLauncher {
    program: PathBuf,
    server_url: String,
    simulations_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(
        program: impl Into<PathBuf>,
        server_url: impl Into<String>,
        simulations_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            server_url: server_url.into(),
            simulations_dir: simulations_dir.into(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn spawn(
        &self,
        id: &SimulationId,
        data: &str,
        max_duration: Option<Timestamp>,
    ) -> Result<WorkerHandle> {
        let mut command = Command::new(&self.program);
        command
            .arg("worker")
            .arg("--simulation-id")
            .arg(id.as_str())
            .arg("--data")
            .arg(data)
            .arg("--server-url")
            .arg(&self.server_url)
            .arg("--simulations-dir")
            .arg(&self.simulations_dir);
        if let Some(max_duration) = max_duration {
            command.arg("--max-duration").arg(max_duration.to_string());
        }

        let child = command.spawn().map_err(RuntimeError::WorkerSpawn)?;
        tracing::info!("spawned worker for {id} (pid {:?})", child.id());
        Ok(WorkerHandle::from_child(child))
    }
}
