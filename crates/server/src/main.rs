//! TransitViz server binary.
//!
//! Composition root with two entry modes:
//! - default: the coordination server (registry, transport, log store)
//! - `worker`: one simulation process bound to a session id, spawned by
//!   the registry with `transitviz worker --simulation-id ... --data ...`
//!
//! Configuration comes from the environment (optionally a `.env` file):
//! `TRANSITVIZ_HOST`, `TRANSITVIZ_PORT`, `TRANSITVIZ_SIMULATIONS_DIR`,
//! `TRANSITVIZ_DATA_DIR`, `TRANSITVIZ_LOG_DIR`.

mod scripted;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use transitviz_core::SimulationId;
use transitviz_runtime::config::STATE_SAVE_STEP;
use transitviz_runtime::worker::{WorkerConfig, run_worker};
use transitviz_runtime::{ProcessLauncher, RuntimeConfig, ServerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => server_main().await,
        Some("worker") => worker_main(args.collect()).await,
        Some(other) => bail!("unknown mode `{other}` (expected no mode or `worker`)"),
    }
}

async fn server_main() -> Result<()> {
    setup_logging("server")?;

    let host = env_or("TRANSITVIZ_HOST", "127.0.0.1");
    let port: u16 = env_or("TRANSITVIZ_PORT", "8765")
        .parse()
        .context("invalid TRANSITVIZ_PORT")?;
    let simulations_dir = PathBuf::from(env_or("TRANSITVIZ_SIMULATIONS_DIR", "saved_simulations"));

    let config = RuntimeConfig {
        simulations_dir: simulations_dir.clone(),
        ..RuntimeConfig::default()
    };

    let program = std::env::current_exe().context("cannot locate own executable")?;
    let server_url = format!("ws://{host}:{port}");
    let launcher = Arc::new(ProcessLauncher::new(
        program,
        server_url.clone(),
        simulations_dir,
    ));

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    tracing::info!("listening on {server_url}");

    ServerRuntime::new(config, launcher).run(listener).await?;
    Ok(())
}

async fn worker_main(args: Vec<String>) -> Result<()> {
    let options = WorkerOptions::parse(args)?;
    setup_logging("worker")?;

    let data_dir = PathBuf::from(env_or("TRANSITVIZ_DATA_DIR", "data"));
    let events_path = data_dir.join(&options.data).join("events.jsonl");
    let source = scripted::ScriptedSource::load(&events_path)?;

    let config = WorkerConfig {
        server_url: options.server_url,
        simulation_id: SimulationId::from_raw(options.simulation_id),
        data: options.data,
        simulations_dir: options.simulations_dir,
        max_duration: options.max_duration,
        save_step: STATE_SAVE_STEP,
    };
    run_worker(config, source).await?;
    Ok(())
}

struct WorkerOptions {
    simulation_id: String,
    data: String,
    server_url: String,
    simulations_dir: PathBuf,
    max_duration: Option<f64>,
}

impl WorkerOptions {
    fn parse(args: Vec<String>) -> Result<Self> {
        let mut simulation_id = None;
        let mut data = None;
        let mut server_url = None;
        let mut simulations_dir = None;
        let mut max_duration = None;

        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            let mut value = || {
                args.next()
                    .with_context(|| format!("missing value for {flag}"))
            };
            match flag.as_str() {
                "--simulation-id" => simulation_id = Some(value()?),
                "--data" => data = Some(value()?),
                "--server-url" => server_url = Some(value()?),
                "--simulations-dir" => simulations_dir = Some(PathBuf::from(value()?)),
                "--max-duration" => {
                    max_duration =
                        Some(value()?.parse().context("invalid --max-duration value")?);
                }
                other => bail!("unknown worker flag `{other}`"),
            }
        }

        Ok(Self {
            simulation_id: simulation_id.context("--simulation-id is required")?,
            data: data.context("--data is required")?,
            server_url: server_url.context("--server-url is required")?,
            simulations_dir: simulations_dir.context("--simulations-dir is required")?,
            max_duration,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Log to stderr and to a per-component file under the log directory.
fn setup_logging(component: &str) -> Result<()> {
    let log_dir = PathBuf::from(env_or("TRANSITVIZ_LOG_DIR", "logs"));
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(&log_dir, format!("{component}.log"));
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    // Keep the file writer alive for the lifetime of the process.
    std::mem::forget(guard);

    tracing::info!("logging initialized: {}/{component}.log", log_dir.display());
    Ok(())
}
