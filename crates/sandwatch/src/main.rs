//! Sandwatch - realtime sandbox telemetry sensor
//!
//! Follows the monitor event streams of running analyses, raises signature
//! detections and recovers TLS session keys, reporting everything over the
//! event bus.

mod tasks;

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use sandwatch_bus::{BusClient, BusClientConfig, JsonlPublisher, JsonlPublisherConfig};
use sandwatch_core::config::{ConfigLoader, SensorConfig};
use sandwatch_core::{Dispatcher, Notification, NullPublisher, ProcessTree, Publisher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasks::TaskContext;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sandwatch")]
#[command(version)]
#[command(about = "Realtime sandbox telemetry sensor", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "SANDWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the event bus and process task notifications
    Run {
        /// Event bus address (host:port)
        addr: String,

        /// Sandbox working directory containing storage/analyses
        cwd: PathBuf,
    },

    /// Decode a local event log without a bus connection
    Replay {
        /// Monitor event log
        file: PathBuf,

        /// Write notifications to this JSONL file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Task id attached to the notifications
        #[arg(long, default_value = "0")]
        task_id: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let sensor_config = load_config(cli.config.clone());

    // CLI verbose flag takes precedence, then config
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match sensor_config.sensor.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { addr, cwd } => run_command(sensor_config, addr, cwd).await,
        Commands::Replay {
            file,
            output,
            task_id,
        } => replay_command(sensor_config, &file, output, task_id).await,
    }
}

/// Load configuration, falling back to defaults on error
fn load_config(cli_path: Option<PathBuf>) -> SensorConfig {
    match ConfigLoader::new().with_cli_path(cli_path).load() {
        Ok(config) => config,
        Err(e) => {
            // Logging is not set up yet
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            SensorConfig::default()
        }
    }
}

async fn run_command(config: SensorConfig, addr: String, cwd: PathBuf) -> anyhow::Result<()> {
    info!("Sandwatch {} starting", sandwatch_core::SENSOR_VERSION);
    info!("Event bus: {}, working directory: {}", addr, cwd.display());

    let client = BusClient::new(BusClientConfig::from_settings(addr, &config.bus));
    let publisher: Arc<dyn Publisher> = Arc::new(client.publisher());

    let trackers = Arc::new(sandwatch_tracker::Trackers::new());
    let sweeper = trackers.spawn_sweeper(
        config.tracker.sweep_interval(),
        config.tracker.idle_ttl(),
    );

    let ctx = TaskContext {
        config: Arc::new(config),
        cwd,
        trackers,
        publisher,
    };

    let (task_tx, mut task_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut bus = tokio::spawn(client.run(task_tx, shutdown_rx));

    loop {
        tokio::select! {
            Some(task) = task_rx.recv() => {
                ctx.spawn(task);
            }
            result = &mut bus => {
                match result {
                    Ok(Ok(())) => info!("Event bus client stopped"),
                    Ok(Err(e)) => error!("Event bus client failed: {}", e),
                    Err(e) => error!("Event bus client panicked: {}", e),
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                let _ = shutdown_tx.send(true);
                if let Err(e) = bus.await {
                    warn!("Event bus client did not stop cleanly: {}", e);
                }
                break;
            }
        }
    }

    sweeper.stop().await;
    Ok(())
}

async fn replay_command(
    config: SensorConfig,
    file: &Path,
    output: Option<PathBuf>,
    task_id: u64,
) -> anyhow::Result<()> {
    info!("Replaying {}", file.display());

    let publisher: Arc<dyn Publisher> = match output {
        Some(path) => Arc::new(JsonlPublisher::open(JsonlPublisherConfig::new(path))?),
        None => Arc::new(NullPublisher),
    };

    let handle = Arc::new(Mutex::new(std::fs::File::open(file)?));
    let mut dispatcher = Dispatcher::new(
        task_id,
        sandwatch_signatures::detectors(),
        ProcessTree::shared(),
        publisher.clone(),
    );

    let outcome =
        match tasks::stream_events(handle, &mut dispatcher, config.ingest.skip_unknown_kinds).await
        {
            Ok(frames) => {
                let stats = dispatcher.stats();
                info!(
                    "Replayed {} frames: {} events, {} detections",
                    frames, stats.events, stats.detections
                );
                Notification::finished(task_id, "replay")
            }
            Err(e) => {
                error!("Replay stopped: {}", e);
                Notification::error(task_id, e.to_string())
            }
        };

    publisher.publish(outcome).await?;
    publisher.flush().await?;
    Ok(())
}
