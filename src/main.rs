//! Sensor Stream CLI
//!
//! Live viewer for IMU telemetry relayed over WebSocket.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sensor_stream::{
    config::Config, stats::create_shared_log_with_persistence, LatchPolicy, Sample,
    SessionStatus, StreamSession, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sensor-stream")]
#[command(version = VERSION)]
#[command(about = "Live IMU telemetry viewer with per-device CSV export", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a stream hub and start ingesting
    Start {
        /// WebSocket endpoint of the hub
        #[arg(long)]
        endpoint: Option<String>,

        /// Identity announced to the hub
        #[arg(long)]
        viewer_id: Option<String>,

        /// Device to display (defaults to the first one seen)
        #[arg(long)]
        device: Option<String>,

        /// Directory for CSV exports
        #[arg(long, short)]
        export_dir: Option<PathBuf>,

        /// Fire the automatic export once a device has at least the
        /// threshold number of samples, instead of exactly the threshold
        #[arg(long)]
        export_at_least: bool,

        /// Start a fresh session after the hub disconnects
        #[arg(long)]
        reconnect: bool,

        /// Seconds between reconnect attempts
        #[arg(long, default_value = "2")]
        reconnect_delay: u64,

        /// Serve the selection API on this port (requires server feature)
        #[arg(long)]
        serve: Option<u16>,
    },

    /// Show cumulative ingest statistics
    Status,

    /// Show configuration, or change the saved defaults
    Config {
        /// Save a new default hub endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Save a new default viewer identity
        #[arg(long)]
        viewer_id: Option<String>,

        /// Save a new default export directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sensor_stream=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            endpoint,
            viewer_id,
            device,
            export_dir,
            export_at_least,
            reconnect,
            reconnect_delay,
            serve,
        } => {
            let mut config = Config::load().unwrap_or_default();
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            if let Some(viewer_id) = viewer_id {
                config.viewer_id = viewer_id;
            }
            if let Some(export_dir) = export_dir {
                config.export_path = export_dir;
            }
            if export_at_least {
                config.latch_policy = LatchPolicy::AtLeast;
            }
            if serve.is_some() {
                config.server_port = serve;
            }

            cmd_start(
                config,
                device,
                reconnect,
                Duration::from_secs(reconnect_delay),
            )
            .await
        }
        Commands::Status => cmd_status(),
        Commands::Config {
            endpoint,
            viewer_id,
            export_dir,
        } => cmd_config(endpoint, viewer_id, export_dir),
    }
}

async fn cmd_start(
    config: Config,
    device: Option<String>,
    reconnect: bool,
    reconnect_delay: Duration,
) -> anyhow::Result<()> {
    println!("Sensor Stream v{VERSION}");
    println!();

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("  Endpoint: {}", config.endpoint);
    println!("  Viewer ID: {}", config.viewer_id);
    println!("  Window size: {}", config.window_size);
    println!(
        "  Automatic export: at {} samples ({:?})",
        config.export_threshold, config.latch_policy
    );
    println!("  Export directory: {:?}", config.export_path);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let log = create_shared_log_with_persistence(config.stats_path());

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })
    .context("Error setting Ctrl+C handler")?;

    loop {
        let session = match StreamSession::start_with_log(&config, log.clone()).await {
            Ok(session) => Arc::new(session),
            Err(e) if reconnect => {
                eprintln!("Could not start session: {e}");
                if wait_or_shutdown(&mut shutdown_rx, reconnect_delay).await {
                    break;
                }
                continue;
            }
            Err(e) => return Err(e).context("Could not start session"),
        };

        println!("Session {} open", session.id());
        if let Some(ref device) = device {
            session.select(device);
        }

        #[cfg(feature = "server")]
        let server_shutdown = match config.server_port {
            Some(port) => {
                let server_config = sensor_stream::server::ServerConfig::new(port);
                let (addr, tx) = sensor_stream::server::run(server_config, session.clone()).await?;
                println!("Selection API on http://{addr}");
                Some(tx)
            }
            None => None,
        };
        #[cfg(not(feature = "server"))]
        if config.server_port.is_some() {
            eprintln!("Warning: --serve ignored (server feature not enabled at compile time)");
        }

        let stopped_by_user = watch_session(&session, &mut shutdown_rx).await;
        let status = session.stop().await;

        #[cfg(feature = "server")]
        if let Some(tx) = server_shutdown {
            let _ = tx.send(());
        }

        for outcome in session.export_outcomes().try_iter() {
            match outcome.result {
                Ok(path) => println!(
                    "Exported {} samples of {} to {:?}",
                    outcome.sample_count, outcome.device_id, path
                ),
                Err(e) => eprintln!("Export for {} failed: {e}", outcome.device_id),
            }
        }

        if let Err(e) = log.save() {
            eprintln!("Warning: Could not save ingest stats: {e}");
        }

        if stopped_by_user || !reconnect {
            println!();
            println!("Session ended ({status:?})");
            break;
        }

        println!("Session disconnected; reconnecting in {}s", reconnect_delay.as_secs());
        if wait_or_shutdown(&mut shutdown_rx, reconnect_delay).await {
            break;
        }
    }

    println!();
    println!("{}", log.summary());
    Ok(())
}

/// Print the selected device's latest sample every second until the session
/// ends or the user interrupts. Returns true when interrupted.
async fn watch_session(session: &StreamSession, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    let mut status_rx = session.watch_status();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return true,
            _ = status_rx.wait_for(|s| s.is_terminal()) => {
                if session.status() == SessionStatus::Disconnected {
                    eprintln!("Stream disconnected");
                }
                return false;
            }
            _ = ticker.tick() => {
                if let Some(sample) = session.latest() {
                    print_sample(&sample);
                }
            }
        }
    }
}

/// Sleep for `delay`; returns true if shutdown was requested meanwhile.
async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

fn print_sample(sample: &Sample) {
    println!(
        "[{:>8.2}s] {} accel=({:.2}, {:.2}, {:.2}) gyro=({:.2}, {:.2}, {:.2}) mag=({:.2}, {:.2}, {:.2})",
        sample.elapsed_ms as f64 / 1000.0,
        sample.device_id,
        sample.accel[0],
        sample.accel[1],
        sample.accel[2],
        sample.gyro[0],
        sample.gyro[1],
        sample.gyro[2],
        sample.mag[0],
        sample.mag[1],
        sample.mag[2],
    );
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Sensor Stream Status");
    println!("====================");
    println!();
    println!("Configuration:");
    println!("  Endpoint: {}", config.endpoint);
    println!("  Viewer ID: {}", config.viewer_id);
    println!("  Window size: {}", config.window_size);
    println!("  Export directory: {:?}", config.export_path);
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let content = std::fs::read_to_string(&stats_path)
            .with_context(|| format!("Could not read {stats_path:?}"))?;
        let stats: serde_json::Value = serde_json::from_str(&content)?;

        println!("Cumulative Statistics:");
        for key in [
            "frames_received",
            "frames_dropped",
            "samples_appended",
            "auto_exports",
            "manual_exports",
            "export_failures",
        ] {
            if let Some(value) = stats.get(key) {
                println!("  {}: {value}", key.replace('_', " "));
            }
        }

        if let Some(devices) = stats.get("devices").and_then(|d| d.as_object()) {
            println!();
            println!("Exports by device:");
            for (device_id, counts) in devices {
                println!(
                    "  {device_id}: {} automatic, {} manual",
                    counts["automatic"], counts["manual"]
                );
            }
        }
    } else {
        println!("No previous session data found.");
    }

    Ok(())
}

fn cmd_config(
    endpoint: Option<String>,
    viewer_id: Option<String>,
    export_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = Config::load().unwrap_or_default();

    let changed = endpoint.is_some() || viewer_id.is_some() || export_dir.is_some();
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    if let Some(viewer_id) = viewer_id {
        config.viewer_id = viewer_id;
    }
    if let Some(export_dir) = export_dir {
        config.export_path = export_dir;
    }
    if changed {
        config.save().context("Could not save configuration")?;
        println!("Configuration saved.");
        println!();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
