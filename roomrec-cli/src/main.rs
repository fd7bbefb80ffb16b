//! Service host for the recording engine.
//!
//! Loads the configuration, starts monitoring, logs room events, and
//! prints a periodic status line until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use roomrec::monitor::RoomEvent;
use roomrec::{App, AppConfig};
use tracing::{Level, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(name = "roomrec", version, about = "Automatic live-room recorder")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "ROOMREC_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between status line reports.
    #[arg(long, default_value_t = 60)]
    status_interval: u64,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

/// Locate the configuration file: explicit flag, then the user config
/// directory, then the working directory.
fn resolve_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }
    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("roomrec").join("config.toml");
        if candidate.exists() {
            return Some(candidate);
        }
    }
    let local = PathBuf::from("roomrec.toml");
    local.exists().then_some(local)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match resolve_config(args.config) {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            AppConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => {
            warn!("no configuration file found, using defaults (no rooms monitored)");
            AppConfig::default()
        }
    };

    let app = App::new(config).context("building the engine")?;
    app.start().context("starting room monitoring")?;

    let mut events = app.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                RoomEvent::LiveStart { .. } | RoomEvent::LiveEnd { .. } => {
                    info!("{}", event.description());
                }
                RoomEvent::PollError { .. } => {
                    warn!("{}", event.description());
                }
            }
        }
    });

    let mut status = tokio::time::interval(Duration::from_secs(args.status_interval.max(1)));
    status.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            _ = status.tick() => {
                let stats = app.statistics();
                let resources = app.resources();
                info!(
                    "rooms: {} | recording: {} | memory: {} MiB",
                    stats.monitoring,
                    stats.recording,
                    resources.used_memory_mib()
                );
            }
        }
    }

    app.shutdown().await;
    event_logger.abort();
    Ok(())
}
