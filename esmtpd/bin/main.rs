//! The `esmtpd` binary: locate and load the configuration document, wire up
//! the daemon, and run it until a shutdown signal arrives.
//!
//! Exit codes: `0` clean shutdown, `1` configuration could not be loaded,
//! `2` the daemon failed to start or run (e.g. the listener could not bind).

use std::path::PathBuf;

use esmtpd::{Daemon, DaemonConfig};
use esmtpd_common::{internal, logging, tracing, Signal};
use esmtpd_tracing::traced;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("esmtpd: {err}");
            std::process::exit(1);
        }
    };

    let daemon = Daemon::new(config);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    if let Err(err) = daemon.run(shutdown_rx).await {
        eprintln!("esmtpd: {err}");
        std::process::exit(2);
    }
}

fn load_config() -> anyhow::Result<DaemonConfig> {
    let path = find_config_file()?;
    let text = std::fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("failed to read config from {}: {err}", path.display()))?;
    DaemonConfig::from_ron(&text)
        .map_err(|err| anyhow::anyhow!("failed to parse config at {}: {err}", path.display()))
}

/// Find the configuration document using the following precedence:
/// 1. `ESMTPD_CONFIG` environment variable
/// 2. `./esmtpd.config.ron` (current working directory)
/// 3. `/etc/esmtpd/esmtpd.config.ron` (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("ESMTPD_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "ESMTPD_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./esmtpd.config.ron"),
        PathBuf::from("/etc/esmtpd/esmtpd.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - ESMTPD_CONFIG environment variable\n{paths_tried}"
    )
}

/// Waits for ctrl-c or SIGTERM, then broadcasts [`Signal::Shutdown`] and
/// waits for the rest of the process to acknowledge it before returning.
#[traced(instrument(level = tracing::Level::TRACE))]
async fn wait_for_shutdown_signal(sender: broadcast::Sender<Signal>) {
    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(stream) => stream,
        Err(err) => {
            internal!(level = ERROR, "failed to install SIGTERM handler: {err}");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C received, shutting down");
        }
        _ = terminate.recv() => {
            internal!("SIGTERM received, shutting down");
        }
    }

    let _ = sender.send(Signal::Shutdown);
}
