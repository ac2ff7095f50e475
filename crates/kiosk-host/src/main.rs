//! # kiosk-host
//!
//! Control-plane binary for the kiosk browser host. Wires together the
//! activity controller, devtools upstream tracker, recording registry, and
//! both HTTP listeners, then runs until SIGINT or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kiosk_activity::{ActivityController, UnikraftControl};
use kiosk_core::logging::init_subscriber;
use kiosk_devtools::UpstreamManager;
use kiosk_recorder::{RecordingParams, ResolvedParams};
use kiosk_server::{KioskServer, ShutdownCoordinator};
use kiosk_settings::{KioskSettings, RecordingSettings, load_settings};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Kiosk host control plane.
#[derive(Parser, Debug)]
#[command(name = "kiosk-host", about = "Kiosk browser host control plane")]
struct Cli {
    /// JSON settings file. Missing files fall back to defaults.
    #[arg(long, env = "KIOSK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,
}

fn load(cli: &Cli) -> Result<KioskSettings> {
    let mut settings =
        load_settings(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    Ok(settings)
}

/// Time `stop_all` gets past the per-recorder kill deadline.
const STOP_ALL_GRACE: Duration = Duration::from_secs(5);

/// Shutdown budget for stopping recordings; outlasts SIGKILL escalation.
fn stop_all_timeout(recording: &RecordingSettings) -> Duration {
    recording.stop_timeout() + STOP_ALL_GRACE
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_signal() -> Result<&'static str> {
    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    let mut int = signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;
    let name = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    };
    Ok(name)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    kiosk_recorder::ffmpeg::check_available(&settings.recording.ffmpeg_path)
        .await
        .context("ffmpeg is not available")?;
    let defaults = ResolvedParams::resolve(&settings.recording, RecordingParams::default())
        .context("Invalid default recording parameters")?;
    tracing::debug!(?defaults, "default recording parameters");

    // Activity outlives the listeners so shutdown work is still covered.
    let activity_cancel = CancellationToken::new();
    let activity = ActivityController::new(
        Arc::new(UnikraftControl::new(&settings.activity.control_path)),
        settings.activity.debounce(),
    );
    let activity_task = activity.start(activity_cancel.clone());

    let upstream = UpstreamManager::from_settings(&settings.devtools);
    upstream.start();
    let endpoint = upstream
        .wait_for_initial(settings.devtools.upstream_wait())
        .await
        .context("Chromium devtools endpoint never appeared")?;
    tracing::info!(url = %endpoint.url, "devtools upstream ready");

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let server = KioskServer::new(&settings, activity.clone(), upstream.clone(), shutdown.clone());
    let recordings = server.recordings().clone();

    let api = TcpListener::bind(settings.server.api_addr())
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.api_addr()))?;
    let devtools = TcpListener::bind(settings.server.devtools_addr())
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.devtools_addr()))?;

    let mut serving = tokio::spawn(async move {
        if let Err(e) = server.serve(api, devtools).await {
            tracing::error!(error = %e, "server failed");
        }
    });

    tokio::select! {
        received = wait_for_signal() => {
            tracing::info!(signal = received?, "shutting down");
        }
        _ = &mut serving => {
            tracing::warn!("listeners exited unexpectedly, shutting down");
        }
    }

    recordings.stop_all(stop_all_timeout(&settings.recording)).await;
    let handles = if serving.is_finished() { Vec::new() } else { vec![serving] };
    shutdown
        .graceful_shutdown(handles, Some(settings.server.shutdown_timeout()))
        .await;
    upstream.stop().await;

    activity_cancel.cancel();
    let _ = activity_task.await;

    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["kiosk-host"]);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["kiosk-host", "--config", "/etc/kiosk.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/kiosk.json")));
    }

    #[test]
    fn log_level_flag_overrides_settings() {
        let cli = Cli::parse_from([
            "kiosk-host",
            "--config",
            "/nonexistent/kiosk.json",
            "--log-level",
            "debug",
        ]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn stop_all_outlasts_kill_deadline() {
        let recording = RecordingSettings {
            stop_timeout_secs: 7,
            ..RecordingSettings::default()
        };
        assert_eq!(stop_all_timeout(&recording), Duration::from_secs(12));
        assert!(stop_all_timeout(&recording) > recording.stop_timeout());
    }
}
