//! `KioskServer`: shared state, the two routers, and serving them.

use std::future::IntoFuture;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use kiosk_activity::ActivityController;
use kiosk_devtools::{CdpRelay, RelayConfig, UpstreamManager};
use kiosk_recorder::{RecordManager, RecorderFactory};
use kiosk_settings::{KioskSettings, RecordingSettings};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::{devtools, middleware, recording};

/// When an in-progress download is answered with a retry instead of bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadPolicy {
    /// Files at or below this size while recording get `202`.
    pub min_bytes: u64,
    /// `Retry-After` seconds sent with the `202`.
    pub retry_after_secs: u64,
}

impl From<&RecordingSettings> for DownloadPolicy {
    fn from(settings: &RecordingSettings) -> Self {
        Self {
            min_bytes: settings.min_download_bytes,
            retry_after_secs: settings.retry_after_secs,
        }
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Recorder registry.
    pub recordings: Arc<RecordManager>,
    /// Builds recorders from request parameters.
    pub factory: RecorderFactory,
    /// Devtools relay (and through it, the upstream tracker).
    pub relay: CdpRelay,
    /// Scale-to-zero activity.
    pub activity: ActivityController,
    /// Download retry thresholds.
    pub download: DownloadPolicy,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// The kiosk host's HTTP server.
pub struct KioskServer {
    state: AppState,
}

impl KioskServer {
    /// Wire up state from settings and the long-lived services.
    pub fn new(
        settings: &KioskSettings,
        activity: ActivityController,
        upstream: UpstreamManager,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let relay = CdpRelay::new(
            upstream,
            activity.clone(),
            RelayConfig::from(&settings.devtools),
            shutdown.token(),
        );
        Self {
            state: AppState {
                recordings: Arc::new(RecordManager::new()),
                factory: RecorderFactory::new(settings.recording.clone(), activity.clone()),
                relay,
                activity,
                download: DownloadPolicy::from(&settings.recording),
                shutdown,
                start_time: Instant::now(),
            },
        }
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Recorder registry.
    pub fn recordings(&self) -> &Arc<RecordManager> {
        &self.state.recordings
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Router for the recording API listener.
    pub fn api_router(&self) -> Router {
        Router::new()
            .route("/recording/start", post(recording::start))
            .route("/recording/stop", post(recording::stop))
            .route("/recording/download", get(recording::download))
            .route("/recording/delete", post(recording::delete))
            .route("/recording/list", get(recording::list))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
            .layer(axum::middleware::from_fn_with_state(
                self.state.activity.clone(),
                middleware::hold_activity,
            ))
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
    }

    /// Router for the devtools listener.
    pub fn devtools_router(&self) -> Router {
        Router::new()
            .route("/json/version", get(devtools::json_version))
            .fallback(devtools::relay)
            .with_state(self.state.clone())
            .layer(axum::middleware::from_fn_with_state(
                self.state.activity.clone(),
                middleware::hold_activity,
            ))
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve both routers until the shutdown token fires.
    pub async fn serve(&self, api: TcpListener, devtools: TcpListener) -> io::Result<()> {
        info!(addr = ?api.local_addr().ok(), "api server listening");
        info!(addr = ?devtools.local_addr().ok(), "devtools server listening");

        let token = self.state.shutdown.token();
        let api = axum::serve(api, self.api_router())
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .into_future();
        let devtools = axum::serve(devtools, self.devtools_router())
            .with_graceful_shutdown(token.cancelled_owned())
            .into_future();
        let _ = tokio::try_join!(api, devtools)?;
        info!("listeners stopped");
        Ok(())
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.relay.upstream().current().is_some(),
        state.recordings.len(),
    ))
}
