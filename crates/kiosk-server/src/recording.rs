//! `/recording/*` handlers.

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use kiosk_core::{ErrorKind, RecorderId};
use kiosk_recorder::{RecorderError, RecorderState, RecordingParams};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::server::AppState;

const STARTED_AT: HeaderName = HeaderName::from_static("x-recording-started-at");
const FINISHED_AT: HeaderName = HeaderName::from_static("x-recording-finished-at");
const FORCE_STOPPED: HeaderName = HeaderName::from_static("x-recording-force-stopped");

// ─────────────────────────────────────────────────────────────────────────────
// Request / response bodies
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /recording/start` body. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingRequest {
    /// Capture frame rate.
    pub framerate: Option<u32>,
    /// Size cap in megabytes.
    #[serde(rename = "maxFileSizeInMB")]
    pub max_file_size_in_mb: Option<u32>,
    /// Duration cap in seconds.
    pub max_duration_in_seconds: Option<u64>,
    /// Recorder ID; `default` when absent or empty.
    pub id: Option<String>,
}

/// `POST /recording/stop` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordingRequest {
    /// SIGKILL instead of a graceful stop.
    pub force_stop: Option<bool>,
    /// Recorder ID.
    pub id: Option<String>,
}

/// `POST /recording/delete` body, and `GET /recording/download` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecorderSelector {
    /// Recorder ID.
    pub id: Option<String>,
}

/// One entry of `GET /recording/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderInfo {
    /// Recorder ID.
    pub id: String,
    /// Whether ffmpeg is capturing.
    pub is_recording: bool,
    /// Lifecycle state.
    pub state: RecorderState,
    /// When capture started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When capture ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Parse an optional JSON body. An empty body means all defaults.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))
}

fn rfc3339(ts: DateTime<Utc>) -> Option<HeaderValue> {
    HeaderValue::from_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true)).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /recording/start
pub async fn start(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let req: StartRecordingRequest = parse_body(&body)?;
    let id = RecorderId::or_default(req.id.as_deref())?;
    let params = RecordingParams {
        frame_rate: req.framerate,
        max_size_mb: req.max_file_size_in_mb,
        max_duration_secs: req.max_duration_in_seconds,
    };

    let recorder = state.factory.create(id.clone(), params)?;
    if let Err(e) = state.recordings.register_recorder(recorder.clone()) {
        warn!(recorder_id = %id, error = %e, "refusing to start recording");
        return Err(e.into());
    }

    if let Err(e) = recorder.start().await {
        error!(recorder_id = %id, error = %e, "failed to start recording");
        state.recordings.deregister_recorder(&recorder);
        return Err(ApiError::internal("failed to start recording"));
    }
    Ok(StatusCode::CREATED)
}

/// POST /recording/stop
///
/// Always answers 200 once the recorder exists; stop failures are logged.
pub async fn stop(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let req: StopRecordingRequest = parse_body(&body)?;
    let id = RecorderId::or_default(req.id.as_deref())?;
    let Some(recorder) = state.recordings.get_recorder(&id) else {
        warn!(recorder_id = %id, "stop requested with no recording");
        return Err(ApiError::bad_request("no active recording to stop"));
    };

    let force = req.force_stop.unwrap_or(false);
    let result = if force {
        info!(recorder_id = %id, "force stopping recording");
        recorder.force_stop().await
    } else {
        info!(recorder_id = %id, "gracefully stopping recording");
        recorder.stop().await
    };
    if let Err(e) = result {
        error!(recorder_id = %id, force, error = %e, "error while stopping recording");
    }
    Ok(StatusCode::OK)
}

/// GET /recording/download
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<RecorderSelector>,
) -> Result<Response, ApiError> {
    let id = RecorderId::or_default(query.id.as_deref())?;
    let recorder = state
        .recordings
        .get_recorder(&id)
        .ok_or_else(|| ApiError::not_found("no recording found"))?;
    if recorder.is_deleted() {
        return Err(RecorderError::Deleted.into());
    }

    let retry_later = || {
        (
            StatusCode::ACCEPTED,
            [(RETRY_AFTER, state.download.retry_after_secs.to_string())],
        )
            .into_response()
    };

    let (file, meta) = match recorder.recording().await {
        Ok(found) => found,
        Err(RecorderError::NoOutputYet) => return Ok(retry_later()),
        Err(RecorderError::Finalizing) => {
            info!(recorder_id = %id, "waiting for recording finalization");
            if let Err(e) = recorder
                .wait_for_finalization(&state.shutdown.token())
                .await
            {
                error!(recorder_id = %id, error = %e, "finalization failed");
                return Err(match e {
                    RecorderError::Cancelled | RecorderError::Deleted => e.into(),
                    _ => ApiError::internal("failed to finalize recording"),
                });
            }
            recorder.recording().await.map_err(|e| {
                error!(recorder_id = %id, error = %e, "failed to get recording after finalization");
                ApiError::internal("failed to get recording")
            })?
        }
        Err(e) => return Err(e.into()),
    };

    if recorder.is_recording() && meta.size_bytes <= state.download.min_bytes {
        return Ok(retry_later());
    }

    info!(recorder_id = %id, size = meta.size_bytes, "serving recording");
    let hold = state.activity.hold().await;
    let stream = ReaderStream::new(file.take(meta.size_bytes)).map(move |chunk| {
        let _hold = &hold;
        chunk
    });

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    let _ = headers.insert(CONTENT_LENGTH, HeaderValue::from(meta.size_bytes));
    if let Some(v) = meta.started_at.and_then(rfc3339) {
        let _ = headers.insert(STARTED_AT, v);
    }
    if let Some(v) = meta.finished_at.and_then(rfc3339) {
        let _ = headers.insert(FINISHED_AT, v);
    }
    if meta.force_stopped {
        let _ = headers.insert(FORCE_STOPPED, HeaderValue::from_static("true"));
    }
    Ok(response)
}

/// POST /recording/delete
pub async fn delete(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let req: RecorderSelector = parse_body(&body)?;
    let id = RecorderId::or_default(req.id.as_deref())?;
    let recorder = state
        .recordings
        .get_recorder(&id)
        .ok_or_else(|| ApiError::not_found("no recording found"))?;

    match recorder.delete().await {
        Ok(()) => {
            info!(recorder_id = %id, "recording deleted via api");
            Ok(StatusCode::OK)
        }
        Err(e @ RecorderError::Finalizing) => {
            info!(recorder_id = %id, "recording is being finalized, client should retry");
            Err(ApiError::new(ErrorKind::Conflict, e.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /recording/list
pub async fn list(State(state): State<AppState>) -> Json<Vec<RecorderInfo>> {
    let infos = state
        .recordings
        .list_recorders()
        .iter()
        .map(|r| {
            let status = r.status();
            RecorderInfo {
                id: r.id().to_string(),
                is_recording: status.state == RecorderState::Recording,
                state: status.state,
                started_at: status.metadata.started_at,
                finished_at: status.metadata.finished_at,
            }
        })
        .collect();
    Json(infos)
}
