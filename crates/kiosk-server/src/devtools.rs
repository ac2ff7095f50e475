//! Devtools listener handlers: discovery and the websocket relay.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::header::HOST;
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Json, Response};
use kiosk_devtools::DevtoolsError;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::server::AppState;

/// Body of `GET /json/version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionResponse {
    /// Where a client should connect; always points back at this listener.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// GET /json/version
///
/// Clients that discover the browser URL over HTTP before connecting are
/// pointed back at the relay using the `Host` they reached us on.
pub async fn json_version(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<VersionResponse>, ApiError> {
    if state.relay.upstream().current().is_none() {
        return Err(DevtoolsError::NoUpstream.into());
    }
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing Host header"))?;
    Ok(Json(VersionResponse {
        web_socket_debugger_url: format!("ws://{host}/"),
    }))
}

/// Any other path: upgrade and relay to the browser.
///
/// The upstream is dialed before the upgrade is accepted so a missing or
/// unreachable browser is reported as 503 or 502.
pub async fn relay(
    State(state): State<AppState>,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());

    if state.relay.upstream().current().is_none() {
        debug!(path = path_and_query, "devtools request before upstream is ready");
        return ApiError::from(DevtoolsError::NoUpstream).into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(path = path_and_query, %rejection, "non-websocket devtools request");
            return rejection.into_response();
        }
    };

    let session = match state.relay.connect(path_and_query).await {
        Ok(session) => session,
        Err(e) => {
            warn!(path = path_and_query, error = %e, "devtools upstream dial failed");
            return ApiError::from(e).into_response();
        }
    };

    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| async move { relay.run(socket, session).await })
}
