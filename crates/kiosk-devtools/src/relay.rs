//! CDP websocket relay.
//!
//! A session is set up in two steps so the HTTP layer can still answer with
//! a status code when the browser is unreachable:
//!
//! 1. [`CdpRelay::connect`] resolves the current upstream and dials it
//!    before the client's upgrade is accepted.
//! 2. [`CdpRelay::run`] pairs the upgraded client socket with the dialed
//!    upstream socket and pumps frames both ways.
//!
//! A session is bound to the upstream it dialed. If the browser restarts the
//! session ends; new clients pick up the new endpoint.

use std::time::Duration;

use axum::extract::ws::{self, WebSocket};
use futures::future::{self, Either};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use kiosk_activity::{ActivityController, ActivityGuard};
use kiosk_core::SessionId;
use kiosk_settings::DevtoolsSettings;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as UpMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cdp::{self, Direction};
use crate::error::{DevtoolsError, Result};
use crate::upstream::UpstreamManager;

/// Socket to the browser.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close reason sent to the client when the browser side vanishes.
pub const UPSTREAM_LOST_REASON: &str = "upstream connection lost";

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay behavior knobs.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Log id/method/direction of every text frame.
    pub log_cdp_messages: bool,
    /// How long the surviving pump may run after the other one ends.
    pub close_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&DevtoolsSettings::default())
    }
}

impl From<&DevtoolsSettings> for RelayConfig {
    fn from(settings: &DevtoolsSettings) -> Self {
        Self {
            log_cdp_messages: settings.log_cdp_messages,
            close_grace: settings.close_grace(),
        }
    }
}

/// Dial target for a client request.
///
/// `/` (with or without a query) maps to the browser URL verbatim. Any other
/// path keeps the client's path and query on the upstream's scheme and
/// authority.
pub fn resolve_target(browser_url: &str, path_and_query: &str) -> Result<String> {
    let path = path_and_query.split('?').next().unwrap_or_default();
    if path.is_empty() || path == "/" {
        return Ok(browser_url.to_string());
    }

    let invalid = |reason| DevtoolsError::InvalidUpstream {
        url: browser_url.to_string(),
        reason,
    };
    let (scheme, rest) = browser_url
        .split_once("://")
        .ok_or_else(|| invalid("missing scheme"))?;
    let authority = rest.split(['/', '?']).next().unwrap_or_default();
    if authority.is_empty() {
        return Err(invalid("missing host"));
    }

    let sep = if path_and_query.starts_with('/') { "" } else { "/" };
    Ok(format!("{scheme}://{authority}{sep}{path_and_query}"))
}

/// A dialed upstream waiting for its client.
///
/// Holds the host awake from the dial until the session ends.
pub struct UpstreamSession {
    socket: UpstreamSocket,
    target: String,
    generation: u64,
    _activity: ActivityGuard,
}

impl UpstreamSession {
    /// URL that was dialed.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Generation of the endpoint the session is bound to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for UpstreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSession")
            .field("target", &self.target)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Shared relay state.
#[derive(Clone, Debug)]
pub struct CdpRelay {
    upstream: UpstreamManager,
    activity: ActivityController,
    config: RelayConfig,
    shutdown: CancellationToken,
}

impl CdpRelay {
    /// Relay over `upstream`. Sessions end when `shutdown` fires.
    pub fn new(
        upstream: UpstreamManager,
        activity: ActivityController,
        config: RelayConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            upstream,
            activity,
            config,
            shutdown,
        }
    }

    /// The upstream tracker.
    pub fn upstream(&self) -> &UpstreamManager {
        &self.upstream
    }

    /// Resolve and dial the upstream for a client requesting `path_and_query`.
    pub async fn connect(&self, path_and_query: &str) -> Result<UpstreamSession> {
        let endpoint = self
            .upstream
            .current_endpoint()
            .ok_or(DevtoolsError::NoUpstream)?;
        let target = resolve_target(&endpoint.url, path_and_query)?;
        let activity = self.activity.hold().await;

        let dial_failed = |reason: String| DevtoolsError::Dial {
            target: target.clone(),
            reason,
        };
        let (socket, _) = tokio::time::timeout(DIAL_TIMEOUT, connect_async(target.as_str()))
            .await
            .map_err(|_| dial_failed(format!("timed out after {DIAL_TIMEOUT:?}")))?
            .map_err(|e| dial_failed(e.to_string()))?;

        debug!(%target, generation = endpoint.generation, "dialed devtools upstream");
        Ok(UpstreamSession {
            socket,
            target,
            generation: endpoint.generation,
            _activity: activity,
        })
    }

    /// Relay frames between `client` and `session` until either side ends.
    pub async fn run(&self, client: WebSocket, session: UpstreamSession) {
        let id = SessionId::new();
        info!(
            session = %id,
            target = %session.target,
            generation = session.generation,
            "devtools session opened"
        );

        let UpstreamSession {
            socket,
            target: _,
            generation: _,
            _activity,
        } = session;
        let (client_tx, client_rx) = client.split();
        let (upstream_tx, upstream_rx) = socket.split();
        let cancel = self.shutdown.child_token();
        let log = self.config.log_cdp_messages;

        let to_client = tokio::spawn(upstream_to_client(
            upstream_rx,
            client_tx,
            cancel.clone(),
            log.then_some(id),
        ));
        let to_upstream = tokio::spawn(client_to_upstream(
            client_rx,
            upstream_tx,
            cancel.clone(),
            log.then_some(id),
        ));

        let (ended_first, outcome, mut rest) = match future::select(to_client, to_upstream).await {
            Either::Left((outcome, rest)) => (Direction::FromBrowser, outcome, rest),
            Either::Right((outcome, rest)) => (Direction::ToBrowser, outcome, rest),
        };
        let outcome = outcome.unwrap_or(PumpEnd::Panicked);

        if tokio::time::timeout(self.config.close_grace, &mut rest)
            .await
            .is_err()
        {
            debug!(session = %id, "close handshake did not finish in time, aborting pump");
            rest.abort();
        }
        cancel.cancel();

        info!(
            session = %id,
            first = ended_first.as_str(),
            outcome = outcome.as_str(),
            "devtools session closed"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pumps
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PumpEnd {
    /// A close frame was relayed.
    Closed,
    /// The source went away without a close frame.
    Dropped,
    /// Writing to the destination failed.
    SinkFailed,
    /// Server shutdown.
    Cancelled,
    Panicked,
}

impl PumpEnd {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Dropped => "dropped",
            Self::SinkFailed => "sink_failed",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
        }
    }
}

async fn upstream_to_client(
    mut from: SplitStream<UpstreamSocket>,
    mut to: SplitSink<WebSocket, ws::Message>,
    cancel: CancellationToken,
    log: Option<SessionId>,
) -> PumpEnd {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                let _ = to.send(client_close(ws::close_code::AWAY, "server shutting down")).await;
                return PumpEnd::Cancelled;
            }
            next = from.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(error = %e, "devtools upstream read failed");
                let _ = to.send(client_close(ws::close_code::ERROR, UPSTREAM_LOST_REASON)).await;
                return PumpEnd::Dropped;
            }
            None => {
                let _ = to.send(client_close(ws::close_code::ERROR, UPSTREAM_LOST_REASON)).await;
                return PumpEnd::Dropped;
            }
        };

        if let (Some(session), UpMessage::Text(text)) = (log, &msg) {
            cdp::log_frame(session, Direction::FromBrowser, text.as_str());
        }
        let closing = matches!(msg, UpMessage::Close(_));
        let Some(msg) = to_client_message(msg) else {
            continue;
        };
        if to.send(msg).await.is_err() {
            return PumpEnd::SinkFailed;
        }
        if closing {
            return PumpEnd::Closed;
        }
    }
}

async fn client_to_upstream(
    mut from: SplitStream<WebSocket>,
    mut to: SplitSink<UpstreamSocket, UpMessage>,
    cancel: CancellationToken,
    log: Option<SessionId>,
) -> PumpEnd {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                let _ = to.send(upstream_close(CloseCode::Normal, "")).await;
                return PumpEnd::Cancelled;
            }
            next = from.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "devtools client read failed");
                let _ = to.send(upstream_close(CloseCode::Normal, "")).await;
                return PumpEnd::Dropped;
            }
            None => {
                let _ = to.send(upstream_close(CloseCode::Normal, "")).await;
                return PumpEnd::Dropped;
            }
        };

        if let (Some(session), ws::Message::Text(text)) = (log, &msg) {
            cdp::log_frame(session, Direction::ToBrowser, text.as_str());
        }
        let closing = matches!(msg, ws::Message::Close(_));
        if to.send(to_upstream_message(msg)).await.is_err() {
            return PumpEnd::SinkFailed;
        }
        if closing {
            return PumpEnd::Closed;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame conversion
// ─────────────────────────────────────────────────────────────────────────────

fn client_close(code: u16, reason: &str) -> ws::Message {
    ws::Message::Close(Some(ws::CloseFrame {
        code,
        reason: reason.into(),
    }))
}

fn upstream_close(code: CloseCode, reason: &str) -> UpMessage {
    UpMessage::Close(Some(UpCloseFrame {
        code,
        reason: reason.into(),
    }))
}

fn to_upstream_message(msg: ws::Message) -> UpMessage {
    match msg {
        ws::Message::Text(text) => UpMessage::Text(text.as_str().into()),
        ws::Message::Binary(data) => UpMessage::Binary(data),
        ws::Message::Ping(data) => UpMessage::Ping(data),
        ws::Message::Pong(data) => UpMessage::Pong(data),
        ws::Message::Close(frame) => UpMessage::Close(frame.map(|f| UpCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().into(),
        })),
    }
}

/// Raw frames never surface from a read; they map to `None`.
fn to_client_message(msg: UpMessage) -> Option<ws::Message> {
    Some(match msg {
        UpMessage::Text(text) => ws::Message::Text(text.as_str().into()),
        UpMessage::Binary(data) => ws::Message::Binary(data),
        UpMessage::Ping(data) => ws::Message::Ping(data),
        UpMessage::Pong(data) => ws::Message::Pong(data),
        UpMessage::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().into(),
        })),
        UpMessage::Frame(_) => return None,
    })
}
