//! CDP message summaries for logging.
//!
//! Only `id` and `method` are looked at; payloads are never rewritten.

use std::fmt;

use kiosk_core::SessionId;
use serde::Deserialize;
use tracing::{debug, info};

/// Which way a frame is travelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Client to browser (commands).
    ToBrowser,
    /// Browser to client (responses and events).
    FromBrowser,
}

impl Direction {
    /// Label used in log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToBrowser => "client->browser",
            Self::FromBrowser => "browser->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routing fields of a CDP message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpSummary {
    /// Command id; present on commands and their responses.
    #[serde(default)]
    pub id: Option<i64>,
    /// Command or event name; absent on responses.
    #[serde(default)]
    pub method: Option<String>,
    /// Flattened-protocol target session, if any.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl CdpSummary {
    /// Summarize a text frame. `None` if it is not a JSON object.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Log one relayed text frame.
pub fn log_frame(session: SessionId, direction: Direction, text: &str) {
    match CdpSummary::parse(text) {
        Some(summary) => info!(
            %session,
            direction = direction.as_str(),
            id = summary.id,
            method = summary.method.as_deref(),
            target_session = summary.session_id.as_deref(),
            bytes = text.len(),
            "cdp message"
        ),
        None => debug!(
            %session,
            direction = direction.as_str(),
            bytes = text.len(),
            "non-json devtools frame"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command() {
        let s = CdpSummary::parse(r#"{"id":7,"method":"Page.navigate","params":{"url":"about:blank"}}"#)
            .unwrap();
        assert_eq!(s.id, Some(7));
        assert_eq!(s.method.as_deref(), Some("Page.navigate"));
        assert!(s.session_id.is_none());
    }

    #[test]
    fn response_has_no_method() {
        let s = CdpSummary::parse(r#"{"id":7,"result":{}}"#).unwrap();
        assert_eq!(s.id, Some(7));
        assert!(s.method.is_none());
    }

    #[test]
    fn event_on_child_session() {
        let s = CdpSummary::parse(
            r#"{"method":"Target.attachedToTarget","params":{},"sessionId":"ABC"}"#,
        )
        .unwrap();
        assert!(s.id.is_none());
        assert_eq!(s.session_id.as_deref(), Some("ABC"));
    }

    #[test]
    fn garbage_is_none() {
        assert!(CdpSummary::parse("not json").is_none());
        assert!(CdpSummary::parse("[1,2]").is_none());
    }

    #[test]
    fn direction_labels() {
        assert_eq!(Direction::ToBrowser.to_string(), "client->browser");
        assert_eq!(Direction::FromBrowser.as_str(), "browser->client");
    }
}
