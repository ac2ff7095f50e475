//! Devtools relay errors.

use std::time::Duration;

use kiosk_core::{Classify, ErrorKind};
use thiserror::Error;

/// Errors from upstream discovery and relaying.
#[derive(Debug, Error)]
pub enum DevtoolsError {
    /// The browser has not announced a devtools endpoint yet.
    #[error("upstream not ready")]
    NoUpstream,

    /// No endpoint was announced within the startup window.
    #[error("no devtools upstream announced within {waited:?}")]
    UpstreamTimeout {
        /// How long we waited.
        waited: Duration,
    },

    /// The announced endpoint could not be combined with the client's path.
    #[error("invalid upstream url {url}: {reason}")]
    InvalidUpstream {
        /// The announced URL.
        url: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// Connecting to the browser failed.
    #[error("failed to connect to upstream {target}: {reason}")]
    Dial {
        /// The websocket URL we dialed.
        target: String,
        /// Handshake or transport failure.
        reason: String,
    },
}

impl Classify for DevtoolsError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NoUpstream | Self::UpstreamTimeout { .. } => ErrorKind::Unavailable,
            Self::Dial { .. } => ErrorKind::Upstream,
            Self::InvalidUpstream { .. } => ErrorKind::Internal,
        }
    }
}

/// Result type for devtools operations.
pub type Result<T> = std::result::Result<T, DevtoolsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(DevtoolsError::NoUpstream.kind(), ErrorKind::Unavailable);
        assert_eq!(
            DevtoolsError::Dial {
                target: "ws://127.0.0.1:1/".into(),
                reason: "refused".into(),
            }
            .kind(),
            ErrorKind::Upstream
        );
        assert_eq!(
            DevtoolsError::InvalidUpstream {
                url: "nonsense".into(),
                reason: "missing scheme",
            }
            .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn not_ready_message() {
        assert_eq!(DevtoolsError::NoUpstream.to_string(), "upstream not ready");
    }
}
