//! Error taxonomy for the kiosk control plane.
//!
//! Every component defines its own `thiserror` enum and classifies each
//! variant into one [`ErrorKind`] via [`Classify`]. The HTTP layer maps kinds
//! to status codes in exactly one place, so components never know about HTTP.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// ErrorKind
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse classification of a failure, as seen by a caller deciding whether
/// and how to retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad parameters, caught before any process or state mutation.
    Validation,
    /// Duplicate active recording, delete-while-recording, delete-while-finalizing.
    Conflict,
    /// Transient: no upstream yet, finalize still pending.
    Unavailable,
    /// Unknown recorder ID.
    NotFound,
    /// A dependency we proxy to (the browser's devtools listener) refused us.
    Upstream,
    /// Process spawn failure, I/O failure, worker panic.
    Internal,
}

impl ErrorKind {
    /// Machine-readable code used in error bodies.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "BAD_REQUEST",
            Self::Conflict => "CONFLICT",
            Self::Unavailable => "UNAVAILABLE",
            Self::NotFound => "NOT_FOUND",
            Self::Upstream => "BAD_GATEWAY",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same request later can succeed.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Unavailable | Self::Upstream)
    }

    /// Whether the message is safe to show to a caller verbatim.
    ///
    /// Internal failures are logged with full context and surfaced opaquely.
    #[must_use]
    pub const fn is_caller_visible(self) -> bool {
        !matches!(self, Self::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Implemented by every component error type.
pub trait Classify {
    /// Classification of this error.
    fn kind(&self) -> ErrorKind;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────────────────

/// JSON error body returned to HTTP callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code (see [`ErrorKind::code`]).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Build a body from a classified error.
    ///
    /// Internal errors get a fixed opaque message.
    pub fn from_error<E: Classify + fmt::Display>(err: &E) -> Self {
        let kind = err.kind();
        let message = if kind.is_caller_visible() {
            err.to_string()
        } else {
            "internal error".to_string()
        };
        Self {
            code: kind.code().to_string(),
            message,
        }
    }

    /// Build a body directly from a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code().to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{msg}")]
    struct Sample {
        kind: ErrorKind,
        msg: &'static str,
    }

    impl Classify for Sample {
        fn kind(&self) -> ErrorKind {
            self.kind
        }
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::Validation.code(), "BAD_REQUEST");
        assert_eq!(ErrorKind::Conflict.code(), "CONFLICT");
        assert_eq!(ErrorKind::Unavailable.code(), "UNAVAILABLE");
        assert_eq!(ErrorKind::NotFound.code(), "NOT_FOUND");
        assert_eq!(ErrorKind::Upstream.code(), "BAD_GATEWAY");
        assert_eq!(ErrorKind::Internal.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Unavailable.is_transient());
        assert!(ErrorKind::Upstream.is_transient());
        assert!(!ErrorKind::Conflict.is_transient());
        assert!(!ErrorKind::Internal.is_transient());
    }

    #[test]
    fn display_is_code() {
        assert_eq!(ErrorKind::NotFound.to_string(), "NOT_FOUND");
    }

    #[test]
    fn body_keeps_visible_message() {
        let err = Sample {
            kind: ErrorKind::Conflict,
            msg: "recording already in progress",
        };
        let body = ErrorBody::from_error(&err);
        assert_eq!(body.code, "CONFLICT");
        assert_eq!(body.message, "recording already in progress");
    }

    #[test]
    fn body_hides_internal_message() {
        let err = Sample {
            kind: ErrorKind::Internal,
            msg: "open /secret/path: permission denied",
        };
        let body = ErrorBody::from_error(&err);
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert_eq!(body.message, "internal error");
    }

    #[test]
    fn body_serializes() {
        let body = ErrorBody::new(ErrorKind::Unavailable, "upstream not ready");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "UNAVAILABLE");
        assert_eq!(json["message"], "upstream not ready");
    }
}
