//! Mapping from component errors to HTTP responses.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kiosk_core::{Classify, ErrorBody, ErrorKind, IdError};
use kiosk_devtools::DevtoolsError;
use kiosk_recorder::RecorderError;
use tracing::error;

/// An error on its way to an HTTP caller.
///
/// Holds only what the caller may see. Internal details are logged when the
/// error is converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    /// Error with an explicit caller-facing message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 400 with `message`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// 404 with `message`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// 409 with `message`.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// 500 with a caller-facing summary. Log the cause before calling this.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Caller-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        status_for(self.kind)
    }

    fn from_classified<E: Classify + fmt::Display>(err: &E) -> Self {
        let body = ErrorBody::from_error(err);
        if err.kind() == ErrorKind::Internal {
            error!(error = %err, "request failed");
        }
        Self {
            kind: err.kind(),
            message: body.message,
        }
    }
}

/// The one place error kinds become status codes.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<RecorderError> for ApiError {
    fn from(err: RecorderError) -> Self {
        Self::from_classified(&err)
    }
}

impl From<DevtoolsError> for ApiError {
    fn from(err: DevtoolsError) -> Self {
        Self::from_classified(&err)
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        Self::from_classified(&err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody::new(self.kind, self.message);
        (status_for(self.kind), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_status() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Upstream), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn recorder_conflict_keeps_message() {
        let err = ApiError::from(RecorderError::StillRecording);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.message(), "recording must be stopped first");
    }

    #[test]
    fn internal_message_is_opaque() {
        let err = ApiError::from(RecorderError::WorkerGone);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "internal error");
    }

    #[test]
    fn invalid_id_is_bad_request() {
        let err = ApiError::from(IdError::InvalidChar('/'));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn response_body_shape() {
        let resp = ApiError::not_found("no recording found").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["code"], "NOT_FOUND");
        assert_eq!(parsed["message"], "no recording found");
    }
}
