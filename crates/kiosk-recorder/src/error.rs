//! Recorder error types.

use std::path::PathBuf;

use kiosk_core::{Classify, ErrorKind, RecorderId};
use thiserror::Error;

use crate::types::RecorderState;

/// Errors from recorder operations.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Request parameters out of range.
    #[error("invalid recording parameters: {reason}")]
    InvalidParams {
        /// What is wrong.
        reason: String,
    },

    /// Another recorder under this ID has not finished.
    #[error("recording already in progress")]
    AlreadyActive {
        /// The contested ID.
        id: RecorderId,
        /// State of the existing recorder.
        state: RecorderState,
    },

    /// `start` on a recorder that already ran.
    #[error("recording already completed")]
    AlreadyFinished,

    /// No recorder under this ID.
    #[error("no recording found for '{id}'")]
    NotFound {
        /// The unknown ID.
        id: String,
    },

    /// Operation needs a started recorder.
    #[error("recording has not been started")]
    NotStarted,

    /// Delete while the process is still capturing.
    #[error("recording must be stopped first")]
    StillRecording,

    /// Stop or finalize step still running.
    #[error("recording is being finalized, please retry in a few seconds")]
    Finalizing,

    /// Capturing, but ffmpeg has not created the output file yet.
    #[error("recording has not produced output yet")]
    NoOutputYet,

    /// The artifact was deleted.
    #[error("requested recording has been deleted")]
    Deleted,

    /// The post-process step failed; the recorder can still be deleted.
    #[error("failed to finalize recording: {reason}")]
    FinalizeFailed {
        /// Why finalize failed.
        reason: String,
    },

    /// ffmpeg could not be launched.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        /// Executable that failed to launch.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Delivering a signal to ffmpeg failed.
    #[error("failed to signal ffmpeg: {reason}")]
    Signal {
        /// Why.
        reason: String,
    },

    /// Filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A wait was cancelled before the recorder settled.
    #[error("wait for finalization cancelled")]
    Cancelled,

    /// The recorder's worker task is gone (panicked or shut down).
    #[error("recorder worker is no longer running")]
    WorkerGone,
}

impl RecorderError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl Classify for RecorderError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParams { .. } | Self::AlreadyFinished | Self::NotStarted | Self::Deleted => {
                ErrorKind::Validation
            }
            Self::AlreadyActive { .. } | Self::StillRecording => ErrorKind::Conflict,
            Self::Finalizing | Self::NoOutputYet | Self::Cancelled => ErrorKind::Unavailable,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::FinalizeFailed { .. }
            | Self::Spawn { .. }
            | Self::Signal { .. }
            | Self::Io { .. }
            | Self::WorkerGone => ErrorKind::Internal,
        }
    }
}

/// Result type for recorder operations.
pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(RecorderError::StillRecording.kind(), ErrorKind::Conflict);
        assert_eq!(RecorderError::Finalizing.kind(), ErrorKind::Unavailable);
        assert_eq!(RecorderError::Deleted.kind(), ErrorKind::Validation);
        assert_eq!(
            RecorderError::NotFound { id: "x".into() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(RecorderError::WorkerGone.kind(), ErrorKind::Internal);
    }

    #[test]
    fn conflict_message() {
        let err = RecorderError::AlreadyActive {
            id: RecorderId::default(),
            state: RecorderState::Recording,
        };
        assert_eq!(err.to_string(), "recording already in progress");
    }

    #[test]
    fn finalizing_message_tells_caller_to_retry() {
        assert!(RecorderError::Finalizing.to_string().contains("retry"));
    }
}
