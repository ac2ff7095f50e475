//! Recorder state machine and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one recorder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    /// Registered, process not launched yet.
    #[default]
    Idle,
    /// ffmpeg is capturing.
    Recording,
    /// SIGINT sent; waiting for ffmpeg to flush and exit.
    Stopping,
    /// SIGKILL sent; waiting for the process to be reaped.
    ForceStopping,
    /// Process exited; post-process step running.
    Finalizing,
    /// Artifact is complete and readable.
    Completed,
    /// Finalize failed; the artifact may be unusable but can be deleted.
    Failed,
    /// Artifact removed.
    Deleted,
}

impl RecorderState {
    /// Whether the recorder has settled and its ID may be reused.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Deleted)
    }

    /// Whether a stop or finalize step is in flight.
    pub fn is_settling(self) -> bool {
        matches!(self, Self::Stopping | Self::ForceStopping | Self::Finalizing)
    }
}

/// Timestamps and size of a recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    /// When ffmpeg was launched.
    pub started_at: Option<DateTime<Utc>>,
    /// When ffmpeg exited.
    pub finished_at: Option<DateTime<Utc>>,
    /// Artifact size in bytes.
    pub size_bytes: u64,
    /// The process was killed rather than allowed to flush its container.
    /// Finalize attempts a repair, but the artifact is not guaranteed valid.
    pub force_stopped: bool,
}

/// Snapshot published by the recorder's worker after every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderStatus {
    /// Current state.
    pub state: RecorderState,
    /// Current metadata.
    pub metadata: RecordingMetadata,
    /// Most recent failure (abnormal exit, finalize error).
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(RecorderState::Completed.is_terminal());
        assert!(RecorderState::Failed.is_terminal());
        assert!(RecorderState::Deleted.is_terminal());
        assert!(!RecorderState::Idle.is_terminal());
        assert!(!RecorderState::Recording.is_terminal());
        assert!(!RecorderState::Finalizing.is_terminal());
    }

    #[test]
    fn settling_states() {
        assert!(RecorderState::Stopping.is_settling());
        assert!(RecorderState::ForceStopping.is_settling());
        assert!(RecorderState::Finalizing.is_settling());
        assert!(!RecorderState::Recording.is_settling());
    }

    #[test]
    fn metadata_serializes_camel_case() {
        let meta = RecordingMetadata {
            size_bytes: 42,
            ..RecordingMetadata::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["sizeBytes"], 42);
        assert_eq!(json["forceStopped"], false);
        assert!(json["startedAt"].is_null());
    }
}
