//! Recording parameters.

use kiosk_settings::{MAX_FRAME_RATE, MAX_SIZE_MB_LIMIT, RecordingSettings};
use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, Result};

/// Per-request overrides. Absent fields fall back to configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingParams {
    /// Capture frame rate.
    pub frame_rate: Option<u32>,
    /// Size cap in megabytes.
    pub max_size_mb: Option<u32>,
    /// Duration cap in seconds.
    pub max_duration_secs: Option<u64>,
}

/// Fully resolved and validated parameters for one recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedParams {
    /// Capture frame rate.
    pub frame_rate: u32,
    /// X display index.
    pub display_num: u32,
    /// Size cap in megabytes.
    pub max_size_mb: u32,
    /// Duration cap in seconds; unbounded when absent.
    pub max_duration_secs: Option<u64>,
}

impl ResolvedParams {
    /// Merge `overrides` over `defaults` and validate the result.
    pub fn resolve(defaults: &RecordingSettings, overrides: RecordingParams) -> Result<Self> {
        let resolved = Self {
            frame_rate: overrides.frame_rate.unwrap_or(defaults.frame_rate),
            display_num: defaults.display_num,
            max_size_mb: overrides.max_size_mb.unwrap_or(defaults.max_size_mb),
            max_duration_secs: overrides.max_duration_secs.or(defaults.max_duration_secs),
        };
        resolved.validate()?;
        Ok(resolved)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(RecorderError::InvalidParams { reason });
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return invalid(format!("framerate must be between 1 and {MAX_FRAME_RATE}"));
        }
        if self.max_size_mb == 0 || self.max_size_mb > MAX_SIZE_MB_LIMIT {
            return invalid(format!(
                "maxFileSizeInMB must be between 1 and {MAX_SIZE_MB_LIMIT}"
            ));
        }
        if self.max_duration_secs == Some(0) {
            return invalid("maxDurationInSeconds must be positive".to_string());
        }
        Ok(())
    }

    /// Size cap in bytes, as passed to ffmpeg `-fs`.
    pub fn max_size_bytes(&self) -> u64 {
        u64::from(self.max_size_mb) * 1024 * 1024
    }
}
