//! Settings types and compiled defaults.

use std::path::PathBuf;
use std::time::Duration;

use kiosk_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Highest accepted capture frame rate.
pub const MAX_FRAME_RATE: u32 = 20;
/// Highest accepted recording size cap in megabytes.
pub const MAX_SIZE_MB_LIMIT: u32 = 1000;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KioskSettings {
    /// Listener addresses and shutdown behavior.
    pub server: ServerSettings,
    /// Defaults applied to every new recorder.
    pub recording: RecordingSettings,
    /// Upstream discovery and relay behavior.
    pub devtools: DevtoolsSettings,
    /// Scale-to-zero control.
    pub activity: ActivitySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl KioskSettings {
    /// Check every field for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(SettingsError::invalid("server.port", "must not be 0"));
        }
        if self.server.devtools_port == 0 {
            return Err(SettingsError::invalid("server.devtoolsPort", "must not be 0"));
        }
        if self.server.port == self.server.devtools_port
            && self.server.host == self.server.devtools_host
        {
            return Err(SettingsError::invalid(
                "server.devtoolsPort",
                "must differ from server.port",
            ));
        }
        self.recording.validate()?;
        if self.devtools.chromium_log_path.as_os_str().is_empty() {
            return Err(SettingsError::invalid("devtools.chromiumLogPath", "must not be empty"));
        }
        if self.devtools.poll_interval_ms == 0 {
            return Err(SettingsError::invalid("devtools.pollIntervalMs", "must be positive"));
        }
        if self.devtools.upstream_wait_secs == 0 {
            return Err(SettingsError::invalid("devtools.upstreamWaitSecs", "must be positive"));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address of the recording API.
    pub host: String,
    /// Port of the recording API.
    pub port: u16,
    /// Bind address of the devtools relay.
    pub devtools_host: String,
    /// Port of the devtools relay.
    pub devtools_port: u16,
    /// Grace period for in-flight work on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10001,
            devtools_host: "0.0.0.0".to_string(),
            devtools_port: 9222,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    /// `host:port` of the recording API.
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:port` of the devtools relay.
    pub fn devtools_addr(&self) -> String {
        format!("{}:{}", self.devtools_host, self.devtools_port)
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Recorder defaults and ffmpeg invocation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingSettings {
    /// Capture frame rate.
    pub frame_rate: u32,
    /// X display index to capture (`:N`).
    pub display_num: u32,
    /// Size cap passed to ffmpeg `-fs`.
    pub max_size_mb: u32,
    /// Duration cap passed to ffmpeg `-t`; unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,
    /// Directory recordings are written to.
    pub output_dir: PathBuf,
    /// ffmpeg executable (name on `PATH` or absolute path).
    pub ffmpeg_path: PathBuf,
    /// How long a graceful stop waits before escalating to SIGKILL.
    pub stop_timeout_secs: u64,
    /// In-progress files at or below this size are answered with a retry.
    pub min_download_bytes: u64,
    /// `Retry-After` value sent with a retry.
    pub retry_after_secs: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            frame_rate: 10,
            display_num: 1,
            max_size_mb: 500,
            max_duration_secs: None,
            output_dir: PathBuf::from("."),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            stop_timeout_secs: 10,
            min_download_bytes: 100,
            retry_after_secs: 300,
        }
    }
}

impl RecordingSettings {
    /// Range checks shared with request validation.
    pub fn validate(&self) -> Result<()> {
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return Err(SettingsError::invalid(
                "recording.frameRate",
                format!("must be between 1 and {MAX_FRAME_RATE}"),
            ));
        }
        if self.max_size_mb == 0 || self.max_size_mb > MAX_SIZE_MB_LIMIT {
            return Err(SettingsError::invalid(
                "recording.maxSizeMb",
                format!("must be between 1 and {MAX_SIZE_MB_LIMIT}"),
            ));
        }
        if self.max_duration_secs == Some(0) {
            return Err(SettingsError::invalid("recording.maxDurationSecs", "must be positive"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(SettingsError::invalid("recording.outputDir", "must not be empty"));
        }
        if self.ffmpeg_path.as_os_str().is_empty() {
            return Err(SettingsError::invalid("recording.ffmpegPath", "must not be empty"));
        }
        Ok(())
    }

    /// Graceful stop timeout.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Upstream discovery and relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevtoolsSettings {
    /// Supervisor log that announces the browser's devtools listener.
    pub chromium_log_path: PathBuf,
    /// How often the log is polled for new lines.
    pub poll_interval_ms: u64,
    /// How long startup waits for the first upstream before giving up.
    pub upstream_wait_secs: u64,
    /// Log method/id/direction of every relayed CDP message.
    pub log_cdp_messages: bool,
    /// Time the surviving pump gets to finish the close handshake.
    pub close_grace_ms: u64,
}

impl Default for DevtoolsSettings {
    fn default() -> Self {
        Self {
            chromium_log_path: PathBuf::from("/var/log/supervisord/chromium"),
            poll_interval_ms: 250,
            upstream_wait_secs: 10,
            log_cdp_messages: false,
            close_grace_ms: 2000,
        }
    }
}

impl DevtoolsSettings {
    /// Log poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Startup wait for the first upstream.
    pub fn upstream_wait(&self) -> Duration {
        Duration::from_secs(self.upstream_wait_secs)
    }

    /// Close handshake grace.
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Scale-to-zero settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivitySettings {
    /// Control file toggled to forbid or permit suspension.
    pub control_path: PathBuf,
    /// Quiet period before suspension is permitted.
    pub debounce_ms: u64,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            control_path: PathBuf::from("/uk/libukp/scale_to_zero_disable"),
            debounce_ms: 5000,
        }
    }
}

impl ActivitySettings {
    /// Debounce window.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
