//! # kiosk-recorder
//!
//! Screen recording through an external ffmpeg process.
//!
//! - [`Recorder`]: one recording's lifecycle, driven by a dedicated actor task
//!   that owns the ffmpeg child process
//! - [`RecordManager`]: registry guaranteeing at most one live recorder per ID
//! - [`RecorderFactory`]: merges request parameters over configured defaults
//!
//! Lifecycle: `Idle → Recording → (Stopping | ForceStopping) → Finalizing →
//! Completed`, with `Failed` when finalize goes wrong and `Deleted` once the
//! artifact is removed.

#![deny(unsafe_code)]

pub mod error;
pub mod ffmpeg;
pub mod manager;
pub mod params;
pub mod recorder;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod types;

pub use error::{RecorderError, Result};
pub use manager::{RecordManager, RecorderFactory};
pub use params::{RecordingParams, ResolvedParams};
pub use recorder::{Recorder, RecorderConfig};
pub use types::{RecorderState, RecorderStatus, RecordingMetadata};
