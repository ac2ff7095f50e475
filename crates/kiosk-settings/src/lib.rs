//! # kiosk-settings
//!
//! Configuration for the kiosk host, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`KioskSettings::default()`]
//! 2. **Settings file**: optional JSON file, deep-merged over defaults
//! 3. **Environment variables**: `PORT`, `FRAME_RATE`, `OUTPUT_DIR`, ... (highest priority)
//!
//! The merged result is checked with [`KioskSettings::validate`] before use.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, apply_overrides, deep_merge, load_settings};
pub use types::*;
