//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`KioskSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use kiosk_core::logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{KioskSettings, MAX_FRAME_RATE, MAX_SIZE_MB_LIMIT};

/// Load settings from an optional file, apply env overrides, and validate.
///
/// A missing file is not an error; invalid JSON is.
pub fn load_settings(path: Option<&Path>) -> Result<KioskSettings> {
    let defaults = serde_json::to_value(KioskSettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: KioskSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut KioskSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are logged and ignored (fall back to file/default)
pub fn apply_overrides(settings: &mut KioskSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Listeners ───────────────────────────────────────────────────
    if let Some(v) = env.u16("PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u16("DEVTOOLS_PORT", 1, 65535) {
        settings.server.devtools_port = v;
    }
    if let Some(v) = env.u64("SHUTDOWN_TIMEOUT_SECS", 1, 600) {
        settings.server.shutdown_timeout_secs = v;
    }

    // ── Recording ───────────────────────────────────────────────────
    if let Some(v) = env.u32("FRAME_RATE", 1, MAX_FRAME_RATE) {
        settings.recording.frame_rate = v;
    }
    if let Some(v) = env.u32("DISPLAY_NUM", 0, 99) {
        settings.recording.display_num = v;
    }
    if let Some(v) = env.u32("MAX_SIZE_MB", 1, MAX_SIZE_MB_LIMIT) {
        settings.recording.max_size_mb = v;
    }
    if let Some(v) = env.u64("MAX_DURATION_SECS", 1, 86_400) {
        settings.recording.max_duration_secs = Some(v);
    }
    if let Some(v) = env.string("OUTPUT_DIR") {
        settings.recording.output_dir = PathBuf::from(v);
    }
    if let Some(v) = env.string("FFMPEG_PATH") {
        settings.recording.ffmpeg_path = PathBuf::from(v);
    }

    // ── Devtools ────────────────────────────────────────────────────
    if let Some(v) = env.string("CHROMIUM_LOG_PATH") {
        settings.devtools.chromium_log_path = PathBuf::from(v);
    }
    if let Some(v) = env.u64("UPSTREAM_WAIT_SECS", 1, 600) {
        settings.devtools.upstream_wait_secs = v;
    }
    if let Some(v) = env.bool("LOG_CDP_MESSAGES") {
        settings.devtools.log_cdp_messages = v;
    }

    // ── Activity ────────────────────────────────────────────────────
    if let Some(v) = env.string("SCALE_TO_ZERO_CONTROL_PATH") {
        settings.activity.control_path = PathBuf::from(v);
    }
    if let Some(v) = env.u64("SCALE_TO_ZERO_DEBOUNCE_MS", 0, 600_000) {
        settings.activity.debounce_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(e) => warn!(key = "LOG_FORMAT", value = %v, error = %e, "invalid env var, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as an unsigned integer within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.ranged(name, min, max)
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.ranged(name, min, max)
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.ranged(name, min, max)
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
    {
        let val = self.string(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, %min, %max, "invalid numeric env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use proptest::prelude::*;
    use serde_json::json;

    fn overrides(pairs: &[(&str, &str)]) -> KioskSettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = KioskSettings::default();
        apply_overrides(&mut settings, |name| vars.get(name).cloned());
        settings
    }

    #[test]
    fn deep_merge_objects() {
        let merged = deep_merge(
            json!({"a": {"b": 1, "c": 2}, "d": 3}),
            json!({"a": {"b": 10}, "e": 4}),
        );
        assert_eq!(merged, json!({"a": {"b": 10, "c": 2}, "d": 3, "e": 4}));
    }

    #[test]
    fn deep_merge_skips_null() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged, json!({"a": [3]}));
    }

    #[test]
    fn env_overrides_recording() {
        let s = overrides(&[
            ("FRAME_RATE", "15"),
            ("DISPLAY_NUM", "0"),
            ("MAX_SIZE_MB", "250"),
            ("OUTPUT_DIR", "/recordings"),
            ("FFMPEG_PATH", "/usr/bin/ffmpeg"),
        ]);
        assert_eq!(s.recording.frame_rate, 15);
        assert_eq!(s.recording.display_num, 0);
        assert_eq!(s.recording.max_size_mb, 250);
        assert_eq!(s.recording.output_dir, PathBuf::from("/recordings"));
        assert_eq!(s.recording.ffmpeg_path, PathBuf::from("/usr/bin/ffmpeg"));
    }

    #[test]
    fn env_overrides_listeners_and_devtools() {
        let s = overrides(&[
            ("PORT", "8080"),
            ("DEVTOOLS_PORT", "9333"),
            ("LOG_CDP_MESSAGES", "yes"),
            ("CHROMIUM_LOG_PATH", "/tmp/chromium.log"),
            ("SCALE_TO_ZERO_DEBOUNCE_MS", "0"),
        ]);
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.server.devtools_port, 9333);
        assert!(s.devtools.log_cdp_messages);
        assert_eq!(s.devtools.chromium_log_path, PathBuf::from("/tmp/chromium.log"));
        assert_eq!(s.activity.debounce_ms, 0);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let s = overrides(&[
            ("FRAME_RATE", "25"),
            ("MAX_SIZE_MB", "lots"),
            ("PORT", "0"),
            ("LOG_CDP_MESSAGES", "maybe"),
            ("LOG_FORMAT", "xml"),
        ]);
        let d = KioskSettings::default();
        assert_eq!(s.recording.frame_rate, d.recording.frame_rate);
        assert_eq!(s.recording.max_size_mb, d.recording.max_size_mb);
        assert_eq!(s.server.port, d.server.port);
        assert!(!s.devtools.log_cdp_messages);
        assert_eq!(s.logging.format, LogFormat::Compact);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let s = overrides(&[("OUTPUT_DIR", "")]);
        assert_eq!(s.recording.output_dir, PathBuf::from("."));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(s.devtools.close_grace_ms, 2000);
    }

    #[test]
    fn load_merges_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.json");
        std::fs::write(
            &path,
            r#"{"recording": {"maxSizeMb": 100, "maxDurationSecs": 60}, "devtools": {"closeGraceMs": 500}}"#,
        )
        .unwrap();
        let s = load_settings(Some(&path)).unwrap();
        assert_eq!(s.recording.max_size_mb, 100);
        assert_eq!(s.recording.max_duration_secs, Some(60));
        assert_eq!(s.recording.frame_rate, 10);
        assert_eq!(s.devtools.close_grace_ms, 500);
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings(Some(&path)).is_err());
    }

    #[test]
    fn load_rejects_out_of_range_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.json");
        std::fs::write(&path, r#"{"recording": {"frameRate": 60}}"#).unwrap();
        assert!(load_settings(Some(&path)).is_err());
    }

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true));
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false));
        }
        assert_eq!(parse_bool("2"), None);
    }

    proptest! {
        #[test]
        fn parse_range_respects_bounds(n in 0u64..2000, min in 0u64..1000, span in 0u64..1000) {
            let max = min + span;
            let parsed = parse_range(&n.to_string(), min, max);
            prop_assert_eq!(parsed.is_some(), n >= min && n <= max);
        }
    }
}
