//! External control surfaces that accept the suspend signal.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::ActivityError;

/// Value written to a control surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuspendSignal {
    /// Work is in progress; the host must stay up.
    Forbidden,
    /// Quiet period elapsed; the host may suspend.
    Permitted,
}

/// Something that can be told whether the host may suspend.
#[async_trait]
pub trait ControlSurface: Send + Sync {
    /// Apply `signal`. Called only when the value actually changes.
    async fn apply(&self, signal: SuspendSignal) -> Result<(), ActivityError>;

    /// Short name for log lines.
    fn name(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────────────────
// Unikraft Cloud
// ─────────────────────────────────────────────────────────────────────────────

/// Unikraft Cloud scale-to-zero control file.
///
/// Writing `+` disables scale-to-zero, `-` re-enables it. Outside a Unikraft
/// instance the file does not exist and every write is a no-op.
#[derive(Debug, Clone)]
pub struct UnikraftControl {
    path: PathBuf,
}

impl UnikraftControl {
    /// Default location of the control file inside an instance.
    pub const DEFAULT_PATH: &'static str = "/uk/libukp/scale_to_zero_disable";

    /// Control the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Control file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for UnikraftControl {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}

#[async_trait]
impl ControlSurface for UnikraftControl {
    async fn apply(&self, signal: SuspendSignal) -> Result<(), ActivityError> {
        let io_err = |source| ActivityError::Io {
            path: self.path.clone(),
            source,
        };
        if !tokio::fs::try_exists(&self.path).await.map_err(io_err)? {
            debug!(path = %self.path.display(), "scale-to-zero control absent, skipping");
            return Ok(());
        }
        let value: &[u8] = match signal {
            SuspendSignal::Forbidden => b"+",
            SuspendSignal::Permitted => b"-",
        };
        tokio::fs::write(&self.path, value).await.map_err(io_err)
    }

    fn name(&self) -> &'static str {
        "unikraft"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// No-op and in-memory surfaces
// ─────────────────────────────────────────────────────────────────────────────

/// Surface for environments without a suspend mechanism.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopControl;

#[async_trait]
impl ControlSurface for NoopControl {
    async fn apply(&self, _signal: SuspendSignal) -> Result<(), ActivityError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Surface that records every write, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryControl {
    writes: Mutex<Vec<SuspendSignal>>,
}

impl MemoryControl {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// All writes so far, oldest first.
    pub fn writes(&self) -> Vec<SuspendSignal> {
        self.writes.lock().clone()
    }

    /// Most recent write.
    pub fn last(&self) -> Option<SuspendSignal> {
        self.writes.lock().last().copied()
    }
}

#[async_trait]
impl ControlSurface for MemoryControl {
    async fn apply(&self, signal: SuspendSignal) -> Result<(), ActivityError> {
        self.writes.lock().push(signal);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unikraft_writes_plus_and_minus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scale_to_zero_disable");
        std::fs::write(&path, "").unwrap();
        let control = UnikraftControl::new(&path);

        control.apply(SuspendSignal::Forbidden).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "+");

        control.apply(SuspendSignal::Permitted).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "-");
    }

    #[tokio::test]
    async fn unikraft_absent_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        let control = UnikraftControl::new(&path);

        control.apply(SuspendSignal::Forbidden).await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn unikraft_default_path() {
        let control = UnikraftControl::default();
        assert_eq!(control.path(), Path::new("/uk/libukp/scale_to_zero_disable"));
        assert_eq!(control.name(), "unikraft");
    }

    #[tokio::test]
    async fn memory_records_history() {
        let control = MemoryControl::new();
        control.apply(SuspendSignal::Forbidden).await.unwrap();
        control.apply(SuspendSignal::Permitted).await.unwrap();
        assert_eq!(
            control.writes(),
            vec![SuspendSignal::Forbidden, SuspendSignal::Permitted]
        );
        assert_eq!(control.last(), Some(SuspendSignal::Permitted));
    }

    #[tokio::test]
    async fn noop_never_errors() {
        NoopControl.apply(SuspendSignal::Permitted).await.unwrap();
    }
}
