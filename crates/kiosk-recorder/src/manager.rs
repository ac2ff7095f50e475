//! Recorder registry and factory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kiosk_activity::ActivityController;
use kiosk_core::RecorderId;
use kiosk_settings::RecordingSettings;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{RecorderError, Result};
use crate::params::{RecordingParams, ResolvedParams};
use crate::recorder::{Recorder, RecorderConfig};

/// Builds recorders from request parameters and configured defaults.
#[derive(Debug, Clone)]
pub struct RecorderFactory {
    defaults: RecordingSettings,
    activity: ActivityController,
}

impl RecorderFactory {
    /// Factory using `defaults` for absent parameters.
    pub fn new(defaults: RecordingSettings, activity: ActivityController) -> Self {
        Self { defaults, activity }
    }

    /// Validate parameters and create an idle recorder.
    pub fn create(&self, id: RecorderId, params: RecordingParams) -> Result<Arc<Recorder>> {
        let resolved = ResolvedParams::resolve(&self.defaults, params)?;
        let config = RecorderConfig {
            ffmpeg_path: self.defaults.ffmpeg_path.clone(),
            output_dir: self.defaults.output_dir.clone(),
            stop_timeout: self.defaults.stop_timeout(),
        };
        Ok(Arc::new(Recorder::spawn(
            id,
            resolved,
            config,
            self.activity.clone(),
        )))
    }
}

/// Registry of recorders by ID.
///
/// At most one recorder per ID may be unsettled (not `Completed`, `Failed`,
/// or `Deleted`) at any time.
#[derive(Debug, Default)]
pub struct RecordManager {
    recorders: RwLock<HashMap<RecorderId, Arc<Recorder>>>,
}

impl RecordManager {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `recorder`, atomically checking that no live recorder holds its ID.
    ///
    /// A settled recorder under the same ID is replaced and its artifact is
    /// deleted in the background. Readers that already opened the old file
    /// keep reading it to the end. Must be called inside a tokio runtime.
    pub fn register_recorder(&self, recorder: Arc<Recorder>) -> Result<()> {
        let replaced = {
            let mut recorders = self.recorders.write();
            if let Some(existing) = recorders.get(recorder.id()) {
                let state = existing.state();
                if !state.is_terminal() {
                    return Err(RecorderError::AlreadyActive {
                        id: recorder.id().clone(),
                        state,
                    });
                }
                info!(recorder_id = %recorder.id(), ?state, "replacing settled recorder");
            }
            recorders.insert(recorder.id().clone(), recorder)
        };
        if let Some(old) = replaced {
            let _ = tokio::spawn(async move {
                if let Err(e) = old.delete().await {
                    warn!(
                        recorder_id = %old.id(),
                        path = %old.output_path().display(),
                        error = %e,
                        "failed to delete replaced recording"
                    );
                }
            });
        }
        Ok(())
    }

    /// Remove `recorder` if it is still the one registered under its ID.
    pub fn deregister_recorder(&self, recorder: &Arc<Recorder>) {
        let mut recorders = self.recorders.write();
        if recorders
            .get(recorder.id())
            .is_some_and(|current| Arc::ptr_eq(current, recorder))
        {
            let _ = recorders.remove(recorder.id());
        }
    }

    /// Look up a recorder.
    pub fn get_recorder(&self, id: &RecorderId) -> Option<Arc<Recorder>> {
        self.recorders.read().get(id).cloned()
    }

    /// Look up a recorder or fail with [`RecorderError::NotFound`].
    pub fn require(&self, id: &RecorderId) -> Result<Arc<Recorder>> {
        self.get_recorder(id).ok_or_else(|| RecorderError::NotFound {
            id: id.to_string(),
        })
    }

    /// All recorders, ordered by ID.
    pub fn list_recorders(&self) -> Vec<Arc<Recorder>> {
        let mut all: Vec<_> = self.recorders.read().values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Number of registered recorders.
    pub fn len(&self) -> usize {
        self.recorders.read().len()
    }

    /// Whether no recorder is registered.
    pub fn is_empty(&self) -> bool {
        self.recorders.read().is_empty()
    }

    /// Gracefully stop every capturing recorder, waiting at most `timeout`.
    ///
    /// Used on shutdown. Failures are logged; the remaining recorders are
    /// still stopped.
    pub async fn stop_all(&self, timeout: Duration) {
        let active: Vec<_> = self
            .list_recorders()
            .into_iter()
            .filter(|r| r.is_recording() || r.state().is_settling())
            .collect();
        if active.is_empty() {
            return;
        }
        info!(count = active.len(), "stopping active recordings");

        let stops = active.iter().map(|r| async move {
            if let Err(e) = r.stop().await {
                warn!(recorder_id = %r.id(), error = %e, "failed to stop recording on shutdown");
            }
        });
        if tokio::time::timeout(timeout, futures::future::join_all(stops))
            .await
            .is_err()
        {
            warn!("timed out stopping recordings after {timeout:?}");
        }
    }
}
