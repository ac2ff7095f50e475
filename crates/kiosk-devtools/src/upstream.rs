//! Tracks the browser's current devtools websocket URL.
//!
//! Chromium prints `DevTools listening on ws://...` each time it starts. The
//! supervisor writes that to a log file, which [`UpstreamManager`] follows.
//! Each distinct URL bumps the endpoint generation; a repeated announcement
//! of the same URL is ignored.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use kiosk_settings::DevtoolsSettings;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DevtoolsError, Result};
use crate::tail::LogTailer;

static ANNOUNCEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DevTools listening on (ws://\S+)").expect("announcement pattern compiles")
});

/// Read errors back off up to this interval.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Extract the websocket URL from a chromium log line.
pub fn parse_announcement(line: &str) -> Option<&str> {
    ANNOUNCEMENT
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// One announced upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Browser-level websocket URL, e.g. `ws://127.0.0.1:9223/devtools/browser/<id>`.
    pub url: String,
    /// Starts at 1 and increases by one per distinct URL.
    pub generation: u64,
}

struct Inner {
    log_path: PathBuf,
    poll_interval: Duration,
    endpoint: watch::Sender<Option<Endpoint>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Follows the chromium log and publishes the current endpoint.
///
/// Cheap to clone; clones share the same tailer and endpoint.
#[derive(Clone)]
pub struct UpstreamManager {
    inner: Arc<Inner>,
}

impl UpstreamManager {
    /// Manager following `log_path`, polling every `poll_interval`.
    pub fn new(log_path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let (endpoint, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                log_path: log_path.into(),
                poll_interval,
                endpoint,
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Manager configured from settings.
    pub fn from_settings(settings: &DevtoolsSettings) -> Self {
        Self::new(settings.chromium_log_path.clone(), settings.poll_interval())
    }

    /// Spawn the tailer. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            debug!("upstream manager already started");
            return;
        }
        if self.inner.cancel.is_cancelled() {
            warn!("upstream manager restarted after stop, ignoring");
            return;
        }
        info!(
            path = %self.inner.log_path.display(),
            poll_ms = u64::try_from(self.inner.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "following chromium log for devtools upstream"
        );
        *task = Some(tokio::spawn(run_tailer(
            self.clone(),
            self.inner.cancel.clone(),
        )));
    }

    /// Current upstream URL, if one has been announced.
    pub fn current(&self) -> Option<String> {
        self.inner.endpoint.borrow().as_ref().map(|e| e.url.clone())
    }

    /// Current URL together with its generation.
    pub fn current_endpoint(&self) -> Option<Endpoint> {
        self.inner.endpoint.borrow().clone()
    }

    /// Wait until an endpoint is known, or fail after `timeout`.
    pub async fn wait_for_initial(&self, timeout: Duration) -> Result<Endpoint> {
        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|endpoint| endpoint.clone())
        })
        .await;
        match waited {
            Ok(Some(endpoint)) => Ok(endpoint),
            Ok(None) | Err(_) => Err(DevtoolsError::UpstreamTimeout { waited: timeout }),
        }
    }

    /// Stop the tailer and wait for it to exit. Safe to call more than once.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "upstream tailer ended abnormally");
            }
            info!("upstream manager stopped");
        }
    }

    /// Observe endpoint changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Endpoint>> {
        self.inner.endpoint.subscribe()
    }

    /// Record an announced URL. Returns `true` if it replaced the current one.
    pub fn announce(&self, url: &str) -> bool {
        let mut replaced = None;
        let changed = self.inner.endpoint.send_if_modified(|current| {
            if current.as_ref().is_some_and(|e| e.url == url) {
                return false;
            }
            let generation = current.as_ref().map_or(1, |e| e.generation + 1);
            replaced = current.as_ref().map(|e| e.url.clone());
            *current = Some(Endpoint {
                url: url.to_string(),
                generation,
            });
            true
        });
        if changed {
            info!(url, previous = replaced.as_deref(), "devtools upstream updated");
        } else {
            debug!(url, "devtools upstream re-announced unchanged");
        }
        changed
    }
}

impl std::fmt::Debug for UpstreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamManager")
            .field("log_path", &self.inner.log_path)
            .field("endpoint", &*self.inner.endpoint.borrow())
            .finish_non_exhaustive()
    }
}

async fn run_tailer(manager: UpstreamManager, cancel: CancellationToken) {
    let poll_interval = manager.inner.poll_interval;
    let mut tailer = LogTailer::new(manager.inner.log_path.clone());
    let mut delay = poll_interval;

    loop {
        match tailer.poll().await {
            Ok(lines) => {
                delay = poll_interval;
                for line in &lines {
                    if let Some(url) = parse_announcement(line) {
                        let _ = manager.announce(url);
                    }
                }
            }
            Err(e) => {
                delay = (delay * 2).min(MAX_BACKOFF).max(poll_interval);
                warn!(
                    path = %tailer.path().display(),
                    error = %e,
                    retry_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "failed to read chromium log"
                );
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
    debug!("upstream tailer exiting");
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;

    const URL_A: &str = "ws://127.0.0.1:9223/devtools/browser/aaaa";
    const URL_B: &str = "ws://127.0.0.1:9223/devtools/browser/bbbb";

    fn append(path: &std::path::Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn parses_announcement_line() {
        let line = format!("[0101/000000.000:INFO] DevTools listening on {URL_A}");
        assert_eq!(parse_announcement(&line), Some(URL_A));
        assert_eq!(parse_announcement("DevTools listening on http://x"), None);
        assert_eq!(parse_announcement("unrelated"), None);
    }

    #[test]
    fn same_url_does_not_bump_generation() {
        let mgr = UpstreamManager::new("/nonexistent", Duration::from_millis(10));
        assert!(mgr.current().is_none());

        assert!(mgr.announce(URL_A));
        assert!(!mgr.announce(URL_A));
        assert_eq!(mgr.current_endpoint().unwrap().generation, 1);

        assert!(mgr.announce(URL_B));
        let endpoint = mgr.current_endpoint().unwrap();
        assert_eq!(endpoint.url, URL_B);
        assert_eq!(endpoint.generation, 2);
    }

    #[tokio::test]
    async fn wait_for_initial_times_out() {
        let mgr = UpstreamManager::new("/nonexistent", Duration::from_millis(10));
        assert_matches!(
            mgr.wait_for_initial(Duration::from_millis(50)).await,
            Err(DevtoolsError::UpstreamTimeout { .. })
        );
    }

    #[tokio::test]
    async fn follows_log_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chromium");
        let mgr = UpstreamManager::new(&path, Duration::from_millis(10));
        mgr.start();
        mgr.start();

        append(&path, "starting\n");
        append(&path, &format!("DevTools listening on {URL_A}\n"));
        let first = mgr.wait_for_initial(Duration::from_secs(5)).await.unwrap();
        assert_eq!(first.url, URL_A);

        let mut rx = mgr.subscribe();
        append(&path, &format!("DevTools listening on {URL_B}\n"));
        let next = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|e| e.as_ref().is_some_and(|e| e.url == URL_B)),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(next.unwrap().generation, 2);

        mgr.stop().await;
        mgr.stop().await;
    }

    #[tokio::test]
    async fn announcement_before_start_is_read_from_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chromium");
        append(&path, &format!("DevTools listening on {URL_A}\n"));
        append(&path, &format!("DevTools listening on {URL_B}\n"));

        let mgr = UpstreamManager::new(&path, Duration::from_millis(10));
        mgr.start();
        let mut rx = mgr.subscribe();
        let latest = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|e| e.as_ref().is_some_and(|e| e.url == URL_B)),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(latest.unwrap().generation, 2);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn concurrent_readers_see_whole_urls() {
        let mgr = UpstreamManager::new("/nonexistent", Duration::from_millis(10));
        let _ = mgr.announce(URL_A);

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        let url = mgr.current().unwrap();
                        assert!(url == URL_A || url == URL_B);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for i in 0..200 {
            let _ = mgr.announce(if i % 2 == 0 { URL_B } else { URL_A });
            tokio::task::yield_now().await;
        }
        for r in readers {
            r.await.unwrap();
        }
        // the final announcement (i = 199) wins
        assert_eq!(mgr.current().as_deref(), Some(URL_A));
    }
}
