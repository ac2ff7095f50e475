//! Debounced activity controller.
//!
//! State is a holder count plus a [`Phase`]. `mark_active` moves to
//! [`Phase::Active`] immediately; dropping the last holder moves to
//! [`Phase::PendingIdle`] with a deadline, and a single worker task promotes
//! it to [`Phase::Idle`] once the deadline passes untouched.
//!
//! Surface writes go through `Inner::sync`, which derives the desired signal
//! from the current phase while holding the write lock. Whoever syncs last
//! therefore writes the latest truth, and callers that find the surface already
//! in the desired state skip the write.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{ControlSurface, NoopControl, SuspendSignal};

/// Controller phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// At least one holder, or activity since the last idle transition.
    Active,
    /// No holders; suspension will be permitted at the deadline.
    PendingIdle(Instant),
    /// Quiet; suspension permitted.
    Idle,
}

impl Phase {
    fn signal(self) -> SuspendSignal {
        match self {
            Self::Active | Self::PendingIdle(_) => SuspendSignal::Forbidden,
            Self::Idle => SuspendSignal::Permitted,
        }
    }
}

/// Point-in-time view of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivitySnapshot {
    /// Outstanding holders.
    pub holders: usize,
    /// Current phase.
    pub phase: Phase,
}

struct State {
    holders: usize,
    phase: Phase,
}

struct Inner {
    state: Mutex<State>,
    surface: Arc<dyn ControlSurface>,
    /// Last value successfully written; `None` until the first write.
    written: tokio::sync::Mutex<Option<SuspendSignal>>,
    wake: Notify,
    debounce: Duration,
}

impl Inner {
    async fn sync(&self) {
        let mut written = self.written.lock().await;
        let desired = self.state.lock().phase.signal();
        if *written == Some(desired) {
            return;
        }
        match self.surface.apply(desired).await {
            Ok(()) => {
                debug!(surface = self.surface.name(), ?desired, "suspend signal written");
                *written = Some(desired);
            }
            Err(e) => {
                warn!(
                    surface = self.surface.name(),
                    ?desired,
                    error = %e,
                    "failed to write suspend signal"
                );
            }
        }
    }
}

/// Shared handle to the activity controller. Cheap to clone.
#[derive(Clone)]
pub struct ActivityController {
    inner: Arc<Inner>,
}

impl ActivityController {
    /// Create a controller writing to `surface` after `debounce` of quiet.
    ///
    /// Idle transitions only happen once [`start`](Self::start) has spawned
    /// the worker.
    pub fn new(surface: Arc<dyn ControlSurface>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    holders: 0,
                    phase: Phase::Idle,
                }),
                surface,
                written: tokio::sync::Mutex::new(None),
                wake: Notify::new(),
                debounce,
            }),
        }
    }

    /// Controller with no external effect.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopControl), Duration::ZERO)
    }

    /// Spawn the debounce worker. It exits when `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            info!(
                surface = inner.surface.name(),
                debounce_ms = u64::try_from(inner.debounce.as_millis()).unwrap_or(u64::MAX),
                "activity controller started"
            );
            run_worker(inner, cancel).await;
            debug!("activity controller stopped");
        })
    }

    /// Register a unit of work. Cancels any pending idle transition.
    ///
    /// Must be paired with [`mark_idle_candidate`](Self::mark_idle_candidate);
    /// prefer [`hold`](Self::hold).
    pub async fn mark_active(&self) {
        {
            let mut state = self.inner.state.lock();
            state.holders += 1;
            state.phase = Phase::Active;
        }
        self.inner.sync().await;
    }

    /// Release a unit of work.
    ///
    /// When no holders remain, (re)arms the debounce deadline.
    pub fn mark_idle_candidate(&self) {
        let mut state = self.inner.state.lock();
        if state.holders == 0 {
            warn!("idle candidate without matching mark_active");
        }
        state.holders = state.holders.saturating_sub(1);
        if state.holders == 0 {
            state.phase = Phase::PendingIdle(Instant::now() + self.inner.debounce);
            drop(state);
            self.inner.wake.notify_one();
        }
    }

    /// Mark active and return a guard that marks idle on drop.
    pub async fn hold(&self) -> ActivityGuard {
        self.mark_active().await;
        ActivityGuard {
            controller: self.clone(),
        }
    }

    /// Current holders and phase.
    pub fn snapshot(&self) -> ActivitySnapshot {
        let state = self.inner.state.lock();
        ActivitySnapshot {
            holders: state.holders,
            phase: state.phase,
        }
    }
}

impl std::fmt::Debug for ActivityController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityController")
            .field("surface", &self.inner.surface.name())
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

/// RAII activity hold. Dropping it releases the hold.
#[must_use = "activity is released as soon as the guard is dropped"]
pub struct ActivityGuard {
    controller: ActivityController,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.controller.mark_idle_candidate();
    }
}

impl std::fmt::Debug for ActivityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ActivityGuard")
    }
}

async fn run_worker(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        let deadline = match inner.state.lock().phase {
            Phase::PendingIdle(deadline) => Some(deadline),
            Phase::Active | Phase::Idle => None,
        };

        let Some(deadline) = deadline else {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = inner.wake.notified() => {}
            }
            continue;
        };

        tokio::select! {
            () = cancel.cancelled() => return,
            () = inner.wake.notified() => {}
            () = tokio::time::sleep_until(deadline) => {
                let fired = {
                    let mut state = inner.state.lock();
                    match state.phase {
                        Phase::PendingIdle(d) if d <= Instant::now() => {
                            state.phase = Phase::Idle;
                            true
                        }
                        _ => false,
                    }
                };
                if fired {
                    debug!("quiet period elapsed, permitting suspend");
                    inner.sync().await;
                }
            }
        }
    }
}
