//! A single recording, driven by one actor task.
//!
//! The [`Recorder`] handle is cheap to share. Mutating operations (`start`,
//! `stop`, `force_stop`, `delete`) are sent to the actor over a channel and
//! therefore serialize per recorder. Observers (`state`, `metadata`,
//! `is_recording`) read the last published [`RecorderStatus`] without
//! touching the actor.
//!
//! The actor owns the ffmpeg child. Process exit, the graceful-stop deadline,
//! and finalize completion arrive as events in the same loop as commands.

use std::future::pending;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::Utc;
use kiosk_activity::{ActivityController, ActivityGuard};
use kiosk_core::RecorderId;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{RecorderError, Result};
use crate::ffmpeg;
use crate::params::ResolvedParams;
use crate::types::{RecorderState, RecorderStatus, RecordingMetadata};

/// Process-level settings shared by every recorder.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// ffmpeg executable.
    pub ffmpeg_path: PathBuf,
    /// Directory recordings are written to.
    pub output_dir: PathBuf,
    /// How long a graceful stop waits before escalating to SIGKILL.
    pub stop_timeout: Duration,
}

type Reply = oneshot::Sender<Result<()>>;

enum Request {
    Start(Reply),
    Stop { force: bool, reply: Reply },
    Delete(Reply),
}

/// Handle to one recording.
pub struct Recorder {
    id: RecorderId,
    params: ResolvedParams,
    output_path: PathBuf,
    commands: mpsc::Sender<Request>,
    status: watch::Receiver<RecorderStatus>,
    activity: ActivityController,
}

impl Recorder {
    /// Create an idle recorder and spawn its actor.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        id: RecorderId,
        params: ResolvedParams,
        config: RecorderConfig,
        activity: ActivityController,
    ) -> Self {
        // One file per recorder; a replacement never reuses its predecessor's path.
        let output_path = config
            .output_dir
            .join(format!("{id}-{}.mp4", Uuid::now_v7().simple()));
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(RecorderStatus::default());

        let actor = Actor {
            id: id.clone(),
            params,
            config,
            output_path: output_path.clone(),
            commands: cmd_rx,
            status: status_tx,
            child: None,
            kill_at: None,
            pending_stops: Vec::new(),
            finalizing: None,
            activity: activity.clone(),
            hold: None,
        };
        let _ = tokio::spawn(actor.run());

        Self {
            id,
            params,
            output_path,
            commands: cmd_tx,
            status: status_rx,
            activity,
        }
    }

    /// Recorder ID.
    pub fn id(&self) -> &RecorderId {
        &self.id
    }

    /// Resolved capture parameters.
    pub fn params(&self) -> &ResolvedParams {
        &self.params
    }

    /// Where the artifact is written.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Launch ffmpeg. Transitions `Idle → Recording` once the process is running.
    pub async fn start(&self) -> Result<()> {
        self.request(Request::Start).await
    }

    /// Graceful stop: SIGINT, then SIGKILL after the stop timeout.
    ///
    /// Returns once the process has exited; finalize continues in the
    /// background. Succeeds without effect if the process already exited.
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Request::Stop {
            force: false,
            reply,
        })
        .await
    }

    /// Immediate SIGKILL. The artifact still goes through finalize.
    pub async fn force_stop(&self) -> Result<()> {
        self.request(|reply| Request::Stop { force: true, reply })
            .await
    }

    /// Remove the artifact. Refused while recording or finalizing.
    pub async fn delete(&self) -> Result<()> {
        self.request(Request::Delete).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RecorderState {
        self.status.borrow().state
    }

    /// Whether ffmpeg is capturing.
    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    /// Whether the artifact has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.state() == RecorderState::Deleted
    }

    /// Timestamps, size, and force-stop flag.
    pub fn metadata(&self) -> RecordingMetadata {
        self.status.borrow().metadata.clone()
    }

    /// Full status snapshot.
    pub fn status(&self) -> RecorderStatus {
        self.status.borrow().clone()
    }

    /// Watch every status transition.
    pub fn subscribe(&self) -> watch::Receiver<RecorderStatus> {
        self.status.clone()
    }

    /// Open the artifact for reading.
    ///
    /// While recording this is the in-progress fragmented file and the
    /// returned size is its current length. Between stop and the end of
    /// finalize this fails with [`RecorderError::Finalizing`]; callers should
    /// [`wait_for_finalization`](Self::wait_for_finalization) and retry once.
    pub async fn recording(&self) -> Result<(File, RecordingMetadata)> {
        let status = self.status();
        match status.state {
            RecorderState::Recording => {
                let file = match File::open(&self.output_path).await {
                    Ok(file) => file,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        return Err(RecorderError::NoOutputYet);
                    }
                    Err(e) => return Err(RecorderError::io("opening recording", e)),
                };
                let size = file
                    .metadata()
                    .await
                    .map_err(|e| RecorderError::io("reading recording size", e))?
                    .len();
                let meta = RecordingMetadata {
                    size_bytes: size,
                    ..status.metadata
                };
                Ok((file, meta))
            }
            RecorderState::Completed => match File::open(&self.output_path).await {
                Ok(file) => Ok((file, status.metadata)),
                Err(e) if e.kind() == io::ErrorKind::NotFound && self.is_deleted() => {
                    Err(RecorderError::Deleted)
                }
                Err(e) => Err(RecorderError::io("opening recording", e)),
            },
            RecorderState::Stopping | RecorderState::ForceStopping | RecorderState::Finalizing => {
                Err(RecorderError::Finalizing)
            }
            RecorderState::Idle => Err(RecorderError::NotStarted),
            RecorderState::Failed => Err(RecorderError::FinalizeFailed {
                reason: status.last_error.unwrap_or_default(),
            }),
            RecorderState::Deleted => Err(RecorderError::Deleted),
        }
    }

    /// Block until the recorder settles or `cancel` fires.
    ///
    /// Keeps the host awake while waiting.
    pub async fn wait_for_finalization(&self, cancel: &CancellationToken) -> Result<()> {
        let _hold = self.activity.hold().await;
        let mut status = self.status.clone();
        let settled = tokio::select! {
            () = cancel.cancelled() => return Err(RecorderError::Cancelled),
            res = status.wait_for(|s| s.state.is_terminal()) => {
                res.map(|s| (s.state, s.last_error.clone()))
            }
        };
        match settled {
            Err(_) => Err(RecorderError::WorkerGone),
            Ok((RecorderState::Completed, _)) => Ok(()),
            Ok((RecorderState::Deleted, _)) => Err(RecorderError::Deleted),
            Ok((_, last_error)) => Err(RecorderError::FinalizeFailed {
                reason: last_error.unwrap_or_default(),
            }),
        }
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Request) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| RecorderError::WorkerGone)?;
        rx.await.map_err(|_| RecorderError::WorkerGone)?
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("output_path", &self.output_path)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

enum Event {
    Request(Option<Request>),
    Exited(io::Result<ExitStatus>),
    KillDeadline,
    Finalized(std::result::Result<Result<u64>, JoinError>),
}

struct Actor {
    id: RecorderId,
    params: ResolvedParams,
    config: RecorderConfig,
    output_path: PathBuf,
    commands: mpsc::Receiver<Request>,
    status: watch::Sender<RecorderStatus>,
    child: Option<Child>,
    /// Escalate a graceful stop to SIGKILL at this instant.
    kill_at: Option<Instant>,
    pending_stops: Vec<Reply>,
    finalizing: Option<JoinHandle<Result<u64>>>,
    activity: ActivityController,
    /// Held from launch until the recorder settles.
    hold: Option<ActivityGuard>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                req = self.commands.recv() => Event::Request(req),
                exit = wait_for_exit(self.child.as_mut()) => Event::Exited(exit),
                () = sleep_until_opt(self.kill_at) => Event::KillDeadline,
                joined = join_opt(self.finalizing.as_mut()) => Event::Finalized(joined),
            };

            match event {
                Event::Request(Some(Request::Start(reply))) => {
                    let _ = reply.send(self.start().await);
                }
                Event::Request(Some(Request::Stop { force, reply })) => self.stop(force, reply),
                Event::Request(Some(Request::Delete(reply))) => {
                    let _ = reply.send(self.delete().await);
                }
                Event::Request(None) => break,
                Event::Exited(exit) => self.on_exit(exit),
                Event::KillDeadline => {
                    warn!(recorder_id = %self.id, "graceful stop timed out, killing ffmpeg");
                    self.kill_at = None;
                    self.kill(RecorderState::ForceStopping);
                }
                Event::Finalized(joined) => self.on_finalized(joined),
            }
        }

        if self.child.is_some() {
            warn!(recorder_id = %self.id, "recorder dropped while capturing, killing ffmpeg");
        }
        debug!(recorder_id = %self.id, "recorder worker exiting");
    }

    fn state(&self) -> RecorderState {
        self.status.borrow().state
    }

    async fn start(&mut self) -> Result<()> {
        match self.state() {
            RecorderState::Idle => {}
            RecorderState::Completed | RecorderState::Failed => {
                return Err(RecorderError::AlreadyFinished);
            }
            RecorderState::Deleted => return Err(RecorderError::Deleted),
            state => {
                return Err(RecorderError::AlreadyActive {
                    id: self.id.clone(),
                    state,
                });
            }
        }

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| RecorderError::io("creating output directory", e))?;

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(ffmpeg::capture_args(&self.params, &self.output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RecorderError::Spawn {
                program: self.config.ffmpeg_path.clone(),
                source,
            })?;

        if let Some(stderr) = child.stderr.take() {
            let id = self.id.clone();
            let _ = tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(recorder_id = %id, "ffmpeg: {line}");
                }
            });
        }

        info!(
            recorder_id = %self.id,
            pid = child.id(),
            frame_rate = self.params.frame_rate,
            display = self.params.display_num,
            max_size_mb = self.params.max_size_mb,
            max_duration_secs = self.params.max_duration_secs,
            output = %self.output_path.display(),
            "recording started"
        );
        self.child = Some(child);
        self.hold = Some(self.activity.hold().await);
        self.status.send_modify(|s| {
            s.state = RecorderState::Recording;
            s.metadata = RecordingMetadata {
                started_at: Some(Utc::now()),
                ..RecordingMetadata::default()
            };
            s.last_error = None;
        });
        Ok(())
    }

    fn stop(&mut self, force: bool, reply: Reply) {
        match self.state() {
            RecorderState::Idle => {
                let _ = reply.send(Err(RecorderError::NotStarted));
            }
            RecorderState::Recording if force => {
                info!(recorder_id = %self.id, "force stopping recording");
                self.kill(RecorderState::ForceStopping);
                self.pending_stops.push(reply);
            }
            RecorderState::Recording => {
                info!(recorder_id = %self.id, "gracefully stopping recording");
                let interrupted = self.child.as_ref().map_or(Ok(()), ffmpeg::interrupt);
                match interrupted {
                    Ok(()) => {
                        self.set_state(RecorderState::Stopping);
                        self.kill_at = Some(Instant::now() + self.config.stop_timeout);
                    }
                    Err(e) => {
                        warn!(recorder_id = %self.id, error = %e, "interrupt failed, killing ffmpeg");
                        self.kill(RecorderState::ForceStopping);
                    }
                }
                self.pending_stops.push(reply);
            }
            RecorderState::Stopping if force => {
                self.kill_at = None;
                self.kill(RecorderState::ForceStopping);
                self.pending_stops.push(reply);
            }
            RecorderState::Stopping | RecorderState::ForceStopping => {
                self.pending_stops.push(reply);
            }
            RecorderState::Finalizing | RecorderState::Completed | RecorderState::Failed => {
                debug!(recorder_id = %self.id, "stop after process exit, nothing to signal");
                let _ = reply.send(Ok(()));
            }
            RecorderState::Deleted => {
                let _ = reply.send(Err(RecorderError::Deleted));
            }
        }
    }

    /// SIGKILL the child and move to `state`, marking the artifact as forced.
    fn kill(&mut self, state: RecorderState) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!(recorder_id = %self.id, error = %e, "kill failed, process likely exited");
            }
        }
        self.status.send_modify(|s| {
            s.state = state;
            s.metadata.force_stopped = true;
        });
    }

    fn on_exit(&mut self, exit: io::Result<ExitStatus>) {
        self.child = None;
        self.kill_at = None;
        let previous = self.state();

        let abnormal = match &exit {
            Ok(status) if previous == RecorderState::Recording => {
                if status.success() {
                    info!(recorder_id = %self.id, %status, "ffmpeg exited on its own (limit reached)");
                    None
                } else {
                    warn!(recorder_id = %self.id, %status, "ffmpeg exited unexpectedly");
                    Some(format!("ffmpeg exited unexpectedly with {status}"))
                }
            }
            Ok(status) => {
                debug!(recorder_id = %self.id, %status, "ffmpeg exited after stop");
                None
            }
            Err(e) => {
                error!(recorder_id = %self.id, error = %e, "failed to wait for ffmpeg");
                Some(format!("failed to wait for ffmpeg: {e}"))
            }
        };

        self.status.send_modify(|s| {
            s.state = RecorderState::Finalizing;
            s.metadata.finished_at = Some(Utc::now());
            if abnormal.is_some() {
                s.last_error = abnormal;
            }
        });

        let ffmpeg_path = self.config.ffmpeg_path.clone();
        let output = self.output_path.clone();
        self.finalizing = Some(tokio::spawn(async move {
            ffmpeg::finalize(&ffmpeg_path, &output).await
        }));

        for reply in self.pending_stops.drain(..) {
            let _ = reply.send(Ok(()));
        }
    }

    fn on_finalized(&mut self, joined: std::result::Result<Result<u64>, JoinError>) {
        self.finalizing = None;
        let result = joined.unwrap_or_else(|e| {
            Err(RecorderError::FinalizeFailed {
                reason: format!("finalize task failed: {e}"),
            })
        });
        match result {
            Ok(size) => {
                info!(recorder_id = %self.id, size_bytes = size, "recording finalized");
                self.status.send_modify(|s| {
                    s.state = RecorderState::Completed;
                    s.metadata.size_bytes = size;
                });
            }
            Err(e) => {
                error!(recorder_id = %self.id, error = %e, "recording finalize failed");
                self.status.send_modify(|s| {
                    s.state = RecorderState::Failed;
                    s.last_error = Some(e.to_string());
                });
            }
        }
        self.hold = None;
    }

    async fn delete(&mut self) -> Result<()> {
        match self.state() {
            RecorderState::Recording => return Err(RecorderError::StillRecording),
            state if state.is_settling() => return Err(RecorderError::Finalizing),
            RecorderState::Deleted => return Ok(()),
            _ => {}
        }

        for path in [
            self.output_path.clone(),
            ffmpeg::finalize_temp_path(&self.output_path),
        ] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(RecorderError::io("deleting recording", e)),
            }
        }
        info!(recorder_id = %self.id, "recording deleted");
        self.set_state(RecorderState::Deleted);
        Ok(())
    }

    fn set_state(&self, state: RecorderState) {
        self.status.send_modify(|s| s.state = state);
    }
}

async fn wait_for_exit(child: Option<&mut Child>) -> io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn join_opt<T>(
    handle: Option<&mut JoinHandle<T>>,
) -> std::result::Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => pending().await,
    }
}
