//! ffmpeg invocation: capture and finalize command lines, availability check,
//! and process signalling.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{RecorderError, Result};
use crate::params::ResolvedParams;

/// Arguments for a screen capture writing a fragmented MP4 to `output`.
///
/// Fragmented output stays readable while it grows and survives a kill with
/// at most the last fragment lost.
pub fn capture_args(params: &ResolvedParams, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-nostdin",
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "x11grab",
        "-framerate",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(params.frame_rate.to_string().into());
    args.push("-i".into());
    args.push(format!(":{}", params.display_num).into());
    if let Some(secs) = params.max_duration_secs {
        args.push("-t".into());
        args.push(secs.to_string().into());
    }
    args.push("-fs".into());
    args.push(params.max_size_bytes().to_string().into());
    for a in [
        "-c:v",
        "libx264",
        "-preset",
        "ultrafast",
        "-pix_fmt",
        "yuv420p",
        "-movflags",
        "+frag_keyframe+empty_moov",
        "-y",
    ] {
        args.push(a.into());
    }
    args.push(output.as_os_str().to_owned());
    args
}

/// Arguments for remuxing `input` into a seekable MP4 at `output`.
pub fn finalize_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-nostdin".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.as_os_str().to_owned(),
    ];
    for a in ["-c", "copy", "-movflags", "+faststart", "-y"] {
        args.push(a.into());
    }
    args.push(output.as_os_str().to_owned());
    args
}

/// Verify that `ffmpeg` can be executed.
pub async fn check_available(ffmpeg: &Path) -> Result<()> {
    let output = Command::new(ffmpeg)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| RecorderError::Spawn {
            program: ffmpeg.to_path_buf(),
            source,
        })?;
    if output.success() {
        Ok(())
    } else {
        Err(RecorderError::Spawn {
            program: ffmpeg.to_path_buf(),
            source: std::io::Error::other(format!("`-version` exited with {output}")),
        })
    }
}

/// Path of the temporary file finalize writes before renaming over `output`.
pub fn finalize_temp_path(output: &Path) -> PathBuf {
    let mut name = output.file_stem().map(OsString::from).unwrap_or_default();
    name.push(".finalizing.mp4");
    output.with_file_name(name)
}

/// Remux `output` in place. Returns the final size in bytes.
pub async fn finalize(ffmpeg: &Path, output: &Path) -> Result<u64> {
    match tokio::fs::try_exists(output).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(RecorderError::FinalizeFailed {
                reason: "ffmpeg produced no output file".to_string(),
            });
        }
        Err(e) => return Err(RecorderError::io("checking recording output", e)),
    }

    let temp = finalize_temp_path(output);
    let result = Command::new(ffmpeg)
        .args(finalize_args(output, &temp))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| RecorderError::Spawn {
            program: ffmpeg.to_path_buf(),
            source,
        })?;

    if !result.status.success() {
        let _ = tokio::fs::remove_file(&temp).await;
        let stderr = String::from_utf8_lossy(&result.stderr);
        let tail = stderr.lines().last().unwrap_or("").trim().to_string();
        return Err(RecorderError::FinalizeFailed {
            reason: format!("remux exited with {}: {tail}", result.status),
        });
    }

    tokio::fs::rename(&temp, output)
        .await
        .map_err(|e| RecorderError::io("replacing recording with finalized file", e))?;
    let meta = tokio::fs::metadata(output)
        .await
        .map_err(|e| RecorderError::io("reading finalized recording", e))?;
    Ok(meta.len())
}

/// Ask the process to flush and exit (SIGINT).
///
/// A process that has already exited is not an error.
pub fn interrupt(child: &Child) -> Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|_| RecorderError::Signal {
        reason: format!("pid {pid} out of range"),
    })?;
    match kill(Pid::from_raw(pid), Signal::SIGINT) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!(pid, "process already gone");
            Ok(())
        }
        Err(e) => Err(RecorderError::Signal {
            reason: e.to_string(),
        }),
    }
}
