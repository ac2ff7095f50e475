//! Stand-in ffmpeg executable for tests.
//!
//! Writes a POSIX shell script that mimics the two ffmpeg invocations the
//! recorder makes: a capture (writes a small file, appends a trailer on
//! SIGINT, runs until signalled or `-t` elapses) and a `-c copy` remux (copies
//! input to output and appends `moov`).

use std::fmt::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// How the fake remux step behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeBehavior {
    /// Copy and succeed after the given delay in milliseconds.
    Succeed {
        /// Delay before the copy.
        delay_ms: u64,
    },
    /// Exit non-zero with a message on stderr.
    Fail,
}

/// Builder for the fake ffmpeg script.
#[derive(Debug, Clone)]
pub struct FakeFfmpeg {
    /// Bytes written when capture starts.
    pub initial_bytes: usize,
    /// Ignore SIGINT so a graceful stop has to escalate.
    pub ignore_sigint: bool,
    /// Exit with status 1 immediately, writing nothing.
    pub crash_on_start: bool,
    /// Remux behavior.
    pub finalize: FinalizeBehavior,
}

impl Default for FakeFfmpeg {
    fn default() -> Self {
        Self {
            initial_bytes: 4096,
            ignore_sigint: false,
            crash_on_start: false,
            finalize: FinalizeBehavior::Succeed { delay_ms: 0 },
        }
    }
}

impl FakeFfmpeg {
    /// Write the script into `dir` and return its path.
    pub fn install(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join("ffmpeg");
        std::fs::write(&path, self.script())?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    fn script(&self) -> String {
        let mut s = String::from(
            r#"#!/bin/sh
case "$1" in -version) echo "ffmpeg version fake"; exit 0 ;; esac
out=""; input=""; dur=""; prev=""; mode=capture
for a in "$@"; do
  case "$prev" in
    -i) input="$a" ;;
    -t) dur="$a" ;;
  esac
  if [ "$a" = "copy" ]; then mode=finalize; fi
  prev="$a"
  out="$a"
done
if [ "$mode" = finalize ]; then
"#,
        );
        match self.finalize {
            FinalizeBehavior::Succeed { delay_ms } => {
                let _ = writeln!(s, "  sleep {}.{:03}", delay_ms / 1000, delay_ms % 1000);
                s.push_str("  cp \"$input\" \"$out\" || exit 1\n");
                s.push_str("  printf 'moov' >> \"$out\"\n  exit 0\n");
            }
            FinalizeBehavior::Fail => {
                s.push_str("  echo 'moov atom not found' >&2\n  exit 1\n");
            }
        }
        s.push_str("fi\n");
        if self.crash_on_start {
            s.push_str("echo 'cannot open display' >&2\nexit 1\n");
            return s;
        }
        // The timed capture sleeps in the background so SIGINT interrupts `wait`.
        s.push_str("pid=\"\"\n");
        if self.ignore_sigint {
            s.push_str("trap '' INT\n");
        } else {
            s.push_str(
                "trap '[ -n \"$pid\" ] && kill \"$pid\" 2>/dev/null; printf trailer >> \"$out\"; exit 255' INT\n",
            );
        }
        let _ = writeln!(s, "head -c {} /dev/zero > \"$out\"", self.initial_bytes);
        s.push_str("if [ -n \"$dur\" ]; then sleep \"$dur\" & pid=$!; wait \"$pid\"; exit 0; fi\n");
        s.push_str("while true; do sleep 0.05; done\n");
        s
    }
}
