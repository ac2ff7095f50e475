//! Polling line reader for an append-only log that may be truncated,
//! rotated, or not exist yet.

use std::io::{self, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

/// A trailing line longer than this without a newline is discarded.
pub const MAX_PARTIAL_LINE: usize = 64 * 1024;

/// Upper bound on bytes consumed by one [`LogTailer::poll`].
pub const MAX_READ_CHUNK: u64 = 64 * 1024;

/// Incremental reader over one log path.
///
/// Each [`poll`](Self::poll) returns the complete lines appended since the
/// previous call. A trailing line without `\n` is held back until it is
/// finished.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    inode: Option<u64>,
    offset: u64,
    partial: Vec<u8>,
}

impl LogTailer {
    /// Tailer starting at the beginning of `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inode: None,
            offset: 0,
            partial: Vec::new(),
        }
    }

    /// The followed path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed from the current file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read newly appended complete lines.
    ///
    /// At most [`MAX_READ_CHUNK`] bytes are consumed per call; the rest is
    /// picked up by later polls. A missing file yields no lines. A file whose inode changed is read
    /// from the start; so is one that shrank below the current offset.
    pub async fn poll(&mut self) -> io::Result<Vec<String>> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.inode.take().is_some() {
                    debug!(path = %self.path.display(), "log file disappeared");
                    self.rewind();
                }
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let inode = meta.ino();
        if self.inode != Some(inode) {
            if self.inode.is_some() {
                debug!(path = %self.path.display(), "log file rotated, reading from start");
            }
            self.inode = Some(inode);
            self.rewind();
        } else if meta.len() < self.offset {
            debug!(
                path = %self.path.display(),
                size = meta.len(),
                offset = self.offset,
                "log file truncated, reading from start"
            );
            self.rewind();
        }

        if meta.len() == self.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        let _ = file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        let read = file.take(MAX_READ_CHUNK).read_to_end(&mut buf).await?;
        self.offset += read as u64;
        Ok(self.split_lines(&buf))
    }

    fn rewind(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }

    fn split_lines(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.partial[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let line = String::from_utf8_lossy(&self.partial[start..end]);
            lines.push(line.trim_end_matches('\r').to_string());
            start = end + 1;
        }
        let _ = self.partial.drain(..start);
        if self.partial.len() > MAX_PARTIAL_LINE {
            warn!(
                path = %self.path.display(),
                len = self.partial.len(),
                "discarding oversized unterminated log line"
            );
            self.partial.clear();
        }
        lines
    }
}
