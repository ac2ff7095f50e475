//! Activity control errors.

use std::path::PathBuf;

use kiosk_core::{Classify, ErrorKind};
use thiserror::Error;

/// Errors from writing to a control surface.
///
/// These never reach callers of the controller; they are logged and the write
/// is retried on the next state change.
#[derive(Debug, Error)]
pub enum ActivityError {
    /// Writing the control file failed.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Control file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl Classify for ActivityError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}
