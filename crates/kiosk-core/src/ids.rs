//! ID newtypes.
//!
//! [`RecorderId`] is caller-chosen and becomes part of an output file name, so
//! it is validated on construction. [`SessionId`] is generated per relayed
//! devtools connection and only used to correlate log lines.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::errors::{Classify, ErrorKind};

/// ID used when a request does not name a recorder.
pub const DEFAULT_RECORDER_ID: &str = "default";

/// Maximum length of a recorder ID.
pub const MAX_RECORDER_ID_LEN: usize = 64;

/// Rejected recorder ID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Empty string.
    #[error("recorder id must not be empty")]
    Empty,
    /// Longer than [`MAX_RECORDER_ID_LEN`].
    #[error("recorder id longer than {MAX_RECORDER_ID_LEN} characters")]
    TooLong,
    /// Contains a character outside `[A-Za-z0-9_-]`.
    #[error("recorder id contains invalid character {0:?}")]
    InvalidChar(char),
}

impl Classify for IdError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// Validated recorder identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecorderId(String);

impl RecorderId {
    /// Validate and wrap an ID.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if id.len() > MAX_RECORDER_ID_LEN {
            return Err(IdError::TooLong);
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdError::InvalidChar(c));
        }
        Ok(Self(id))
    }

    /// Resolve an optional request ID, falling back to [`DEFAULT_RECORDER_ID`].
    ///
    /// An empty string counts as absent.
    pub fn or_default(id: Option<&str>) -> Result<Self, IdError> {
        match id {
            Some(id) if !id.is_empty() => Self::new(id),
            _ => Ok(Self::default()),
        }
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecorderId {
    fn default() -> Self {
        Self(DEFAULT_RECORDER_ID.to_string())
    }
}

impl TryFrom<String> for RecorderId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecorderId> for String {
    fn from(id: RecorderId) -> Self {
        id.0
    }
}

impl fmt::Display for RecorderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecorderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of one relayed devtools session (UUID v7, time-ordered).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn default_id() {
        assert_eq!(RecorderId::default().as_str(), "default");
    }

    #[test]
    fn or_default_handles_absent_and_empty() {
        assert_eq!(RecorderId::or_default(None).unwrap().as_str(), "default");
        assert_eq!(RecorderId::or_default(Some("")).unwrap().as_str(), "default");
        assert_eq!(RecorderId::or_default(Some("cam-2")).unwrap().as_str(), "cam-2");
    }

    #[test]
    fn rejects_path_separators() {
        assert_matches!(RecorderId::new("../etc"), Err(IdError::InvalidChar('.')));
        assert_matches!(RecorderId::new("a/b"), Err(IdError::InvalidChar('/')));
    }

    #[test]
    fn rejects_too_long() {
        let id = "x".repeat(MAX_RECORDER_ID_LEN + 1);
        assert_matches!(RecorderId::new(id), Err(IdError::TooLong));
        assert!(RecorderId::new("x".repeat(MAX_RECORDER_ID_LEN)).is_ok());
    }

    #[test]
    fn serde_validates() {
        let ok: RecorderId = serde_json::from_str("\"rec_1\"").unwrap();
        assert_eq!(ok.as_str(), "rec_1");
        assert!(serde_json::from_str::<RecorderId>("\"bad id\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"rec_1\"");
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    proptest! {
        #[test]
        fn accepted_ids_are_file_name_safe(id in "[A-Za-z0-9_-]{1,64}") {
            let parsed = RecorderId::new(id.clone()).unwrap();
            prop_assert_eq!(parsed.as_str(), id.as_str());
        }

        #[test]
        fn ids_with_other_chars_are_rejected(prefix in "[a-z]{0,8}", bad in "[ ./:\\\\]") {
            let id = format!("{prefix}{bad}");
            prop_assert!(RecorderId::new(id).is_err());
        }
    }
}
