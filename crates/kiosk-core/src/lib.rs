//! # kiosk-core
//!
//! Foundation types shared by every kiosk control plane crate:
//!
//! - **Errors**: [`ErrorKind`] taxonomy that component errors classify into,
//!   plus the wire-format [`ErrorBody`]
//! - **IDs**: [`RecorderId`] (validated, file-name safe) and [`SessionId`]
//!   (UUID v7, used to correlate relay logs)
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{Classify, ErrorBody, ErrorKind};
pub use ids::{DEFAULT_RECORDER_ID, IdError, RecorderId, SessionId};
