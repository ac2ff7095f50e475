//! # kiosk-activity
//!
//! Process-wide "may the host suspend" signal.
//!
//! Every unit of work (HTTP request, relayed devtools session, active or
//! finalizing recording) holds the [`ActivityController`] active. When the
//! last holder lets go, the controller waits out a debounce window and only
//! then tells the [`ControlSurface`] that suspension is permitted. Writes to
//! the surface are coalesced so they happen once per actual change.

#![deny(unsafe_code)]

pub mod control;
pub mod controller;
pub mod error;

pub use control::{ControlSurface, MemoryControl, NoopControl, SuspendSignal, UnikraftControl};
pub use controller::{ActivityController, ActivityGuard, ActivitySnapshot, Phase};
pub use error::ActivityError;
