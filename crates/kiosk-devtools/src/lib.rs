//! # kiosk-devtools
//!
//! Everything between a CDP client and the browser.
//!
//! - [`upstream`]: follows the supervisor's chromium log and tracks the
//!   browser's current devtools websocket URL across restarts.
//! - [`relay`]: pairs one client websocket with one upstream websocket and
//!   pumps frames both ways until either side goes away.
//! - [`cdp`]: method/id extraction for message logging.

#![deny(unsafe_code)]

pub mod cdp;
pub mod error;
pub mod relay;
pub mod tail;
pub mod upstream;

pub use error::{DevtoolsError, Result};
pub use relay::{CdpRelay, RelayConfig, UpstreamSession, resolve_target};
pub use upstream::{Endpoint, UpstreamManager, parse_announcement};
