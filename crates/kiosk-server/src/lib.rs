//! # kiosk-server
//!
//! HTTP surface of the kiosk host. Two routers share one [`AppState`]:
//!
//! - **API** (`/recording/*`, `/health`): drives the recording registry.
//! - **Devtools** (`/json/version` and websocket upgrades on any other path):
//!   fronts the browser's CDP listener through the relay.
//!
//! Both hold the activity controller for the duration of every request.

#![deny(unsafe_code)]

pub mod devtools;
pub mod error;
pub mod health;
pub mod middleware;
pub mod recording;
pub mod server;
pub mod shutdown;

pub use error::ApiError;
pub use server::{AppState, DownloadPolicy, KioskServer};
pub use shutdown::ShutdownCoordinator;
