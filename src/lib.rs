//! Switchboard - real-time messaging over WebSocket and Server-Sent Events.
//!
//! This crate re-exports the workspace members:
//!
//! - [`core`]: connection registry, channel broker, heartbeat, dispatcher
//! - [`api`]: axum server exposing both transports and the admin surface
//! - [`sdk`]: reconnecting client session with command correlation

pub use switchboard_api as api;
pub use switchboard_core as core;
pub use switchboard_sdk as sdk;
