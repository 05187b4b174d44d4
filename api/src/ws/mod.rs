//! WebSocket transport.
//!
//! `GET /ws` upgrades to a bidirectional socket connection. Handshake query
//! parameters: `token`, `api_key`, `user_id`, `channels` (comma separated).
//!
//! Rejected handshakes are closed with code 1008 (auth) or 1013 (capacity).
//! Every inbound text frame is a command; every outbound frame is a message
//! or a command response.

pub mod handler;

pub use handler::{rejection_code, ws_handler};
