//! Server-Sent Events transport.
//!
//! `GET /events` opens a server-push stream connection using the same
//! handshake parameters as the socket transport, plus the `Last-Event-ID`
//! header for resumption. Each event carries:
//!
//! - `id:` the message id
//! - `event:` the message type (`response` for command responses)
//! - `data:` the JSON frame
//!
//! The first event also carries `retry:`. Commands go through
//! `POST /events/{connection_id}/commands`.

pub mod handler;

pub use handler::{command_handler, events_handler, to_event, LAST_EVENT_ID};
