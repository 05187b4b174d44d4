//! # Switchboard API
//!
//! HTTP front end for the Switchboard messaging core.
//!
//! ## Endpoints
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | GET | `/ws` | WebSocket handshake |
//! | GET | `/events` | Server-Sent Events handshake |
//! | POST | `/events/{connection_id}/commands` | Commands for a stream connection |
//! | POST | `/admin/broadcast` | Send to every connection |
//! | POST | `/admin/channels/{channel}` | Publish to a channel |
//! | POST | `/admin/users/{user_id}` | Send to a user's connections |
//! | POST | `/admin/notifications` | Send a notification |
//! | GET | `/admin/stats` | Registry and channel statistics |
//! | DELETE | `/admin/connections/{id}` | Close a connection |
//! | GET | `/health` | Liveness |

pub mod admin;
pub mod config;
pub mod error;
pub mod server;
pub mod sse;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use error::ApiError;
pub use server::{build_router, Server};
pub use state::AppState;
