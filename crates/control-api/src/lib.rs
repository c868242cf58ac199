//! Control API for the AV hub.
//!
//! Serves a WebSocket endpoint that relays device state to connected
//! clients and turns their messages into receiver and projector commands,
//! plus a few read-only REST routes for snapshots and health.

pub mod routes;
pub mod server;
pub mod types;

pub use routes::{create_router, AppState};
pub use server::{spawn_projector_poll, ControlServer};
pub use types::*;
