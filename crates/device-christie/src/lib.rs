//! Single-flight binary command channel for Christie projectors.
//!
//! Commands are fixed 13-byte packets sent over TCP. The projector answers
//! every packet with an ACK, NAK, error or data frame before it will accept
//! the next one.

pub mod config;
pub mod connection;
pub mod controller;
pub mod models;
pub mod protocol;
pub mod simulator;

pub use avhub_core::DeviceHandle;
pub use config::*;
pub use connection::TcpConnector;
pub use controller::ChristieController;
pub use models::*;
pub use protocol::{ChristieProtocol, Frame, Payload};
