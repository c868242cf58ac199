//! Rate-limited text command channel for Marantz receivers.
//!
//! The receiver takes short ASCII commands (`MV?`, `SIDVD`, `MUON`, ...)
//! over RS-232 and emits state lines whenever something changes, whether
//! or not it was asked to.

pub mod config;
pub mod controller;
pub mod models;
pub mod protocol;
pub mod serial;
pub mod simulator;

pub use avhub_core::DeviceHandle;
pub use config::*;
pub use controller::MarantzController;
pub use models::*;
pub use protocol::MarantzProtocol;
