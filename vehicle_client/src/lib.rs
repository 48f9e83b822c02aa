//! `vehicle_client`
//!
//! Client-side systems:
//! - Connection management over the reliable stream
//! - Input capture from console commands
//! - Prediction and reconciliation for the owned vehicle
//! - Interpolation for remote vehicles

pub mod client;
pub mod input;

pub use client::{ClientState, GameClient};
