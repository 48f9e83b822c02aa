//! `vehicle_server`
//!
//! Server-side systems:
//! - Fixed timestep simulation loop
//! - One authoritative vehicle per connected client
//! - Receives and validates `SubmitMove`s
//! - Sends `StateUpdate`s
//!
//! Networking model:
//! - TCP only: handshake, moves and replication share one ordered stream

pub mod server;

pub use server::{bind_ephemeral, GameServer};
