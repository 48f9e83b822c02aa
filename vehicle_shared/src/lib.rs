//! `vehicle_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic physics step shared by prediction, replay and the server.
//! - Role-dispatched replication core with no I/O of its own.
//! - Traits for the collision and cosmetic-mesh collaborators.
//! - No `unsafe`.

pub mod config;
pub mod event;
pub mod math;
pub mod moves;
pub mod net;
pub mod physics;
pub mod replication;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::moves::*;
    pub use crate::net::*;
    pub use crate::physics::*;
    pub use crate::replication::validate::{AntiCheat, MoveRejection};
    pub use crate::replication::*;
}
