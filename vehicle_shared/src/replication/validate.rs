//! Server-side move validation.
//!
//! A move is dropped when:
//! - steering or throttle is outside `[-1, 1]` (NaN included)
//! - its delta time is negative or not finite
//! - the connection's accumulated simulation time would run ahead of the
//!   server clock
//! - its timestamp does not advance past the last accepted move

use std::fmt;

use crate::moves::Move;

/// Why a submitted move was dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveRejection {
    /// Controls outside `[-1, 1]`, or an unusable delta time.
    InvalidInput { steering: f32, throttle: f32, delta_time: f32 },
    /// Client claims more simulated time than the server has run.
    ClockAhead { proposed: f32, server_time: f32 },
    /// Duplicate or out-of-order move.
    TimeRegression { timestamp: f32, last_accepted: f32 },
}

impl fmt::Display for MoveRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveRejection::InvalidInput {
                steering,
                throttle,
                delta_time,
            } => write!(
                f,
                "invalid input (steering={steering}, throttle={throttle}, dt={delta_time})"
            ),
            MoveRejection::ClockAhead {
                proposed,
                server_time,
            } => write!(
                f,
                "client clock ahead of server ({proposed:.4}s > {server_time:.4}s)"
            ),
            MoveRejection::TimeRegression {
                timestamp,
                last_accepted,
            } => write!(
                f,
                "move timestamp {timestamp:.4} does not follow {last_accepted:.4}"
            ),
        }
    }
}

impl std::error::Error for MoveRejection {}

/// Per-connection move gate.
#[derive(Debug, Clone, Default)]
pub struct AntiCheat {
    /// Sum of delta times of every accepted move. Never reset.
    client_time: f32,
    last_accepted: Option<f32>,
}

impl AntiCheat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_simulation_time(&self) -> f32 {
        self.client_time
    }

    /// Checks `mv` against `server_time` without recording it.
    pub fn check(&self, mv: &Move, server_time: f32) -> Result<(), MoveRejection> {
        if !mv.is_input_valid() || !mv.delta_time.is_finite() || mv.delta_time < 0.0 {
            return Err(MoveRejection::InvalidInput {
                steering: mv.steering,
                throttle: mv.throttle,
                delta_time: mv.delta_time,
            });
        }

        let proposed = self.client_time + mv.delta_time;
        if proposed > server_time {
            return Err(MoveRejection::ClockAhead {
                proposed,
                server_time,
            });
        }

        if let Some(last_accepted) = self.last_accepted {
            if mv.timestamp.is_nan() || mv.timestamp <= last_accepted {
                return Err(MoveRejection::TimeRegression {
                    timestamp: mv.timestamp,
                    last_accepted,
                });
            }
        }

        Ok(())
    }

    /// Validates `mv` and, if accepted, advances the connection clock.
    pub fn admit(&mut self, mv: &Move, server_time: f32) -> Result<(), MoveRejection> {
        self.check(mv, server_time)?;
        self.client_time += mv.delta_time;
        self.last_accepted = Some(mv.timestamp);
        Ok(())
    }
}
