//! Vehicle physics.
//!
//! [`step`] is the single deterministic simulation function shared by the
//! server (canonical simulation), the owning client (prediction and replay)
//! and tests. It has no network awareness; the only outside collaborator is
//! the [`Collision`] sweep used to move the body.

use serde::{Deserialize, Serialize};

use crate::{
    math::{Quat, Transform, Vec3},
    moves::Move,
};

/// Tunable vehicle parameters. SI units unless stated otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    /// Mass in kg.
    pub mass: f32,
    /// Driving force at full throttle, in newtons.
    pub engine_power: f32,
    /// Air drag coefficient (force = speed² × coefficient).
    pub drag_coefficient: f32,
    pub rolling_resistance_coefficient: f32,
    /// Turning radius at full steering throw, in meters.
    pub steering_radius: f32,
    /// Magnitude of gravitational acceleration, m/s².
    pub gravity: f32,
    /// Engine units per meter (positions are stored in engine units).
    pub units_per_meter: f32,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            mass: 1000.0,
            engine_power: 10_000.0,
            drag_coefficient: 16.0,
            rolling_resistance_coefficient: 0.015,
            steering_radius: 10.0,
            gravity: 9.81,
            units_per_meter: 100.0,
        }
    }
}

/// Physical state of one vehicle: collision-root transform plus velocity (m/s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct VehicleState {
    pub transform: Transform,
    pub velocity: Vec3,
}

/// Outcome of sweeping a body along a displacement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sweep {
    /// Displacement actually applied, in engine units.
    pub travel: Vec3,
    /// True if the sweep stopped on a blocking surface.
    pub blocked: bool,
}

impl Sweep {
    pub fn free(travel: Vec3) -> Self {
        Self {
            travel,
            blocked: false,
        }
    }
}

/// Collision world queried by the physics step.
pub trait Collision: Send + Sync {
    /// Sweeps a body located at `from` along `displacement` (engine units).
    fn sweep(&self, from: Vec3, displacement: Vec3) -> Sweep;
}

/// Unbounded flat ground; never blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGround;

impl Collision for OpenGround {
    fn sweep(&self, _from: Vec3, displacement: Vec3) -> Sweep {
        Sweep::free(displacement)
    }
}

/// Square arena with walls at `±half_extent` on X and Y (engine units).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxArena {
    pub half_extent: f32,
}

impl BoxArena {
    pub fn new(half_extent: f32) -> Self {
        Self { half_extent }
    }

    /// Fraction of `d` that can be travelled from `p` before crossing a wall.
    fn axis_fraction(&self, p: f32, d: f32) -> f32 {
        let limit = if d > 0.0 {
            self.half_extent - p
        } else if d < 0.0 {
            -self.half_extent - p
        } else {
            return 1.0;
        };
        (limit / d).clamp(0.0, 1.0)
    }
}

impl Collision for BoxArena {
    fn sweep(&self, from: Vec3, displacement: Vec3) -> Sweep {
        let fraction = self
            .axis_fraction(from.x, displacement.x)
            .min(self.axis_fraction(from.y, displacement.y));
        if fraction >= 1.0 {
            return Sweep::free(displacement);
        }
        Sweep {
            travel: displacement * fraction,
            blocked: true,
        }
    }
}

/// Air resistance opposing `velocity`. Zero at rest.
pub fn air_resistance(params: &VehicleParams, velocity: Vec3) -> Vec3 {
    -velocity.normalize_or_zero() * velocity.len_sq() * params.drag_coefficient
}

/// Rolling resistance opposing `velocity`. Zero at rest.
pub fn rolling_resistance(params: &VehicleParams, velocity: Vec3) -> Vec3 {
    let normal_force = params.mass * params.gravity;
    -velocity.normalize_or_zero() * params.rolling_resistance_coefficient * normal_force
}

/// Advances `state` by one move.
///
/// Controls are expected to be clamped to `[-1, 1]` by the caller.
pub fn step(
    params: &VehicleParams,
    state: &VehicleState,
    mv: &Move,
    collision: &dyn Collision,
) -> VehicleState {
    let mut transform = state.transform;
    let mut velocity = state.velocity;
    let forward = transform.forward();
    let dt = mv.delta_time;

    // Driving.
    let mut force = forward * params.engine_power * mv.throttle;
    force += air_resistance(params, velocity);
    force += rolling_resistance(params, velocity);
    let acceleration = force / params.mass;
    velocity += acceleration * dt;

    let displacement = velocity * dt * params.units_per_meter;
    let sweep = collision.sweep(transform.translation, displacement);
    transform.translation += sweep.travel;
    if sweep.blocked {
        velocity = Vec3::ZERO;
    }

    // Steering.
    let distance = forward.dot(velocity) * dt;
    let turn_angle = distance / params.steering_radius * mv.steering;
    let turn = Quat::from_axis_angle(transform.up(), turn_angle);
    transform.add_world_rotation(turn);
    velocity = turn.rotate(velocity);

    VehicleState {
        transform,
        velocity,
    }
}
