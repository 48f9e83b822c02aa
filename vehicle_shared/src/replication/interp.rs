//! Remote-proxy interpolation.
//!
//! The server pushes canonical states at a low, irregular rate. Between two
//! arrivals the remote proxy moves its cosmetic mesh along a cubic Hermite
//! curve from where the mesh was when the latest state arrived to that state,
//! using the known velocities as tangents so speed is continuous across spans.
//! Orientation is slerped with the same ratio.
//!
//! The ratio is not clamped: if the next state is late the curve keeps going
//! past the target instead of freezing.

use crate::math::{cubic_interp, cubic_interp_derivative, Quat, Transform, Vec3};

use super::CanonicalState;

/// Spans shorter than this are treated as unknown.
pub const MIN_SPAN_SECONDS: f32 = 1.0e-4;

/// Position curve for one interpolation span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HermiteSpan {
    pub start_location: Vec3,
    pub target_location: Vec3,
    /// Velocity scaled to the curve parameter: `velocity × duration × units`.
    pub start_tangent: Vec3,
    pub target_tangent: Vec3,
    /// `duration × units_per_meter`; divides curve derivatives back to m/s.
    pub tangent_scale: f32,
}

impl HermiteSpan {
    pub fn location(&self, alpha: f32) -> Vec3 {
        cubic_interp(
            self.start_location,
            self.start_tangent,
            self.target_location,
            self.target_tangent,
            alpha,
        )
    }

    /// Velocity in m/s at `alpha`.
    pub fn velocity(&self, alpha: f32) -> Vec3 {
        let derivative = cubic_interp_derivative(
            self.start_location,
            self.start_tangent,
            self.target_location,
            self.target_tangent,
            alpha,
        );
        derivative / self.tangent_scale
    }
}

/// Interpolated output for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolatedPose {
    pub alpha: f32,
    pub location: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

#[derive(Debug, Clone, Copy)]
struct Target {
    transform: Transform,
    velocity: Vec3,
}

#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    time_since_update: f32,
    /// Time between the two most recent arrivals; zero until known.
    span_duration: f32,
    start: Transform,
    start_velocity: Vec3,
    target: Option<Target>,
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn span_duration(&self) -> f32 {
        self.span_duration
    }

    /// True once at least one canonical state has arrived.
    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    /// Starts a new span from the current visual pose toward `state`.
    pub fn on_arrival(&mut self, pose: Transform, velocity: Vec3, state: &CanonicalState) {
        // The first arrival has no predecessor to measure a span against.
        self.span_duration = if self.target.is_some() {
            self.time_since_update
        } else {
            0.0
        };
        self.time_since_update = 0.0;
        self.start = pose;
        self.start_velocity = velocity;
        self.target = Some(Target {
            transform: state.transform,
            velocity: state.velocity,
        });
    }

    /// Current span, if one can be interpolated across.
    pub fn span(&self, units_per_meter: f32) -> Option<HermiteSpan> {
        let target = self.target?;
        if self.span_duration < MIN_SPAN_SECONDS {
            return None;
        }
        let tangent_scale = self.span_duration * units_per_meter;
        Some(HermiteSpan {
            start_location: self.start.translation,
            target_location: target.transform.translation,
            start_tangent: self.start_velocity * tangent_scale,
            target_tangent: target.velocity * tangent_scale,
            tangent_scale,
        })
    }

    /// Accumulates `delta_time` and samples the current span.
    pub fn advance(&mut self, delta_time: f32, units_per_meter: f32) -> Option<InterpolatedPose> {
        self.time_since_update += delta_time;
        self.sample(units_per_meter)
    }

    /// Samples the current span at the accumulated time without advancing it.
    pub fn sample(&self, units_per_meter: f32) -> Option<InterpolatedPose> {
        let span = self.span(units_per_meter)?;
        let target = self.target?;
        let alpha = self.time_since_update / self.span_duration;
        Some(InterpolatedPose {
            alpha,
            location: span.location(alpha),
            rotation: self.start.rotation.slerp(target.transform.rotation, alpha),
            velocity: span.velocity(alpha),
        })
    }
}
