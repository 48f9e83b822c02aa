//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics: every operation is
//! plain `f32` arithmetic evaluated in a fixed order, so the same inputs give
//! the same bits on every machine running the same build.

use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const X: Self = Self::new(1.0, 0.0, 0.0);
    pub const Y: Self = Self::new(0.0, 1.0, 0.0);
    pub const Z: Self = Self::new(0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    /// Unit vector in the same direction, or zero when the length is too small
    /// to divide by.
    pub fn normalize_or_zero(self) -> Self {
        let len_sq = self.len_sq();
        if len_sq <= f32::EPSILON * f32::EPSILON {
            return Self::ZERO;
        }
        self / len_sq.sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn distance(self, to: Self) -> f32 {
        (to - self).len()
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f32> for Vec3 {
    type Output = Self;
    fn div(self, rhs: f32) -> Self {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Rotation of `angle` radians about `axis` (expected to be unit length).
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let half = angle * 0.5;
        let s = half.sin();
        Self {
            x: axis.x * s,
            y: axis.y * s,
            z: axis.z * s,
            w: half.cos(),
        }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    pub fn normalize(self) -> Self {
        let len = self.dot(self).sqrt();
        if len <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self {
            x: self.x / len,
            y: self.y / len,
            z: self.z / len,
            w: self.w / len,
        }
    }

    /// Rotates `v` by this quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        // v' = v + 2w(q x v) + 2 q x (q x v)
        let q = Vec3::new(self.x, self.y, self.z);
        let t = q.cross(v) * 2.0;
        v + t * self.w + q.cross(t)
    }

    /// Angle between two orientations, in radians. Sign of the quaternion is
    /// ignored (q and -q are the same rotation).
    pub fn angle_to(self, rhs: Self) -> f32 {
        let d = self.dot(rhs).abs().min(1.0);
        2.0 * d.acos()
    }

    /// Spherical interpolation along the shortest arc.
    ///
    /// `t` is not clamped; values outside `[0, 1]` continue along the same arc.
    pub fn slerp(self, to: Self, t: f32) -> Self {
        let mut cos = self.dot(to);
        let mut to = to;
        if cos < 0.0 {
            cos = -cos;
            to = Self {
                x: -to.x,
                y: -to.y,
                z: -to.z,
                w: -to.w,
            };
        }

        let (wa, wb) = if cos > 0.9999 {
            (1.0 - t, t)
        } else {
            let omega = cos.acos();
            let sin = omega.sin();
            (((1.0 - t) * omega).sin() / sin, (t * omega).sin() / sin)
        };

        Self {
            x: self.x * wa + to.x * wb,
            y: self.y * wa + to.y * wb,
            z: self.z * wa + to.z * wb,
            w: self.w * wa + to.w * wb,
        }
        .normalize()
    }
}

impl Mul for Quat {
    type Output = Self;

    /// Hamilton product: `a * b` applies `b` first, then `a`.
    fn mul(self, b: Self) -> Self {
        let a = self;
        Self {
            x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            y: a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
            z: a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
            w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
        }
    }
}

/// Rigid transform (no scale). Translation is in engine units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            rotation: Quat::IDENTITY,
        }
    }

    /// Local +X in world space.
    pub fn forward(&self) -> Vec3 {
        self.rotation.rotate(Vec3::X)
    }

    /// Local +Z in world space.
    pub fn up(&self) -> Vec3 {
        self.rotation.rotate(Vec3::Z)
    }

    /// Applies `rotation` on top of the current orientation, in world space.
    pub fn add_world_rotation(&mut self, rotation: Quat) {
        self.rotation = (rotation * self.rotation).normalize();
    }
}

/// Cubic Hermite curve through `p0` at `t = 0` and `p1` at `t = 1`, with
/// tangents `t0` and `t1` at the respective ends.
pub fn cubic_interp(p0: Vec3, t0: Vec3, p1: Vec3, t1: Vec3, t: f32) -> Vec3 {
    let t2 = t * t;
    let t3 = t2 * t;
    p0 * (2.0 * t3 - 3.0 * t2 + 1.0)
        + t0 * (t3 - 2.0 * t2 + t)
        + t1 * (t3 - t2)
        + p1 * (-2.0 * t3 + 3.0 * t2)
}

/// First derivative of [`cubic_interp`] with respect to `t`.
pub fn cubic_interp_derivative(p0: Vec3, t0: Vec3, p1: Vec3, t1: Vec3, t: f32) -> Vec3 {
    let t2 = t * t;
    p0 * (6.0 * t2 - 6.0 * t)
        + t0 * (3.0 * t2 - 4.0 * t + 1.0)
        + t1 * (3.0 * t2 - 2.0 * t)
        + p1 * (6.0 * t - 6.0 * t2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        a.distance(b) < 1e-4
    }

    #[test]
    fn normalize_zero_is_zero() {
        assert_eq!(Vec3::ZERO.normalize_or_zero(), Vec3::ZERO);
        let n = Vec3::new(3.0, 0.0, 4.0).normalize_or_zero();
        assert!(approx(n, Vec3::new(0.6, 0.0, 0.8)));
    }

    #[test]
    fn quarter_turn_about_up_maps_x_to_y() {
        let q = Quat::from_axis_angle(Vec3::Z, std::f32::consts::FRAC_PI_2);
        assert!(approx(q.rotate(Vec3::X), Vec3::Y));
    }

    #[test]
    fn identity_rotation_is_exact() {
        let v = Vec3::new(2.0, -1.5, 0.25);
        assert_eq!(Quat::IDENTITY.rotate(v), v);
        assert_eq!(Quat::from_axis_angle(Vec3::Z, 0.0).rotate(v), v);
    }

    #[test]
    fn slerp_endpoints_and_midpoint() {
        let a = Quat::IDENTITY;
        let b = Quat::from_axis_angle(Vec3::Z, 1.0);
        assert!(a.slerp(b, 0.0).angle_to(a) < 1e-3);
        assert!(a.slerp(b, 1.0).angle_to(b) < 1e-3);
        let mid = a.slerp(b, 0.5);
        assert!(mid.angle_to(Quat::from_axis_angle(Vec3::Z, 0.5)) < 1e-3);
    }

    #[test]
    fn slerp_takes_shortest_arc() {
        let a = Quat::IDENTITY;
        let b = Quat::from_axis_angle(Vec3::Z, 0.4);
        let neg_b = Quat {
            x: -b.x,
            y: -b.y,
            z: -b.z,
            w: -b.w,
        };
        let mid = a.slerp(neg_b, 0.5);
        assert!(mid.angle_to(Quat::from_axis_angle(Vec3::Z, 0.2)) < 1e-3);
    }

    #[test]
    fn hermite_matches_endpoints_and_tangents() {
        let p0 = Vec3::new(0.0, 0.0, 0.0);
        let p1 = Vec3::new(10.0, 5.0, 0.0);
        let t0 = Vec3::new(3.0, 0.0, 0.0);
        let t1 = Vec3::new(0.0, 7.0, 0.0);

        assert!(approx(cubic_interp(p0, t0, p1, t1, 0.0), p0));
        assert!(approx(cubic_interp(p0, t0, p1, t1, 1.0), p1));
        assert!(approx(cubic_interp_derivative(p0, t0, p1, t1, 0.0), t0));
        assert!(approx(cubic_interp_derivative(p0, t0, p1, t1, 1.0), t1));
    }
}
