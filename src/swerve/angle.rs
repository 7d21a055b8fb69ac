// Angle domains used by the steering loop
//
// Absolute sensors and kinematics speak in wrapped angles ([-π, π)).
// The steer motor's closed loop runs on an unbounded, continuous position.
// Keeping them as separate types stops a wrapped value from ever being
// written back into the continuous domain by accident.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use super::optimizer::compute_adjusted_target;

/// Wrap any angle in radians into [-π, π)
pub fn wrap_radians(radians: f64) -> f64 {
    let wrapped = (radians + PI).rem_euclid(TAU) - PI;
    // rem_euclid can round up to exactly TAU
    if wrapped >= PI { wrapped - TAU } else { wrapped }
}

/// An angle bounded to [-π, π)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WrappedAngle(f64);

impl WrappedAngle {
    pub const ZERO: WrappedAngle = WrappedAngle(0.0);

    pub fn from_radians(radians: f64) -> Self {
        Self(wrap_radians(radians))
    }

    pub fn from_degrees(degrees: f64) -> Self {
        Self::from_radians(degrees.to_radians())
    }

    /// Absolute sensors report fractions of a turn
    pub fn from_rotations(rotations: f64) -> Self {
        Self::from_radians(rotations * TAU)
    }

    /// Direction of a 2D vector. A zero vector maps to zero.
    pub fn from_vector(x: f64, y: f64) -> Self {
        Self::from_radians(y.atan2(x))
    }

    pub fn radians(self) -> f64 {
        self.0
    }

    pub fn degrees(self) -> f64 {
        self.0.to_degrees()
    }

    pub fn cos(self) -> f64 {
        self.0.cos()
    }

    pub fn sin(self) -> f64 {
        self.0.sin()
    }

    /// Sum of two angles, re-wrapped
    pub fn rotate_by(self, other: WrappedAngle) -> Self {
        Self::from_radians(self.0 + other.0)
    }

    /// Shortest signed rotation from `self` to `other`
    pub fn delta_to(self, other: WrappedAngle) -> f64 {
        wrap_radians(other.0 - self.0)
    }

    /// The same direction turned half a revolution
    pub fn opposite(self) -> Self {
        Self::from_radians(self.0 + PI)
    }
}

/// An unwrapped steer position. Never re-wrapped once established.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct ContinuousAngle(f64);

impl ContinuousAngle {
    pub fn from_radians(radians: f64) -> Self {
        Self(radians)
    }

    pub fn radians(self) -> f64 {
        self.0
    }

    /// Project into the wrapped domain (for reporting and kinematics only)
    pub fn wrapped(self) -> WrappedAngle {
        WrappedAngle::from_radians(self.0)
    }

    /// The continuous position equivalent to `target` that is closest to `self`
    pub fn nearest(self, target: WrappedAngle) -> ContinuousAngle {
        ContinuousAngle(compute_adjusted_target(target.radians(), self.0))
    }
}
