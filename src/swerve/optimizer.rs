// Module state optimization
//
// Every reorientation is kept to at most a quarter turn: if the target is
// further than π/2 away, aim at the opposite direction and reverse the wheel.
// The result is then placed in the continuous steer domain next to the
// current position so the steer loop never travels more than half a turn.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use super::angle::{wrap_radians, ContinuousAngle};
use super::kinematics::ModuleDesiredState;

/// Map a target angle into the continuous domain of `current`.
///
/// The returned value `v` satisfies `v ≡ target (mod 2π)` and
/// `|v - current| <= π`.
///
/// # Arguments
/// * `target` - Desired steer angle in radians (wrapped into [-π, π) first)
/// * `current` - Current continuous steer position in radians
pub fn compute_adjusted_target(target: f64, current: f64) -> f64 {
    let target = wrap_radians(target);

    let mut normalized_current = current.rem_euclid(TAU);
    if normalized_current >= TAU {
        normalized_current -= TAU;
    }

    let mut adjusted = target + current - normalized_current;

    let difference = target - normalized_current;
    if difference > PI {
        adjusted -= TAU;
    } else if difference < -PI {
        adjusted += TAU;
    }

    adjusted
}

/// Output of [`optimize`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizedState {
    /// Steer setpoint in the continuous domain
    pub angle: ContinuousAngle,
    /// Signed wheel speed in m/s (negated if the target was flipped)
    pub speed: f64,
    /// Remaining steer travel in radians (setpoint minus current)
    pub angle_error: f64,
    /// True if the target was flipped by π
    pub flipped: bool,
}

/// Reduce required steer travel to at most π/2 by flipping direction.
pub fn optimize(desired: ModuleDesiredState, current: ContinuousAngle) -> OptimizedState {
    let delta = wrap_radians(desired.angle.radians() - current.radians());

    let (angle, speed, flipped) = if delta.abs() > FRAC_PI_2 {
        (desired.angle.opposite(), -desired.speed, true)
    } else {
        (desired.angle, desired.speed, false)
    };

    let target = current.nearest(angle);

    OptimizedState {
        angle: target,
        speed,
        angle_error: target.radians() - current.radians(),
        flipped,
    }
}
