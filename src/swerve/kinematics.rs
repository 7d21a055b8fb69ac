// Swerve inverse/forward kinematics for a four-module base
// Converts chassis velocities (vx, vy, omega) to per-module angle and speed,
// and wheel motion back into chassis motion for odometry.
//
// Frame: +x forward, +y left, angles counter-clockwise positive.

use serde::{Deserialize, Serialize};

use super::angle::WrappedAngle;

/// Number of modules on the base
pub const MODULE_COUNT: usize = 4;

/// Module corners, in the order every module array in this crate uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
}

impl Corner {
    pub const ALL: [Corner; MODULE_COUNT] = [
        Corner::FrontLeft,
        Corner::FrontRight,
        Corner::BackLeft,
        Corner::BackRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Short label used in logs and telemetry
    pub fn label(self) -> &'static str {
        match self {
            Corner::FrontLeft => "FL",
            Corner::FrontRight => "FR",
            Corner::BackLeft => "BL",
            Corner::BackRight => "BR",
        }
    }
}

/// A 2D offset in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Translation2d {
    pub x: f64,
    pub y: f64,
}

impl Translation2d {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn angle(&self) -> WrappedAngle {
        WrappedAngle::from_vector(self.x, self.y)
    }

    pub fn rotate_by(&self, angle: WrappedAngle) -> Self {
        let (sin, cos) = (angle.sin(), angle.cos());
        Self {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }
}

/// Chassis velocity command
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    /// Forward velocity in m/s
    pub vx: f64,
    /// Leftward velocity in m/s
    pub vy: f64,
    /// Counter-clockwise rotation in rad/s
    pub omega: f64,
}

impl ChassisSpeeds {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// True if no component is large enough to move the base
    pub fn is_zero(&self) -> bool {
        const EPSILON: f64 = 1e-9;
        self.vx.abs() < EPSILON && self.vy.abs() < EPSILON && self.omega.abs() < EPSILON
    }

    /// Convert a field-frame command into the robot frame given the robot heading
    pub fn from_field_relative(field: ChassisSpeeds, heading: WrappedAngle) -> Self {
        let (sin, cos) = (heading.sin(), heading.cos());
        Self {
            vx: field.vx * cos + field.vy * sin,
            vy: -field.vx * sin + field.vy * cos,
            omega: field.omega,
        }
    }

    /// Same command with a different rotation rate
    pub fn with_omega(self, omega: f64) -> Self {
        Self { omega, ..self }
    }
}

/// Desired (or measured) angle and speed of one module
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleDesiredState {
    pub angle: WrappedAngle,
    /// Signed wheel speed in m/s
    pub speed: f64,
}

impl ModuleDesiredState {
    pub fn new(angle: WrappedAngle, speed: f64) -> Self {
        Self { angle, speed }
    }
}

/// Accumulated drive distance and steer angle of one module
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModulePosition {
    /// Meters since the last zero
    pub distance: f64,
    pub angle: WrappedAngle,
}

/// Robot-frame displacement over one interval
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist2d {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

/// Scale all speeds uniformly so the fastest does not exceed `max_speed`.
///
/// Returns true if scaling was applied.
pub fn desaturate(states: &mut [ModuleDesiredState], max_speed: f64) -> bool {
    let fastest = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);

    if fastest > max_speed {
        let scale = max_speed / fastest;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
        true
    } else {
        false
    }
}

/// Kinematic basis: module offsets from the rotation center
#[derive(Debug, Clone, PartialEq)]
pub struct SwerveKinematics {
    modules: [Translation2d; MODULE_COUNT],
}

impl SwerveKinematics {
    pub fn new(modules: [Translation2d; MODULE_COUNT]) -> Self {
        Self { modules }
    }

    /// Rectangular base measured between wheel centers
    ///
    /// # Arguments
    /// * `track_width` - Left-to-right wheel spacing in meters (y axis)
    /// * `wheel_base` - Front-to-back wheel spacing in meters (x axis)
    pub fn rectangular(track_width: f64, wheel_base: f64) -> Self {
        let (hx, hy) = (wheel_base / 2.0, track_width / 2.0);
        Self::new([
            Translation2d::new(hx, hy),   // front left
            Translation2d::new(hx, -hy),  // front right
            Translation2d::new(-hx, hy),  // back left
            Translation2d::new(-hx, -hy), // back right
        ])
    }

    pub fn module_offsets(&self) -> &[Translation2d; MODULE_COUNT] {
        &self.modules
    }

    /// Inverse kinematics: chassis speeds to module states.
    ///
    /// Each wheel's velocity is the chassis translation plus `omega × r_i`.
    /// A zero chassis command yields zero-angle states; callers that must
    /// keep the wheels where they are handle that case themselves.
    pub fn to_module_states(&self, speeds: ChassisSpeeds) -> [ModuleDesiredState; MODULE_COUNT] {
        self.modules.map(|r| {
            let vx = speeds.vx - speeds.omega * r.y;
            let vy = speeds.vy + speeds.omega * r.x;
            ModuleDesiredState::new(WrappedAngle::from_vector(vx, vy), vx.hypot(vy))
        })
    }

    /// Forward kinematics: measured module states to chassis speeds.
    pub fn to_chassis_speeds(&self, states: &[ModuleDesiredState; MODULE_COUNT]) -> ChassisSpeeds {
        let mut vectors = [(0.0, 0.0); MODULE_COUNT];
        for (vector, state) in vectors.iter_mut().zip(states.iter()) {
            *vector = (state.speed * state.angle.cos(), state.speed * state.angle.sin());
        }
        let (vx, vy, omega) = self.least_squares(&vectors);
        ChassisSpeeds::new(vx, vy, omega)
    }

    /// Forward kinematics on position deltas: the robot-frame twist
    /// consistent with each module's travel since the previous sample.
    pub fn to_twist(
        &self,
        start: &[ModulePosition; MODULE_COUNT],
        end: &[ModulePosition; MODULE_COUNT],
    ) -> Twist2d {
        let mut vectors = [(0.0, 0.0); MODULE_COUNT];
        for (i, vector) in vectors.iter_mut().enumerate() {
            let travelled = end[i].distance - start[i].distance;
            *vector = (travelled * end[i].angle.cos(), travelled * end[i].angle.sin());
        }
        let (dx, dy, dtheta) = self.least_squares(&vectors);
        Twist2d { dx, dy, dtheta }
    }

    /// Least-squares solve of the rigid-body model for (vx, vy, omega).
    ///
    /// Each module contributes rows `[1, 0, -y_i]` and `[0, 1, x_i]`.
    /// The normal equations are solved directly; this does not assume the
    /// module layout is centered on the rotation point.
    fn least_squares(&self, vectors: &[(f64, f64); MODULE_COUNT]) -> (f64, f64, f64) {
        let n = MODULE_COUNT as f64;
        let (mut sum_x, mut sum_y, mut sum_r2) = (0.0, 0.0, 0.0);
        let (mut b0, mut b1, mut b2) = (0.0, 0.0, 0.0);

        for (r, &(u, v)) in self.modules.iter().zip(vectors.iter()) {
            sum_x += r.x;
            sum_y += r.y;
            sum_r2 += r.x * r.x + r.y * r.y;
            b0 += u;
            b1 += v;
            b2 += -r.y * u + r.x * v;
        }

        let m = [[n, 0.0, -sum_y], [0.0, n, sum_x], [-sum_y, sum_x, sum_r2]];
        solve3(m, [b0, b1, b2]).unwrap_or((b0 / n, b1 / n, 0.0))
    }
}

/// Cramer's rule for a 3x3 system. None if singular.
fn solve3(m: [[f64; 3]; 3], b: [f64; 3]) -> Option<(f64, f64, f64)> {
    fn det(m: &[[f64; 3]; 3]) -> f64 {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    let d = det(&m);
    if d.abs() < 1e-12 {
        return None;
    }

    let column = |c: usize| {
        let mut replaced = m;
        for row in 0..3 {
            replaced[row][c] = b[row];
        }
        det(&replaced) / d
    };

    Some((column(0), column(1), column(2)))
}
