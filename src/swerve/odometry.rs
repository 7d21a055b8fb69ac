// Wheel odometry
//
// Each cycle the module distance deltas are turned into a robot-frame
// displacement by forward kinematics, rotated into the field frame with the
// midpoint heading of the same interval, and added to the pose. The heading
// itself comes straight from the heading sensor. No external correction is
// applied here; drift is expected over long horizons.

use serde::{Deserialize, Serialize};

use super::angle::WrappedAngle;
use super::kinematics::{ModulePosition, SwerveKinematics, Translation2d, MODULE_COUNT};
use crate::config::FieldConfig;

/// Field pose: meters and radians
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: WrappedAngle,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: WrappedAngle) -> Self {
        Self { x, y, heading }
    }

    pub fn from_degrees(x: f64, y: f64, heading_deg: f64) -> Self {
        Self::new(x, y, WrappedAngle::from_degrees(heading_deg))
    }

    /// Point-mirror about the field center (the other alliance's view)
    pub fn mirrored(&self, field: &FieldConfig) -> Self {
        Self {
            x: field.length_m - self.x,
            y: field.width_m - self.y,
            heading: self.heading.opposite(),
        }
    }
}

/// Which side of the field the robot drives from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Alliance {
    #[default]
    Blue,
    Red,
}

impl Alliance {
    /// The pose as seen from this alliance's side
    pub fn relative_pose(self, pose: &Pose, field: &FieldConfig) -> Pose {
        match self {
            Alliance::Blue => *pose,
            Alliance::Red => pose.mirrored(field),
        }
    }
}

/// Integrates module travel into a field pose
#[derive(Debug, Clone)]
pub struct Odometry {
    pose: Pose,
    previous_positions: [ModulePosition; MODULE_COUNT],
    /// Unwrapped field heading at the previous sample
    previous_heading: f64,
}

impl Odometry {
    pub fn new(pose: Pose, positions: [ModulePosition; MODULE_COUNT], heading: f64) -> Self {
        Self {
            pose,
            previous_positions: positions,
            previous_heading: heading,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Integrate one sample window.
    ///
    /// # Arguments
    /// * `kinematics` - Module geometry
    /// * `heading` - Field heading at the end of the window (rad, unwrapped)
    /// * `positions` - Module positions at the end of the window
    pub fn update(
        &mut self,
        kinematics: &SwerveKinematics,
        heading: f64,
        positions: [ModulePosition; MODULE_COUNT],
    ) -> Pose {
        let twist = kinematics.to_twist(&self.previous_positions, &positions);

        let midpoint = self.previous_heading + (heading - self.previous_heading) / 2.0;
        let field_delta =
            Translation2d::new(twist.dx, twist.dy).rotate_by(WrappedAngle::from_radians(midpoint));

        self.pose = Pose::new(
            self.pose.x + field_delta.x,
            self.pose.y + field_delta.y,
            WrappedAngle::from_radians(heading),
        );
        self.previous_positions = positions;
        self.previous_heading = heading;

        self.pose
    }

    /// Discrete overwrite; the next update integrates from here
    pub fn reset(&mut self, pose: Pose, positions: [ModulePosition; MODULE_COUNT], heading: f64) {
        self.pose = pose;
        self.previous_positions = positions;
        self.previous_heading = heading;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn positions(distance: f64, angle_deg: f64) -> [ModulePosition; MODULE_COUNT] {
        [ModulePosition {
            distance,
            angle: WrappedAngle::from_degrees(angle_deg),
        }; MODULE_COUNT]
    }

    #[test]
    fn test_straight_line() {
        let k = SwerveKinematics::rectangular(0.6, 0.6);
        let mut odometry = Odometry::new(Pose::default(), positions(0.0, 0.0), 0.0);

        for i in 1..=10 {
            odometry.update(&k, 0.0, positions(0.1 * i as f64, 0.0));
        }
        let pose = odometry.pose();
        assert!((pose.x - 1.0).abs() < 1e-9);
        assert!(pose.y.abs() < 1e-9);
    }

    #[test]
    fn test_robot_frame_rotated_into_field() {
        // Facing +y, driving robot-forward moves the pose along +y
        let k = SwerveKinematics::rectangular(0.6, 0.6);
        let mut odometry = Odometry::new(Pose::default(), positions(0.0, 0.0), FRAC_PI_2);
        let pose = odometry.update(&k, FRAC_PI_2, positions(0.5, 0.0));
        assert!(pose.x.abs() < 1e-9);
        assert!((pose.y - 0.5).abs() < 1e-9);
        assert!((pose.heading.radians() - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_midpoint_heading() {
        // Heading swings 0 -> 90° while the wheels travel 1 m forward:
        // the displacement is applied at 45°
        let k = SwerveKinematics::rectangular(0.6, 0.6);
        let mut odometry = Odometry::new(Pose::default(), positions(0.0, 0.0), 0.0);
        let pose = odometry.update(&k, FRAC_PI_2, positions(1.0, 0.0));
        let half = (0.5f64).sqrt();
        assert!((pose.x - half).abs() < 1e-9);
        assert!((pose.y - half).abs() < 1e-9);
    }

    #[test]
    fn test_reset_is_discrete() {
        let k = SwerveKinematics::rectangular(0.6, 0.6);
        let mut odometry = Odometry::new(Pose::default(), positions(0.0, 0.0), 0.0);
        odometry.update(&k, 0.0, positions(2.0, 0.0));

        let target = Pose::from_degrees(1.83, 7.61, -90.0);
        odometry.reset(target, positions(2.0, 0.0), -FRAC_PI_2);
        assert_eq!(odometry.pose(), target);

        // Next sample with no travel does not move the pose
        let pose = odometry.update(&k, -FRAC_PI_2, positions(2.0, 0.0));
        assert_eq!(pose.x, target.x);
        assert_eq!(pose.y, target.y);
    }

    #[test]
    fn test_alliance_mirror() {
        let field = FieldConfig {
            length_m: 16.54,
            width_m: 8.21,
        };
        let pose = Pose::from_degrees(1.0, 2.0, 0.0);

        assert_eq!(Alliance::Blue.relative_pose(&pose, &field), pose);

        let red = Alliance::Red.relative_pose(&pose, &field);
        assert!((red.x - 15.54).abs() < 1e-9);
        assert!((red.y - 6.21).abs() < 1e-9);
        assert!((red.heading.radians().abs() - PI).abs() < 1e-9);
    }
}
