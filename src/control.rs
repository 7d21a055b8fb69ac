// Outer-loop drive control: mode selection, heading hold, vision target lock
//
// One DriveMode is selected per cycle by whichever command is active. Heading
// hold and target lock only ever replace the rotation component; the
// translation of the active command passes through unchanged.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DriveConfig;
use crate::swerve::{ChassisSpeeds, ControlMode, Drivetrain, WrappedAngle};

/// A chassis velocity command with its frame and drive control mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChassisCommand {
    pub speeds: ChassisSpeeds,
    pub field_relative: bool,
    pub control: ControlMode,
}

impl ChassisCommand {
    pub fn new(speeds: ChassisSpeeds, field_relative: bool, control: ControlMode) -> Self {
        Self {
            speeds,
            field_relative,
            control,
        }
    }

    /// No motion, robot frame, open loop
    pub fn stop() -> Self {
        Self::new(ChassisSpeeds::zero(), false, ControlMode::OpenLoop)
    }
}

/// What the drivetrain is asked to do this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum DriveMode {
    /// No active command: wheels hold their angles, drive at zero
    Idle,
    Teleop(ChassisCommand),
    /// Rotation replaced by a PD loop onto a fixed heading
    HoldHeading {
        command: ChassisCommand,
        target: WrappedAngle,
    },
    /// Rotation replaced by a proportional loop onto a vision offset
    TargetLock {
        command: ChassisCommand,
        sensor: String,
    },
    /// Wheels crossed, no motion
    LockX,
}

/// Identity of a mode for controller state: the mode with its goal, without
/// the pass-through translation
#[derive(Debug, Clone, PartialEq)]
enum ModeGoal {
    Idle,
    Teleop,
    HoldHeading(WrappedAngle),
    TargetLock(String),
    LockX,
}

impl DriveMode {
    fn goal(&self) -> ModeGoal {
        match self {
            DriveMode::Idle => ModeGoal::Idle,
            DriveMode::Teleop(_) => ModeGoal::Teleop,
            DriveMode::HoldHeading { target, .. } => ModeGoal::HoldHeading(*target),
            DriveMode::TargetLock { sensor, .. } => ModeGoal::TargetLock(sensor.clone()),
            DriveMode::LockX => ModeGoal::LockX,
        }
    }

    pub fn vision_sensor(&self) -> Option<&str> {
        match self {
            DriveMode::TargetLock { sensor, .. } => Some(sensor),
            _ => None,
        }
    }
}

/// Resolved output for the drivetrain
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveOutput {
    Chassis(ChassisCommand),
    LockX,
}

impl DriveOutput {
    pub fn apply(&self, drivetrain: &mut Drivetrain) {
        match self {
            DriveOutput::Chassis(cmd) => drivetrain.drive(cmd.speeds, cmd.field_relative, cmd.control),
            DriveOutput::LockX => drivetrain.lock_wheels_in_x(),
        }
    }

    /// Commanded rotation rate, zero for LockX
    pub fn omega(&self) -> f64 {
        match self {
            DriveOutput::Chassis(cmd) => cmd.speeds.omega,
            DriveOutput::LockX => 0.0,
        }
    }
}

/// Outer-loop state reported in telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    #[default]
    Inactive,
    /// Heading hold active
    Holding,
    /// Target lock active, target not yet centered
    Tracking,
    /// Target lock reached tolerance
    Finished,
}

/// PD loop on heading error
#[derive(Debug, Clone)]
pub struct HeadingController {
    kp: f64,
    kd: f64,
    max_omega: f64,
    period: f64,
    previous_error: Option<f64>,
}

impl HeadingController {
    pub fn new(kp: f64, kd: f64, max_omega: f64, period: f64) -> Self {
        Self {
            kp,
            kd,
            max_omega,
            period,
            previous_error: None,
        }
    }

    /// Rotation rate (rad/s, CCW positive) to close the heading error
    pub fn calculate(&mut self, target: WrappedAngle, heading: WrappedAngle) -> f64 {
        let error = heading.delta_to(target);
        let derivative = match self.previous_error {
            Some(previous) => (error - previous) / self.period,
            None => 0.0,
        };
        self.previous_error = Some(error);

        (self.kp * error + self.kd * derivative).clamp(-self.max_omega, self.max_omega)
    }

    pub fn reset(&mut self) {
        self.previous_error = None;
    }
}

/// Proportional point-at-target loop. Completes once the offset is inside
/// tolerance and stays complete until reset.
#[derive(Debug, Clone)]
pub struct TargetLockController {
    kp: f64,
    max_omega: f64,
    tolerance: f64,
    finished: bool,
}

impl TargetLockController {
    pub fn new(kp: f64, max_omega: f64, tolerance: f64) -> Self {
        Self {
            kp,
            max_omega,
            tolerance,
            finished: false,
        }
    }

    /// Rotation rate for a horizontal offset in degrees (positive = target
    /// right of center). No reading means no rotation.
    pub fn calculate(&mut self, offset: Option<f64>) -> f64 {
        if self.finished {
            return 0.0;
        }

        let Some(offset) = offset else {
            return 0.0;
        };

        if offset.abs() < self.tolerance {
            info!("Target lock complete (offset {:.3}°)", offset);
            self.finished = true;
            return 0.0;
        }

        let rotation = (self.kp * offset).clamp(-self.max_omega, self.max_omega);
        // Target to the right means turning clockwise
        -rotation
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn reset(&mut self) {
        self.finished = false;
    }
}

/// Resolves a DriveMode into a drivetrain output each cycle
#[derive(Debug, Clone)]
pub struct DriveController {
    heading: HeadingController,
    target_lock: TargetLockController,
    previous_goal: Option<ModeGoal>,
    status: LockStatus,
}

impl DriveController {
    pub fn new(heading: HeadingController, target_lock: TargetLockController) -> Self {
        Self {
            heading,
            target_lock,
            previous_goal: None,
            status: LockStatus::Inactive,
        }
    }

    pub fn from_config(config: &DriveConfig) -> Self {
        Self::new(
            HeadingController::new(
                config.heading_gains.kp,
                config.heading_gains.kd,
                config.max_turn_speed_radps,
                config.loop_period_s(),
            ),
            TargetLockController::new(
                config.target_lock.kp,
                config.target_lock.max_omega,
                config.target_lock.tolerance_deg,
            ),
        )
    }

    /// # Arguments
    /// * `mode` - Mode selected for this cycle
    /// * `heading` - Current field heading
    /// * `vision_offset` - Latest offset (degrees) from the mode's vision sensor
    pub fn update(
        &mut self,
        mode: &DriveMode,
        heading: WrappedAngle,
        vision_offset: Option<f64>,
    ) -> DriveOutput {
        // A new goal starts the controllers fresh, even within the same mode
        let goal = mode.goal();
        if self.previous_goal.as_ref() != Some(&goal) {
            debug!("Drive mode changed to {:?}", mode);
            self.heading.reset();
            self.target_lock.reset();
            self.previous_goal = Some(goal);
        }

        match mode {
            DriveMode::Idle => {
                self.status = LockStatus::Inactive;
                DriveOutput::Chassis(ChassisCommand::stop())
            }
            DriveMode::Teleop(command) => {
                self.status = LockStatus::Inactive;
                DriveOutput::Chassis(*command)
            }
            DriveMode::HoldHeading { command, target } => {
                self.status = LockStatus::Holding;
                let omega = self.heading.calculate(*target, heading);
                DriveOutput::Chassis(ChassisCommand {
                    speeds: command.speeds.with_omega(omega),
                    ..*command
                })
            }
            DriveMode::TargetLock { command, .. } => {
                let omega = self.target_lock.calculate(vision_offset);
                self.status = if self.target_lock.is_finished() {
                    LockStatus::Finished
                } else {
                    LockStatus::Tracking
                };
                DriveOutput::Chassis(ChassisCommand {
                    speeds: command.speeds.with_omega(omega),
                    ..*command
                })
            }
            DriveMode::LockX => {
                self.status = LockStatus::Inactive;
                DriveOutput::LockX
            }
        }
    }

    pub fn status(&self) -> LockStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn controller() -> DriveController {
        DriveController::from_config(&DriveConfig::default())
    }

    fn translating() -> ChassisCommand {
        ChassisCommand::new(ChassisSpeeds::new(1.0, -0.5, 2.0), true, ControlMode::ClosedLoop)
    }

    fn lock_mode() -> DriveMode {
        DriveMode::TargetLock {
            command: translating(),
            sensor: "limelight".to_string(),
        }
    }

    #[test]
    fn test_teleop_passthrough() {
        let mut c = controller();
        let out = c.update(&DriveMode::Teleop(translating()), WrappedAngle::ZERO, None);
        assert_eq!(out, DriveOutput::Chassis(translating()));
        assert_eq!(c.status(), LockStatus::Inactive);
    }

    #[test]
    fn test_idle_commands_zero() {
        let mut c = controller();
        let out = c.update(&DriveMode::Idle, WrappedAngle::ZERO, None);
        assert_eq!(out, DriveOutput::Chassis(ChassisCommand::stop()));
        assert_eq!(out.omega(), 0.0);
    }

    #[test]
    fn test_lock_x() {
        let mut c = controller();
        assert_eq!(c.update(&DriveMode::LockX, WrappedAngle::ZERO, None), DriveOutput::LockX);
    }

    #[test]
    fn test_hold_heading_turns_toward_target() {
        let mut c = controller();
        let mode = DriveMode::HoldHeading {
            command: translating(),
            target: WrappedAngle::from_degrees(90.0),
        };

        let out = c.update(&mode, WrappedAngle::ZERO, None);
        match out {
            DriveOutput::Chassis(cmd) => {
                assert!(cmd.speeds.omega > 0.0);
                assert!(cmd.speeds.omega <= 3.0 * PI + 1e-12);
                // Translation untouched
                assert_eq!(cmd.speeds.vx, 1.0);
                assert_eq!(cmd.speeds.vy, -0.5);
                assert!(cmd.field_relative);
                assert_eq!(cmd.control, ControlMode::ClosedLoop);
            }
            other => panic!("unexpected output {:?}", other),
        }
        assert_eq!(c.status(), LockStatus::Holding);
    }

    #[test]
    fn test_hold_heading_takes_short_way_round() {
        let mut c = controller();
        let mode = DriveMode::HoldHeading {
            command: ChassisCommand::stop(),
            target: WrappedAngle::from_degrees(170.0),
        };
        // From -170°, the short way to 170° is clockwise
        let out = c.update(&mode, WrappedAngle::from_degrees(-170.0), None);
        assert!(out.omega() < 0.0, "omega {}", out.omega());
    }

    #[test]
    fn test_hold_heading_derivative_damps() {
        let config = DriveConfig::default();
        let mut hold = HeadingController::new(5.5, 0.5, 100.0, config.loop_period_s());
        let target = WrappedAngle::from_degrees(20.0);

        let first = hold.calculate(target, WrappedAngle::ZERO);
        assert!((first - 5.5 * 20f64.to_radians()).abs() < 1e-12);

        let second = hold.calculate(target, WrappedAngle::from_degrees(10.0));
        assert!(second < 5.5 * 10f64.to_radians(), "closing error should be damped");

        hold.reset();
        let third = hold.calculate(target, WrappedAngle::from_degrees(10.0));
        assert!((third - 5.5 * 10f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn test_new_heading_target_starts_fresh() {
        let mut c = controller();
        let hold = |deg: f64| DriveMode::HoldHeading {
            command: ChassisCommand::stop(),
            target: WrappedAngle::from_degrees(deg),
        };
        let heading = WrappedAngle::from_degrees(120.0);

        // Settled on the first target
        for _ in 0..5 {
            let out = c.update(&hold(120.0), heading, None);
            assert!(out.omega().abs() < 1e-12);
        }

        // Jumping to another preset must not read the step as a derivative
        let out = c.update(&hold(90.0), heading, None);
        let proportional = 5.5 * (-30f64).to_radians();
        assert!(
            (out.omega() - proportional).abs() < 1e-9,
            "omega {} vs proportional {}",
            out.omega(),
            proportional
        );
    }

    #[test]
    fn test_new_lock_sensor_restarts_lock() {
        let mut c = controller();
        c.update(&lock_mode(), WrappedAngle::ZERO, Some(0.001));
        assert_eq!(c.status(), LockStatus::Finished);

        let other = DriveMode::TargetLock {
            command: translating(),
            sensor: "rear_camera".to_string(),
        };
        let out = c.update(&other, WrappedAngle::ZERO, Some(5.0));
        assert_eq!(c.status(), LockStatus::Tracking);
        assert!(out.omega() < 0.0);
    }

    #[test]
    fn test_translation_change_keeps_lock_latched() {
        let mut c = controller();
        c.update(&lock_mode(), WrappedAngle::ZERO, Some(0.001));

        let slower = DriveMode::TargetLock {
            command: ChassisCommand::new(ChassisSpeeds::new(0.2, 0.0, 0.0), true, ControlMode::OpenLoop),
            sensor: "limelight".to_string(),
        };
        let out = c.update(&slower, WrappedAngle::ZERO, Some(5.0));
        assert_eq!(out.omega(), 0.0);
        assert_eq!(c.status(), LockStatus::Finished);
    }

    #[test]
    fn test_target_lock_finishes_inside_tolerance() {
        let mut c = controller();
        let out = c.update(&lock_mode(), WrappedAngle::ZERO, Some(0.005));
        assert_eq!(out.omega(), 0.0);
        assert_eq!(c.status(), LockStatus::Finished);
    }

    #[test]
    fn test_target_lock_turns_toward_target() {
        let mut c = controller();

        // Target right of center: clockwise
        let out = c.update(&lock_mode(), WrappedAngle::ZERO, Some(10.0));
        assert!((out.omega() + 1.0).abs() < 1e-12);
        assert_eq!(c.status(), LockStatus::Tracking);

        // Large offsets are clamped
        let out = c.update(&lock_mode(), WrappedAngle::ZERO, Some(-200.0));
        assert!((out.omega() - 7.5).abs() < 1e-12);

        // Translation passes through
        match out {
            DriveOutput::Chassis(cmd) => {
                assert_eq!(cmd.speeds.vx, 1.0);
                assert_eq!(cmd.speeds.vy, -0.5);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_target_lock_latches_until_mode_changes() {
        let mut c = controller();
        c.update(&lock_mode(), WrappedAngle::ZERO, Some(0.001));
        assert_eq!(c.status(), LockStatus::Finished);

        // Target drifts away: still finished, still zero rotation
        let out = c.update(&lock_mode(), WrappedAngle::ZERO, Some(5.0));
        assert_eq!(out.omega(), 0.0);
        assert_eq!(c.status(), LockStatus::Finished);

        // Re-activation starts tracking again
        c.update(&DriveMode::Teleop(translating()), WrappedAngle::ZERO, None);
        let out = c.update(&lock_mode(), WrappedAngle::ZERO, Some(5.0));
        assert!(out.omega() < 0.0);
        assert_eq!(c.status(), LockStatus::Tracking);
    }

    #[test]
    fn test_target_lock_without_reading() {
        let mut c = controller();
        let out = c.update(&lock_mode(), WrappedAngle::ZERO, None);
        assert_eq!(out.omega(), 0.0);
        assert_eq!(c.status(), LockStatus::Tracking);
    }

    #[test]
    fn test_vision_sensor_name() {
        assert_eq!(lock_mode().vision_sensor(), Some("limelight"));
        assert_eq!(DriveMode::Idle.vision_sensor(), None);
    }
}
