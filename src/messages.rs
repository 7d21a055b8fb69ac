// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_VISION_SENSOR;
use crate::control::{ChassisCommand, DriveMode, LockStatus};
use crate::swerve::{Alliance, ChassisSpeeds, ControlMode, Corner, Drivetrain, Pose, WrappedAngle};

fn default_true() -> bool {
    true
}

fn default_sensor() -> String {
    DEFAULT_VISION_SENSOR.to_string()
}

// Command from teleop/scripts -> runtime
// Speeds in m/s, rotation rate in deg/s, headings in degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DriveCommand {
    Idle,
    Teleop {
        #[serde(default)]
        vx: f64,
        #[serde(default)]
        vy: f64,
        #[serde(default)]
        omega_deg: f64,
        #[serde(default = "default_true")]
        field_relative: bool,
        #[serde(default = "default_true")]
        open_loop: bool,
    },
    HoldHeading {
        #[serde(default)]
        vx: f64,
        #[serde(default)]
        vy: f64,
        heading_deg: f64,
        #[serde(default = "default_true")]
        field_relative: bool,
        #[serde(default = "default_true")]
        open_loop: bool,
    },
    TargetLock {
        #[serde(default)]
        vx: f64,
        #[serde(default)]
        vy: f64,
        #[serde(default = "default_sensor")]
        sensor: String,
        #[serde(default = "default_true")]
        field_relative: bool,
        #[serde(default = "default_true")]
        open_loop: bool,
    },
    LockX,
}

impl From<&DriveCommand> for DriveMode {
    fn from(cmd: &DriveCommand) -> Self {
        let chassis = |vx: f64, vy: f64, omega: f64, field_relative: bool, open_loop: bool| {
            ChassisCommand::new(
                ChassisSpeeds::new(vx, vy, omega),
                field_relative,
                ControlMode::from_open_loop(open_loop),
            )
        };

        match cmd {
            DriveCommand::Idle => DriveMode::Idle,
            DriveCommand::Teleop {
                vx,
                vy,
                omega_deg,
                field_relative,
                open_loop,
            } => DriveMode::Teleop(chassis(
                *vx,
                *vy,
                omega_deg.to_radians(),
                *field_relative,
                *open_loop,
            )),
            DriveCommand::HoldHeading {
                vx,
                vy,
                heading_deg,
                field_relative,
                open_loop,
            } => DriveMode::HoldHeading {
                command: chassis(*vx, *vy, 0.0, *field_relative, *open_loop),
                target: WrappedAngle::from_degrees(*heading_deg),
            },
            DriveCommand::TargetLock {
                vx,
                vy,
                sensor,
                field_relative,
                open_loop,
            } => DriveMode::TargetLock {
                command: chassis(*vx, *vy, 0.0, *field_relative, *open_loop),
                sensor: sensor.clone(),
            },
            DriveCommand::LockX => DriveMode::LockX,
        }
    }
}

/// Horizontal target offset from a vision sensor (positive = target right)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionReading {
    pub sensor: String,
    pub tx_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseMessage {
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
}

impl From<Pose> for PoseMessage {
    fn from(pose: Pose) -> Self {
        Self {
            x: pose.x,
            y: pose.y,
            heading_deg: pose.heading.degrees(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleTelemetry {
    pub corner: String,
    pub angle_deg: f64,
    pub raw_absolute_deg: f64,
    pub calibrated_absolute_deg: f64,
    pub velocity: f64,
    pub distance: f64,
}

// Telemetry from runtime -> dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveTelemetry {
    pub heading_deg: f64,
    pub average_velocity: f64,
    pub average_drive_voltage: f64,
    pub pose: PoseMessage,
    pub alliance_pose: PoseMessage,
    pub modules: Vec<ModuleTelemetry>,
    pub desaturation_count: u64,
    pub lock_status: LockStatus,
}

impl DriveTelemetry {
    pub fn capture(drivetrain: &Drivetrain, alliance: Alliance, lock_status: LockStatus) -> Self {
        let measured = drivetrain.measured_states();
        let raw = drivetrain.absolute_angles();
        let calibrated = drivetrain.calibrated_absolute_angles();

        let modules = Corner::ALL
            .iter()
            .map(|corner| {
                let i = corner.index();
                ModuleTelemetry {
                    corner: corner.label().to_string(),
                    angle_deg: measured[i].steer_angle.wrapped().degrees(),
                    raw_absolute_deg: raw[i].degrees(),
                    calibrated_absolute_deg: calibrated[i].degrees(),
                    velocity: measured[i].drive_velocity,
                    distance: measured[i].drive_distance,
                }
            })
            .collect();

        Self {
            heading_deg: drivetrain.heading_degrees(),
            average_velocity: drivetrain.average_drive_velocity(),
            average_drive_voltage: drivetrain.average_drive_voltage(),
            pose: drivetrain.pose().into(),
            alliance_pose: drivetrain.alliance_pose(alliance).into(),
            modules,
            desaturation_count: drivetrain.desaturation_count(),
            lock_status,
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_teleop_defaults() {
        let cmd: DriveCommand =
            serde_json::from_str(r#"{"mode":"teleop","vx":1.0,"omega_deg":90.0}"#).unwrap();
        let mode = DriveMode::from(&cmd);
        match mode {
            DriveMode::Teleop(c) => {
                assert_eq!(c.speeds.vx, 1.0);
                assert_eq!(c.speeds.vy, 0.0);
                assert!((c.speeds.omega - FRAC_PI_2).abs() < 1e-12);
                assert!(c.field_relative);
                assert_eq!(c.control, ControlMode::OpenLoop);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_hold_heading_in_degrees() {
        let cmd: DriveCommand = serde_json::from_str(
            r#"{"mode":"hold_heading","heading_deg":170.0,"open_loop":false,"field_relative":false}"#,
        )
        .unwrap();
        match DriveMode::from(&cmd) {
            DriveMode::HoldHeading { command, target } => {
                assert!((target.degrees() - 170.0).abs() < 1e-9);
                assert_eq!(command.control, ControlMode::ClosedLoop);
                assert!(!command.field_relative);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_hold_heading_requires_heading() {
        let result = serde_json::from_str::<DriveCommand>(r#"{"mode":"hold_heading"}"#);
        assert!(result.is_err(), "hold_heading without heading_deg should be rejected");
    }

    #[test]
    fn test_target_lock_default_sensor() {
        let cmd: DriveCommand = serde_json::from_str(r#"{"mode":"target_lock","vx":0.5}"#).unwrap();
        let mode = DriveMode::from(&cmd);
        assert_eq!(mode.vision_sensor(), Some(DEFAULT_VISION_SENSOR));
    }

    #[test]
    fn test_unit_variants() {
        let idle: DriveCommand = serde_json::from_str(r#"{"mode":"idle"}"#).unwrap();
        assert_eq!(DriveMode::from(&idle), DriveMode::Idle);
        let lock: DriveCommand = serde_json::from_str(r#"{"mode":"lock_x"}"#).unwrap();
        assert_eq!(DriveMode::from(&lock), DriveMode::LockX);
        assert_eq!(serde_json::to_string(&DriveCommand::LockX).unwrap(), r#"{"mode":"lock_x"}"#);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(serde_json::from_str::<DriveCommand>(r#"{"mode":"warp"}"#).is_err());
    }

    #[test]
    fn test_health_wire_format() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(), r#""cmd_stale""#);
    }

    #[test]
    fn test_telemetry_capture() {
        use crate::config::DriveConfig;
        use crate::swerve::sim::SimBus;

        let config = DriveConfig::default();
        let mut bus = SimBus::calibrated(&config);
        let drivetrain = Drivetrain::new(&config, &mut bus).expect("drivetrain should initialize");

        let telemetry = DriveTelemetry::capture(&drivetrain, Alliance::Red, LockStatus::Inactive);
        assert_eq!(telemetry.modules.len(), 4);
        assert_eq!(telemetry.modules[0].corner, Corner::FrontLeft.label());
        for module in &telemetry.modules {
            assert!(module.calibrated_absolute_deg.abs() < 1e-6, "{:?}", module);
        }
        assert!((telemetry.alliance_pose.x - config.field.length_m).abs() < 1e-9);

        let json = serde_json::to_string(&telemetry).unwrap();
        assert!(json.contains(r#""lock_status":"inactive""#), "{}", json);
    }
}
