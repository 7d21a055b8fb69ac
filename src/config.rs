// Timeouts, topics, and drivetrain commissioning values
use std::f64::consts::PI;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::swerve::hardware::{DeviceId, PidGains};
use crate::swerve::kinematics::{Corner, SwerveKinematics};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Vision readings older than this are treated as "no target"
pub const VISION_TIMEOUT: Duration = Duration::from_millis(200);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // commands
pub const TOPIC_VISION: &str = "swerve/vision/**"; // vision offsets, one key per camera
pub const TOPIC_STATE_DRIVE: &str = "swerve/state/drive"; // telemetry
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Camera used when a target-lock command does not name one
pub const DEFAULT_VISION_SENSOR: &str = "limelight";

/// Bus ids and calibration for one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub drive_id: DeviceId,
    pub steer_id: DeviceId,
    pub absolute_encoder_id: DeviceId,
    /// Raw absolute encoder reading (degrees) when the wheel points forward
    pub offset_deg: f64,
}

/// Drive feedforward: volts = ks * sign(v) + kv * v
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feedforward {
    pub ks: f64,
    pub kv: f64,
}

impl Feedforward {
    pub fn volts(&self, velocity: f64) -> f64 {
        if velocity == 0.0 {
            0.0
        } else {
            self.ks * velocity.signum() + self.kv * velocity
        }
    }
}

/// Gains for the heading-hold loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadingGains {
    pub kp: f64,
    pub kd: f64,
}

/// Vision point-at-target tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetLockConfig {
    /// rad/s per degree of offset
    pub kp: f64,
    /// Rotation clamp in rad/s
    pub max_omega: f64,
    /// Offset (degrees) under which the lock is complete
    pub tolerance_deg: f64,
}

/// Field dimensions used for the alliance-mirrored pose
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub length_m: f64,
    pub width_m: f64,
}

/// Commissioning configuration for the drivetrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub front_left: ModuleConfig,
    pub front_right: ModuleConfig,
    pub back_left: ModuleConfig,
    pub back_right: ModuleConfig,

    pub heading_sensor_id: DeviceId,

    /// Left-to-right distance between wheel centers (m)
    pub track_width_m: f64,
    /// Front-to-back distance between wheel centers (m)
    pub wheel_base_m: f64,
    pub wheel_radius_m: f64,

    /// Wheel revolutions per drive motor revolution
    pub drive_reduction: f64,
    /// Module revolutions per steer motor revolution
    pub steer_reduction: f64,
    pub motor_free_rpm: f64,

    /// Desaturation ceiling (m/s)
    pub max_module_speed_mps: f64,
    /// Rotation rate at full stick, and the heading-hold clamp (rad/s)
    pub max_turn_speed_radps: f64,

    pub drive_gains: PidGains,
    pub steer_gains: PidGains,
    pub drive_feedforward: Feedforward,
    pub heading_gains: HeadingGains,
    pub target_lock: TargetLockConfig,
    pub field: FieldConfig,
}

const INCH: f64 = 0.0254;

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            front_left: ModuleConfig {
                drive_id: 4,
                steer_id: 3,
                absolute_encoder_id: 11,
                offset_deg: 45.87876,
            },
            front_right: ModuleConfig {
                drive_id: 6,
                steer_id: 5,
                absolute_encoder_id: 10,
                offset_deg: 175.69332,
            },
            back_left: ModuleConfig {
                drive_id: 2,
                steer_id: 1,
                absolute_encoder_id: 12,
                offset_deg: 47.191744,
            },
            back_right: ModuleConfig {
                drive_id: 8,
                steer_id: 7,
                absolute_encoder_id: 13,
                offset_deg: 74.88288,
            },
            heading_sensor_id: 9,
            track_width_m: 23.75 * INCH,
            wheel_base_m: 23.75 * INCH,
            wheel_radius_m: 2.0 * INCH,
            // L3 module gearing
            drive_reduction: (16.0 / 50.0) * (28.0 / 16.0) * (15.0 / 45.0),
            steer_reduction: (14.0 / 50.0) * (10.0 / 60.0),
            motor_free_rpm: 6784.0,
            max_module_speed_mps: 10.0,
            max_turn_speed_radps: 3.0 * PI,
            drive_gains: PidGains::pd(0.13, 0.0),
            steer_gains: PidGains::pd(0.37431, 0.27186),
            drive_feedforward: Feedforward { ks: 0.667, kv: 2.44 },
            heading_gains: HeadingGains { kp: 5.5, kd: 0.5 },
            target_lock: TargetLockConfig {
                kp: 0.1,
                max_omega: 7.5,
                tolerance_deg: 0.01,
            },
            field: FieldConfig {
                length_m: 16.54,
                width_m: 8.21,
            },
        }
    }
}

impl DriveConfig {
    /// Load from a JSON file. Missing fields fall back to the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading drive configuration from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: DriveConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the kinematics or unit conversions meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("track_width_m", self.track_width_m),
            ("wheel_base_m", self.wheel_base_m),
            ("wheel_radius_m", self.wheel_radius_m),
            ("drive_reduction", self.drive_reduction),
            ("steer_reduction", self.steer_reduction),
            ("motor_free_rpm", self.motor_free_rpm),
            ("max_module_speed_mps", self.max_module_speed_mps),
            ("max_turn_speed_radps", self.max_turn_speed_radps),
            ("target_lock.max_omega", self.target_lock.max_omega),
            ("target_lock.tolerance_deg", self.target_lock.tolerance_deg),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{} must be positive, got {}", name, value)));
            }
        }

        let mut ids: Vec<DeviceId> = Corner::ALL
            .iter()
            .flat_map(|&c| {
                let m = self.module(c);
                [m.drive_id, m.steer_id, m.absolute_encoder_id]
            })
            .collect();
        ids.push(self.heading_sensor_id);
        let count = ids.len();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != count {
            return Err(ConfigError::Invalid("device ids must be unique".to_string()));
        }

        Ok(())
    }

    pub fn module(&self, corner: Corner) -> &ModuleConfig {
        match corner {
            Corner::FrontLeft => &self.front_left,
            Corner::FrontRight => &self.front_right,
            Corner::BackLeft => &self.back_left,
            Corner::BackRight => &self.back_right,
        }
    }

    pub fn kinematics(&self) -> SwerveKinematics {
        SwerveKinematics::rectangular(self.track_width_m, self.wheel_base_m)
    }

    /// Drive encoder meters per motor revolution
    pub fn drive_meters_per_rev(&self) -> f64 {
        2.0 * PI * self.wheel_radius_m * self.drive_reduction
    }

    /// Drive encoder m/s per motor RPM
    pub fn drive_mps_per_rpm(&self) -> f64 {
        self.drive_meters_per_rev() / 60.0
    }

    /// Steer encoder radians per motor revolution
    pub fn steer_radians_per_rev(&self) -> f64 {
        2.0 * PI * self.steer_reduction
    }

    /// Wheel surface speed at motor free speed; open-loop full scale
    pub fn free_speed_mps(&self) -> f64 {
        self.motor_free_rpm * self.drive_mps_per_rpm()
    }

    /// Loop period in seconds
    pub fn loop_period_s(&self) -> f64 {
        1.0 / LOOP_HZ as f64
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        DriveConfig::default().validate().expect("defaults must validate");
    }

    #[test]
    fn test_derived_factors() {
        let config = DriveConfig::default();
        // 2 in wheel, L3 reduction
        assert!((config.drive_meters_per_rev() - 0.05958).abs() < 1e-4);
        assert!((config.steer_radians_per_rev() - 0.29322).abs() < 1e-4);
        println!("free speed: {:.3} m/s", config.free_speed_mps());
        assert!((config.free_speed_mps() - 6.737).abs() < 0.01);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = DriveConfig::from_json(r#"{ "max_module_speed_mps": 4.5 }"#).expect("parse");
        assert_eq!(config.max_module_speed_mps, 4.5);
        assert_eq!(config.front_left, DriveConfig::default().front_left);
    }

    #[test]
    fn test_rejects_non_positive_geometry() {
        let err = DriveConfig::from_json(r#"{ "track_width_m": 0.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {:?}", err);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut config = DriveConfig::default();
        config.back_right.drive_id = config.front_left.drive_id;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_feedforward() {
        let ff = Feedforward { ks: 0.5, kv: 2.0 };
        assert_eq!(ff.volts(0.0), 0.0);
        assert!((ff.volts(1.0) - 2.5).abs() < 1e-12);
        assert!((ff.volts(-1.0) + 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_missing_file() {
        let err = DriveConfig::load("/nonexistent/swerve.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
