// One swerve module: drive motor, steer motor, absolute encoder
//
// The absolute encoder is only trusted once, at startup, to seed the steer
// motor's relative encoder. From then on the steer loop runs on the relative
// encoder's continuous position.

use tracing::{debug, info, warn};

use super::angle::{ContinuousAngle, WrappedAngle};
use super::hardware::{
    AbsoluteEncoder, AbsoluteEncoderConfig, DeviceBus, HardwareError, IdleMode, MotorConfig,
    MotorController, MotorOutput, NOMINAL_VOLTAGE,
};
use super::kinematics::{Corner, ModuleDesiredState, ModulePosition};
use super::optimizer::{compute_adjusted_target, optimize};
use crate::config::{DriveConfig, Feedforward, ModuleConfig};

/// Largest seed read-back error accepted without a commissioning warning (rad)
const SEED_TOLERANCE: f64 = 0.05;

/// How the drive motor is commanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Duty cycle proportional to the fraction of free speed
    #[default]
    OpenLoop,
    /// Controller-side velocity loop plus feedforward
    ClosedLoop,
}

impl ControlMode {
    pub fn from_open_loop(open_loop: bool) -> Self {
        if open_loop { ControlMode::OpenLoop } else { ControlMode::ClosedLoop }
    }
}

/// Per-cycle snapshot of a module's sensors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleMeasuredState {
    pub steer_angle: ContinuousAngle,
    /// Meters since the last zero
    pub drive_distance: f64,
    /// m/s
    pub drive_velocity: f64,
    /// Absolute encoder reading, offset not applied
    pub raw_absolute: WrappedAngle,
}

/// Fatal drivetrain startup faults
#[derive(Debug, thiserror::Error)]
pub enum SwerveError {
    #[error("{device} failed to configure: {source}")]
    Configuration {
        device: String,
        #[source]
        source: HardwareError,
    },
}

/// Absolute encoder readings that suggest miswiring or a bad offset
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorDiscontinuity {
    #[error("absolute reading {rotations} rotations is outside ±{limit}")]
    OutOfRange { rotations: f64, limit: f64 },

    #[error("steer encoder read back {actual:.3} rad after seeding {expected:.3} rad")]
    SeedMismatch { expected: f64, actual: f64 },
}

/// Motor settings shared by all four modules, derived from the drive config
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleConstants {
    pub drive: MotorConfig,
    pub steer: MotorConfig,
    pub absolute: AbsoluteEncoderConfig,
    pub free_speed_mps: f64,
    pub feedforward: Feedforward,
}

impl ModuleConstants {
    pub fn from_config(config: &DriveConfig) -> Self {
        Self {
            drive: MotorConfig {
                inverted: true,
                idle_mode: IdleMode::Brake,
                position_factor: config.drive_meters_per_rev(),
                velocity_factor: config.drive_mps_per_rpm(),
                gains: config.drive_gains,
            },
            steer: MotorConfig {
                inverted: true,
                idle_mode: IdleMode::Coast,
                position_factor: config.steer_radians_per_rev(),
                velocity_factor: config.steer_radians_per_rev() / 60.0,
                gains: config.steer_gains,
            },
            absolute: AbsoluteEncoderConfig::default(),
            free_speed_mps: config.free_speed_mps(),
            feedforward: config.drive_feedforward,
        }
    }
}

pub struct SwerveModule {
    corner: Corner,
    drive: Box<dyn MotorController>,
    steer: Box<dyn MotorController>,
    absolute: Box<dyn AbsoluteEncoder>,
    offset: WrappedAngle,
    free_speed_mps: f64,
    feedforward: Feedforward,
    warning: Option<SensorDiscontinuity>,
}

impl SwerveModule {
    /// Open and configure the module's devices and seed the steer encoder.
    ///
    /// A configuration rejection is returned, never retried.
    pub fn initialize(
        corner: Corner,
        ids: &ModuleConfig,
        bus: &mut dyn DeviceBus,
        constants: &ModuleConstants,
    ) -> Result<Self, SwerveError> {
        let label = corner.label();
        info!(
            "Initializing {} module: drive={}, steer={}, encoder={}",
            label, ids.drive_id, ids.steer_id, ids.absolute_encoder_id
        );

        let fault = |device: &str, id, source| SwerveError::Configuration {
            device: format!("{} {} {}", label, device, id),
            source,
        };

        let mut drive = bus
            .open_motor(ids.drive_id)
            .map_err(|e| fault("drive motor", ids.drive_id, e))?;
        let mut steer = bus
            .open_motor(ids.steer_id)
            .map_err(|e| fault("steer motor", ids.steer_id, e))?;
        let mut absolute = bus
            .open_absolute_encoder(ids.absolute_encoder_id)
            .map_err(|e| fault("absolute encoder", ids.absolute_encoder_id, e))?;

        drive
            .configure(&constants.drive)
            .map_err(|e| fault("drive motor", ids.drive_id, e))?;
        steer
            .configure(&constants.steer)
            .map_err(|e| fault("steer motor", ids.steer_id, e))?;
        absolute
            .configure(&constants.absolute)
            .map_err(|e| fault("absolute encoder", ids.absolute_encoder_id, e))?;

        let mut module = Self {
            corner,
            drive,
            steer,
            absolute,
            offset: WrappedAngle::from_degrees(ids.offset_deg),
            free_speed_mps: constants.free_speed_mps,
            feedforward: constants.feedforward,
            warning: None,
        };
        module.warning = module.seed_steer_encoder(constants.absolute.discontinuity_point);

        if let Some(warning) = &module.warning {
            warn!("{} module commissioning warning: {}", label, warning);
        }

        Ok(module)
    }

    /// Seed the relative steer encoder from the offset-corrected absolute reading
    fn seed_steer_encoder(&mut self, limit: f64) -> Option<SensorDiscontinuity> {
        let rotations = self.absolute.absolute_rotations();
        let mut warning = None;

        if !rotations.is_finite() || rotations.abs() > limit + 1e-9 {
            warning = Some(SensorDiscontinuity::OutOfRange { rotations, limit });
        }

        let raw = if rotations.is_finite() {
            WrappedAngle::from_rotations(rotations).radians()
        } else {
            0.0
        };
        let seed = WrappedAngle::from_radians(raw - self.offset.radians()).radians();

        self.steer.set_encoder_position(seed);
        debug!("{} steer encoder seeded to {:.4} rad", self.corner.label(), seed);

        let actual = self.steer.position();
        if warning.is_none() && (actual - seed).abs() > SEED_TOLERANCE {
            warning = Some(SensorDiscontinuity::SeedMismatch {
                expected: seed,
                actual,
            });
        }

        warning
    }

    pub fn corner(&self) -> Corner {
        self.corner
    }

    /// Read-only sensor snapshot
    pub fn measured_state(&self) -> ModuleMeasuredState {
        ModuleMeasuredState {
            steer_angle: self.steer_angle(),
            drive_distance: self.drive.position(),
            drive_velocity: self.drive.velocity(),
            raw_absolute: self.raw_absolute_angle(),
        }
    }

    pub fn steer_angle(&self) -> ContinuousAngle {
        ContinuousAngle::from_radians(self.steer.position())
    }

    /// Drive distance and wrapped steer angle, for odometry
    pub fn position(&self) -> ModulePosition {
        ModulePosition {
            distance: self.drive.position(),
            angle: self.steer_angle().wrapped(),
        }
    }

    /// Wrapped angle and velocity, for forward kinematics
    pub fn state(&self) -> ModuleDesiredState {
        ModuleDesiredState::new(self.steer_angle().wrapped(), self.drive.velocity())
    }

    pub fn raw_absolute_angle(&self) -> WrappedAngle {
        WrappedAngle::from_rotations(self.absolute.absolute_rotations())
    }

    /// Absolute reading with the calibration offset removed
    pub fn calibrated_absolute_angle(&self) -> WrappedAngle {
        WrappedAngle::from_radians(self.raw_absolute_angle().radians() - self.offset.radians())
    }

    pub fn commissioning_warning(&self) -> Option<&SensorDiscontinuity> {
        self.warning.as_ref()
    }

    /// See [`compute_adjusted_target`]
    pub fn compute_adjusted_target(target: f64, current: f64) -> f64 {
        compute_adjusted_target(target, current)
    }

    /// Optimize, cosine-scale and send a desired state to the motors
    pub fn apply_desired_state(&mut self, desired: ModuleDesiredState, mode: ControlMode) {
        let current = self.steer_angle();
        let optimized = optimize(desired, current);

        // Slow the wheel while it is still turning into position
        let speed = optimized.speed * optimized.angle_error.cos();

        self.steer
            .set_output(MotorOutput::Position(optimized.angle.radians()));

        let drive_output = match mode {
            ControlMode::OpenLoop => MotorOutput::DutyCycle(speed / self.free_speed_mps),
            ControlMode::ClosedLoop => MotorOutput::Velocity {
                setpoint: speed,
                feedforward_volts: self.feedforward.volts(speed),
            },
        };
        self.drive.set_output(drive_output);
    }

    /// Zero the drive output; the steer loop keeps its last setpoint
    pub fn stop(&mut self) {
        self.drive.set_output(MotorOutput::DutyCycle(0.0));
    }

    pub fn zero_drive_distance(&mut self) {
        info!("Zeroing {} drive distance", self.corner.label());
        self.drive.set_encoder_position(0.0);
    }

    /// System identification: steer held at zero, raw volts on the drive
    pub fn run_voltage_characterization(&mut self, volts: f64) {
        self.steer.set_output(MotorOutput::Position(0.0));
        self.drive.set_output(MotorOutput::Voltage(volts));
    }

    /// Applied drive output in volts
    pub fn drive_voltage(&self) -> f64 {
        self.drive.applied_output() * NOMINAL_VOLTAGE
    }
}
