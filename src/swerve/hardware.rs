// Hardware seams for the swerve base
//
// Motor controllers, absolute encoders and the heading sensor are reached
// through these traits. Reads return the latest cached value and writes are
// fire-and-forget, so nothing here blocks the control loop.

use serde::{Deserialize, Serialize};

/// Bus identifier of a device (CAN id on the robot)
pub type DeviceId = u8;

/// Nominal battery voltage used to convert duty cycle to volts
pub const NOMINAL_VOLTAGE: f64 = 12.0;

/// What a motor does when it receives no output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleMode {
    Brake,
    Coast,
}

/// Proportional/integral/derivative gains for a device-side loop
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
}

impl PidGains {
    pub fn pd(kp: f64, kd: f64) -> Self {
        Self { kp, ki: 0.0, kd }
    }
}

/// Startup configuration pushed to a motor controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorConfig {
    pub inverted: bool,
    pub idle_mode: IdleMode,
    /// Encoder position units per motor revolution
    pub position_factor: f64,
    /// Encoder velocity units per motor RPM
    pub velocity_factor: f64,
    /// Gains for the controller's position/velocity loop
    pub gains: PidGains,
}

/// A single output request to a motor controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorOutput {
    /// Fraction of bus voltage, [-1, 1]
    DutyCycle(f64),
    /// Raw volts
    Voltage(f64),
    /// Closed-loop position setpoint in encoder position units
    Position(f64),
    /// Closed-loop velocity setpoint in encoder velocity units,
    /// plus an arbitrary feedforward added by the controller
    Velocity { setpoint: f64, feedforward_volts: f64 },
}

/// Startup configuration for an absolute encoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteEncoderConfig {
    pub counter_clockwise_positive: bool,
    /// Reading wraps at ±this many rotations
    pub discontinuity_point: f64,
}

impl Default for AbsoluteEncoderConfig {
    fn default() -> Self {
        Self {
            counter_clockwise_positive: true,
            discontinuity_point: 0.5,
        }
    }
}

/// Motor controller with an integrated relative encoder
pub trait MotorController: Send {
    fn id(&self) -> DeviceId;

    /// Push startup configuration. A rejection means a wiring or firmware fault.
    fn configure(&mut self, config: &MotorConfig) -> Result<(), HardwareError>;

    /// Encoder position in configured units
    fn position(&self) -> f64;

    /// Encoder velocity in configured units
    fn velocity(&self) -> f64;

    /// Overwrite the encoder position (seeding, zeroing)
    fn set_encoder_position(&mut self, position: f64);

    fn set_output(&mut self, output: MotorOutput);

    /// Output currently applied, as duty cycle
    fn applied_output(&self) -> f64;
}

/// Absolute rotary sensor on the steering axis
pub trait AbsoluteEncoder: Send {
    fn id(&self) -> DeviceId;

    fn configure(&mut self, config: &AbsoluteEncoderConfig) -> Result<(), HardwareError>;

    /// Absolute position in rotations, within ±discontinuity point
    fn absolute_rotations(&self) -> f64;
}

/// Chassis yaw sensor
pub trait HeadingSensor: Send {
    fn id(&self) -> DeviceId;

    /// Accumulated yaw in radians, counter-clockwise positive, not wrapped
    fn yaw(&self) -> f64;
}

/// Opens devices by id. Each device may be opened once.
pub trait DeviceBus {
    fn open_motor(&mut self, id: DeviceId) -> Result<Box<dyn MotorController>, HardwareError>;

    fn open_absolute_encoder(
        &mut self,
        id: DeviceId,
    ) -> Result<Box<dyn AbsoluteEncoder>, HardwareError>;

    fn open_heading_sensor(&mut self, id: DeviceId)
    -> Result<Box<dyn HeadingSensor>, HardwareError>;
}

/// Device-level faults
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HardwareError {
    #[error("Device {id} not found on bus")]
    NotFound { id: DeviceId },

    #[error("Device {id} is already owned by another module")]
    InUse { id: DeviceId },

    #[error("Device {id} rejected configuration: {reason}")]
    Rejected { id: DeviceId, reason: String },
}
