// Simulated device bus
//
// Ideal devices: steer position setpoints are reached immediately, drive
// velocity follows the command, and positions integrate on `step`. Device
// state lives behind shared handles so the owner of the bus can observe and
// poke devices after the drivetrain has taken ownership of them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::angle::WrappedAngle;
use super::hardware::{
    AbsoluteEncoder, AbsoluteEncoderConfig, DeviceBus, DeviceId, HardwareError, HeadingSensor,
    MotorConfig, MotorController, MotorOutput, NOMINAL_VOLTAGE,
};
use super::kinematics::Corner;
use crate::config::DriveConfig;

/// Free speed of a brushless motor, in RPM
pub const DEFAULT_FREE_RPM: f64 = 6784.0;

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct MotorState {
    config: Option<MotorConfig>,
    position: f64,
    velocity: f64,
    output: Option<MotorOutput>,
    applied: f64,
    free_rpm: f64,
    /// Encoder drops seeding/zeroing writes
    stuck_encoder: bool,
}

impl MotorState {
    fn new(free_rpm: f64) -> Self {
        Self {
            config: None,
            position: 0.0,
            velocity: 0.0,
            output: None,
            applied: 0.0,
            free_rpm,
            stuck_encoder: false,
        }
    }

    /// Free speed in configured velocity units
    fn free_speed(&self) -> f64 {
        let factor = self.config.map(|c| c.velocity_factor).unwrap_or(1.0);
        self.free_rpm * factor
    }

    fn apply(&mut self, output: MotorOutput) {
        match output {
            MotorOutput::DutyCycle(duty) => {
                let duty = duty.clamp(-1.0, 1.0);
                self.applied = duty;
                self.velocity = duty * self.free_speed();
            }
            MotorOutput::Voltage(volts) => {
                let duty = (volts / NOMINAL_VOLTAGE).clamp(-1.0, 1.0);
                self.applied = duty;
                self.velocity = duty * self.free_speed();
            }
            MotorOutput::Position(setpoint) => {
                self.applied = 0.0;
                self.velocity = 0.0;
                self.position = setpoint;
            }
            MotorOutput::Velocity { setpoint, .. } => {
                let free = self.free_speed();
                self.applied = if free > 0.0 { (setpoint / free).clamp(-1.0, 1.0) } else { 0.0 };
                self.velocity = setpoint;
            }
        }
        self.output = Some(output);
    }
}

/// Handle to a simulated motor controller
#[derive(Debug, Clone)]
pub struct SimMotor {
    id: DeviceId,
    state: Arc<Mutex<MotorState>>,
}

impl SimMotor {
    /// Last output request, if any
    pub fn last_output(&self) -> Option<MotorOutput> {
        lock(&self.state).output
    }

    /// Configuration the motor accepted, if any
    pub fn config(&self) -> Option<MotorConfig> {
        lock(&self.state).config
    }

    /// Move the encoder as if the mechanism had been pushed
    pub fn set_position(&self, position: f64) {
        lock(&self.state).position = position;
    }
}

impl MotorController for SimMotor {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn configure(&mut self, config: &MotorConfig) -> Result<(), HardwareError> {
        lock(&self.state).config = Some(*config);
        Ok(())
    }

    fn position(&self) -> f64 {
        lock(&self.state).position
    }

    fn velocity(&self) -> f64 {
        lock(&self.state).velocity
    }

    fn set_encoder_position(&mut self, position: f64) {
        let mut state = lock(&self.state);
        if !state.stuck_encoder {
            state.position = position;
        }
    }

    fn set_output(&mut self, output: MotorOutput) {
        lock(&self.state).apply(output);
    }

    fn applied_output(&self) -> f64 {
        lock(&self.state).applied
    }
}

/// Handle to a simulated absolute encoder
#[derive(Debug, Clone)]
pub struct SimAbsoluteEncoder {
    id: DeviceId,
    rotations: Arc<Mutex<f64>>,
}

impl SimAbsoluteEncoder {
    pub fn set_rotations(&self, rotations: f64) {
        *lock(&self.rotations) = rotations;
    }
}

impl AbsoluteEncoder for SimAbsoluteEncoder {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn configure(&mut self, _config: &AbsoluteEncoderConfig) -> Result<(), HardwareError> {
        Ok(())
    }

    fn absolute_rotations(&self) -> f64 {
        *lock(&self.rotations)
    }
}

/// Handle to a simulated heading sensor
#[derive(Debug, Clone)]
pub struct SimHeadingSensor {
    id: DeviceId,
    yaw: Arc<Mutex<f64>>,
}

impl SimHeadingSensor {
    pub fn set_yaw(&self, radians: f64) {
        *lock(&self.yaw) = radians;
    }
}

impl HeadingSensor for SimHeadingSensor {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn yaw(&self) -> f64 {
        *lock(&self.yaw)
    }
}

/// Fault-injectable wrapper that refuses configuration
struct RejectingMotor(SimMotor);

impl MotorController for RejectingMotor {
    fn id(&self) -> DeviceId {
        self.0.id
    }

    fn configure(&mut self, _config: &MotorConfig) -> Result<(), HardwareError> {
        Err(HardwareError::Rejected {
            id: self.0.id,
            reason: "configuration write not acknowledged".to_string(),
        })
    }

    fn position(&self) -> f64 {
        self.0.position()
    }

    fn velocity(&self) -> f64 {
        self.0.velocity()
    }

    fn set_encoder_position(&mut self, position: f64) {
        self.0.set_encoder_position(position);
    }

    fn set_output(&mut self, output: MotorOutput) {
        self.0.set_output(output);
    }

    fn applied_output(&self) -> f64 {
        self.0.applied_output()
    }
}

/// Simulated bus. Every id exists unless marked missing.
pub struct SimBus {
    motors: HashMap<DeviceId, SimMotor>,
    encoders: HashMap<DeviceId, SimAbsoluteEncoder>,
    gyros: HashMap<DeviceId, SimHeadingSensor>,
    opened: HashSet<DeviceId>,
    missing: HashSet<DeviceId>,
    rejecting: HashSet<DeviceId>,
    /// Free speed given to motors created from now on
    free_rpm: f64,
}

impl Default for SimBus {
    fn default() -> Self {
        Self {
            motors: HashMap::new(),
            encoders: HashMap::new(),
            gyros: HashMap::new(),
            opened: HashSet::new(),
            missing: HashSet::new(),
            rejecting: HashSet::new(),
            free_rpm: DEFAULT_FREE_RPM,
        }
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose absolute encoders read each module's calibration offset,
    /// so every wheel starts pointing straight ahead
    pub fn calibrated(config: &DriveConfig) -> Self {
        let mut bus = Self::new();
        bus.free_rpm = config.motor_free_rpm;
        for corner in Corner::ALL {
            let module = config.module(corner);
            let offset = WrappedAngle::from_degrees(module.offset_deg);
            bus.absolute_encoder(module.absolute_encoder_id)
                .set_rotations(offset.radians() / std::f64::consts::TAU);
        }
        bus
    }

    /// Handle to a motor, creating it if it has not been touched yet
    pub fn motor(&mut self, id: DeviceId) -> SimMotor {
        let free_rpm = self.free_rpm;
        self.motors
            .entry(id)
            .or_insert_with(|| SimMotor {
                id,
                state: Arc::new(Mutex::new(MotorState::new(free_rpm))),
            })
            .clone()
    }

    pub fn absolute_encoder(&mut self, id: DeviceId) -> SimAbsoluteEncoder {
        self.encoders
            .entry(id)
            .or_insert_with(|| SimAbsoluteEncoder {
                id,
                rotations: Arc::new(Mutex::new(0.0)),
            })
            .clone()
    }

    pub fn heading_sensor(&mut self, id: DeviceId) -> SimHeadingSensor {
        self.gyros
            .entry(id)
            .or_insert_with(|| SimHeadingSensor {
                id,
                yaw: Arc::new(Mutex::new(0.0)),
            })
            .clone()
    }

    /// Make a device absent from the bus
    pub fn remove_device(&mut self, id: DeviceId) {
        self.missing.insert(id);
    }

    /// Make a motor's encoder ignore position writes (a controller that
    /// drops the seed)
    pub fn stick_encoder(&mut self, id: DeviceId) {
        lock(&self.motor(id).state).stuck_encoder = true;
    }

    /// Make a motor refuse its startup configuration
    pub fn reject_configuration(&mut self, id: DeviceId) {
        self.rejecting.insert(id);
    }

    /// Advance time: integrate motor positions and the heading sensor
    pub fn step(&mut self, dt: f64, yaw_rate: f64) {
        for motor in self.motors.values() {
            let mut state = lock(&motor.state);
            if !matches!(state.output, Some(MotorOutput::Position(_))) {
                state.position += state.velocity * dt;
            }
        }
        for gyro in self.gyros.values() {
            *lock(&gyro.yaw) += yaw_rate * dt;
        }
    }

    fn claim(&mut self, id: DeviceId) -> Result<(), HardwareError> {
        if self.missing.contains(&id) {
            return Err(HardwareError::NotFound { id });
        }
        if !self.opened.insert(id) {
            return Err(HardwareError::InUse { id });
        }
        debug!("Sim device {} opened", id);
        Ok(())
    }
}

impl DeviceBus for SimBus {
    fn open_motor(&mut self, id: DeviceId) -> Result<Box<dyn MotorController>, HardwareError> {
        self.claim(id)?;
        let motor = self.motor(id);
        if self.rejecting.contains(&id) {
            Ok(Box::new(RejectingMotor(motor)))
        } else {
            Ok(Box::new(motor))
        }
    }

    fn open_absolute_encoder(
        &mut self,
        id: DeviceId,
    ) -> Result<Box<dyn AbsoluteEncoder>, HardwareError> {
        self.claim(id)?;
        Ok(Box::new(self.absolute_encoder(id)))
    }

    fn open_heading_sensor(
        &mut self,
        id: DeviceId,
    ) -> Result<Box<dyn HeadingSensor>, HardwareError> {
        self.claim(id)?;
        Ok(Box::new(self.heading_sensor(id)))
    }
}
