// Drivetrain coordinator for the four-module base
//
// Owns the modules and the heading sensor, turns chassis commands into
// module states, and keeps the odometry pose. Nothing else writes to the
// modules or the pose.

use tracing::{debug, info};

use super::angle::WrappedAngle;
use super::hardware::{DeviceBus, HeadingSensor};
use super::kinematics::{
    desaturate, ChassisSpeeds, Corner, ModuleDesiredState, ModulePosition, SwerveKinematics,
    MODULE_COUNT,
};
use super::module::{
    ControlMode, ModuleConstants, ModuleMeasuredState, SensorDiscontinuity, SwerveError,
    SwerveModule,
};
use super::odometry::{Alliance, Odometry, Pose};
use crate::config::{DriveConfig, FieldConfig};

pub struct Drivetrain {
    modules: [SwerveModule; MODULE_COUNT],
    heading_sensor: Box<dyn HeadingSensor>,
    kinematics: SwerveKinematics,
    odometry: Odometry,
    /// Sensor yaw that corresponds to field heading zero
    heading_offset: f64,
    max_module_speed: f64,
    /// Wheel speed at full duty cycle
    free_speed: f64,
    field: FieldConfig,
    desaturation_count: u64,
}

impl Drivetrain {
    /// Open and configure all devices. The pose starts at the origin with the
    /// current sensor yaw as heading zero.
    pub fn new(config: &DriveConfig, bus: &mut dyn DeviceBus) -> Result<Self, SwerveError> {
        let constants = ModuleConstants::from_config(config);

        let modules = [
            SwerveModule::initialize(Corner::FrontLeft, &config.front_left, bus, &constants)?,
            SwerveModule::initialize(Corner::FrontRight, &config.front_right, bus, &constants)?,
            SwerveModule::initialize(Corner::BackLeft, &config.back_left, bus, &constants)?,
            SwerveModule::initialize(Corner::BackRight, &config.back_right, bus, &constants)?,
        ];

        let heading_sensor = bus
            .open_heading_sensor(config.heading_sensor_id)
            .map_err(|source| SwerveError::Configuration {
                device: format!("heading sensor {}", config.heading_sensor_id),
                source,
            })?;

        let heading_offset = heading_sensor.yaw();
        let positions = std::array::from_fn(|i| modules[i].position());

        info!(
            "Drivetrain ready: {:.3} m x {:.3} m, max module speed {} m/s",
            config.track_width_m, config.wheel_base_m, config.max_module_speed_mps
        );

        Ok(Self {
            modules,
            heading_sensor,
            kinematics: config.kinematics(),
            odometry: Odometry::new(Pose::default(), positions, 0.0),
            heading_offset,
            max_module_speed: config.max_module_speed_mps,
            free_speed: config.free_speed_mps(),
            field: config.field,
            desaturation_count: 0,
        })
    }

    /// Drive the base.
    ///
    /// # Arguments
    /// * `vx` - Forward velocity in m/s
    /// * `vy` - Leftward velocity in m/s
    /// * `omega` - Counter-clockwise rotation in rad/s
    /// * `field_relative` - Interpret (vx, vy) in the field frame
    /// * `open_loop` - Duty-cycle drive instead of closed-loop velocity
    pub fn drive_chassis(&mut self, vx: f64, vy: f64, omega: f64, field_relative: bool, open_loop: bool) {
        self.drive(
            ChassisSpeeds::new(vx, vy, omega),
            field_relative,
            ControlMode::from_open_loop(open_loop),
        );
    }

    pub fn drive(&mut self, speeds: ChassisSpeeds, field_relative: bool, mode: ControlMode) {
        // A zero command must not snap the wheels back to zero angle
        if speeds.is_zero() {
            for module in &mut self.modules {
                let hold = ModuleDesiredState::new(module.steer_angle().wrapped(), 0.0);
                module.apply_desired_state(hold, mode);
            }
            return;
        }

        let robot = if field_relative {
            ChassisSpeeds::from_field_relative(speeds, self.heading())
        } else {
            speeds
        };

        let states = self.kinematics.to_module_states(robot);
        self.set_module_states(states, mode);
    }

    /// Desaturate and dispatch one state per module (FL, FR, BL, BR).
    ///
    /// Open loop cannot exceed full duty cycle, so its ceiling is the lower
    /// of the configured maximum and the free speed.
    pub fn set_module_states(&mut self, mut states: [ModuleDesiredState; MODULE_COUNT], mode: ControlMode) {
        let ceiling = match mode {
            ControlMode::OpenLoop => self.max_module_speed.min(self.free_speed),
            ControlMode::ClosedLoop => self.max_module_speed,
        };
        if desaturate(&mut states, ceiling) {
            self.desaturation_count += 1;
            debug!(
                "Module speeds desaturated to {:.3} m/s ({} total)",
                ceiling, self.desaturation_count
            );
        }

        for (module, state) in self.modules.iter_mut().zip(states) {
            module.apply_desired_state(state, mode);
        }
    }

    /// Point every wheel along its own offset from center, zero speed
    pub fn lock_wheels_in_x(&mut self) {
        let offsets = *self.kinematics.module_offsets();
        for (module, offset) in self.modules.iter_mut().zip(offsets) {
            let state = ModuleDesiredState::new(offset.angle(), 0.0);
            module.apply_desired_state(state, ControlMode::OpenLoop);
        }
    }

    pub fn stop(&mut self) {
        for module in &mut self.modules {
            module.stop();
        }
    }

    /// Integrate module travel since the previous call into the pose
    pub fn update_pose(&mut self) -> Pose {
        let positions = self.module_positions();
        let heading = self.field_heading();
        self.odometry.update(&self.kinematics, heading, positions)
    }

    /// Teleport the pose and make `pose.heading` the current heading
    pub fn reset_heading_and_pose(&mut self, pose: Pose) {
        info!(
            "Resetting pose to ({:.2}, {:.2}, {:.1}°)",
            pose.x,
            pose.y,
            pose.heading.degrees()
        );
        self.heading_offset = self.heading_sensor.yaw() - pose.heading.radians();
        let positions = self.module_positions();
        self.odometry.reset(pose, positions, pose.heading.radians());
    }

    /// Current direction becomes heading zero; translation is kept
    pub fn reset_heading(&mut self) {
        let pose = self.pose();
        self.reset_heading_and_pose(Pose::new(pose.x, pose.y, WrappedAngle::ZERO));
    }

    pub fn zero_drive_distances(&mut self) {
        for module in &mut self.modules {
            module.zero_drive_distance();
        }
        // Re-baseline so the zeroing is not integrated as travel
        let (pose, positions, heading) = (self.pose(), self.module_positions(), self.field_heading());
        self.odometry.reset(pose, positions, heading);
    }

    pub fn run_voltage_characterization(&mut self, volts: f64) {
        for module in &mut self.modules {
            module.run_voltage_characterization(volts);
        }
    }

    /// Unwrapped field heading in radians
    fn field_heading(&self) -> f64 {
        self.heading_sensor.yaw() - self.heading_offset
    }

    pub fn heading(&self) -> WrappedAngle {
        WrappedAngle::from_radians(self.field_heading())
    }

    pub fn heading_degrees(&self) -> f64 {
        self.heading().degrees()
    }

    pub fn pose(&self) -> Pose {
        self.odometry.pose()
    }

    /// Pose as seen from the given alliance's side of the field
    pub fn alliance_pose(&self, alliance: Alliance) -> Pose {
        alliance.relative_pose(&self.pose(), &self.field)
    }

    pub fn measured_states(&self) -> [ModuleMeasuredState; MODULE_COUNT] {
        std::array::from_fn(|i| self.modules[i].measured_state())
    }

    /// Wrapped angle and velocity per module
    pub fn module_states(&self) -> [ModuleDesiredState; MODULE_COUNT] {
        std::array::from_fn(|i| self.modules[i].state())
    }

    pub fn module_positions(&self) -> [ModulePosition; MODULE_COUNT] {
        std::array::from_fn(|i| self.modules[i].position())
    }

    pub fn absolute_angles(&self) -> [WrappedAngle; MODULE_COUNT] {
        std::array::from_fn(|i| self.modules[i].raw_absolute_angle())
    }

    pub fn calibrated_absolute_angles(&self) -> [WrappedAngle; MODULE_COUNT] {
        std::array::from_fn(|i| self.modules[i].calibrated_absolute_angle())
    }

    /// Chassis motion implied by the measured module states
    pub fn measured_chassis_speeds(&self) -> ChassisSpeeds {
        self.kinematics.to_chassis_speeds(&self.module_states())
    }

    /// Mean wheel speed magnitude in m/s
    pub fn average_drive_velocity(&self) -> f64 {
        self.modules.iter().map(|m| m.state().speed.abs()).sum::<f64>() / MODULE_COUNT as f64
    }

    /// Mean applied drive voltage
    pub fn average_drive_voltage(&self) -> f64 {
        self.modules.iter().map(|m| m.drive_voltage()).sum::<f64>() / MODULE_COUNT as f64
    }

    /// Number of cycles in which module speeds had to be scaled down
    pub fn desaturation_count(&self) -> u64 {
        self.desaturation_count
    }

    pub fn kinematics(&self) -> &SwerveKinematics {
        &self.kinematics
    }

    pub fn commissioning_warnings(&self) -> Vec<(Corner, SensorDiscontinuity)> {
        self.modules
            .iter()
            .filter_map(|m| m.commissioning_warning().map(|w| (m.corner(), w.clone())))
            .collect()
    }
}
