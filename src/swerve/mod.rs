// Swerve drive core for a four-module base
//
// Provides:
// - Wrapped/continuous angle domains
// - Module state optimization (shortest steer travel)
// - Swerve inverse/forward kinematics and desaturation
// - Per-module control with absolute/relative encoder fusion
// - Drivetrain coordination and wheel odometry
// - Hardware traits and a simulated bus

pub mod angle;
mod drivetrain;
pub mod hardware;
pub mod kinematics;
mod module;
pub mod odometry;
pub mod optimizer;
pub mod sim;

pub use angle::{ContinuousAngle, WrappedAngle};
pub use drivetrain::Drivetrain;
pub use kinematics::{ChassisSpeeds, Corner, ModuleDesiredState, ModulePosition, SwerveKinematics};
pub use module::{
    ControlMode, ModuleConstants, ModuleMeasuredState, SensorDiscontinuity, SwerveError,
    SwerveModule,
};
pub use odometry::{Alliance, Pose};
