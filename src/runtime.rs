// 50 Hz drive loop with watchdog
// Note: if teleop stops publishing, the watchdog drops the drivetrain to Idle
// (wheels hold their angles, drive output zero) and reports cmd_stale health

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{
    CMD_TIMEOUT, DriveConfig, LOOP_HZ, TOPIC_CMD_DRIVE, TOPIC_HEALTH, TOPIC_STATE_DRIVE,
    TOPIC_VISION, VISION_TIMEOUT,
};
use crate::control::{DriveController, DriveMode};
use crate::messages::{DriveCommand, DriveTelemetry, RuntimeHealth, VisionReading};
use crate::swerve::Alliance;
use crate::swerve::Drivetrain;
use crate::swerve::sim::SimBus;

pub struct Runtime {
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
    /// Latest offset per vision sensor, with its arrival time
    vision: HashMap<String, (f64, Instant)>,
}

impl Runtime {
    pub fn new(now: Instant) -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: now,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            vision: HashMap::new(),
        }
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: DriveCommand, now: Instant) {
        if self.latest_cmd.as_ref() != Some(&cmd) {
            info!("Received command: {:?}", &cmd);
        }
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = now;
    }

    pub fn on_vision(&mut self, reading: VisionReading, now: Instant) {
        if !reading.tx_deg.is_finite() {
            warn!("Ignoring non-finite offset from {}", reading.sensor);
            return;
        }
        self.vision.insert(reading.sensor, (reading.tx_deg, now));
    }

    /// Latest offset from `sensor`, if it is fresh
    pub fn vision_offset(&self, sensor: &str, now: Instant) -> Option<f64> {
        self.vision
            .get(sensor)
            .filter(|(_, at)| now.saturating_duration_since(*at) <= VISION_TIMEOUT)
            .map(|(offset, _)| *offset)
    }

    /// Select the drive mode based on watchdog state
    pub fn compute_mode(&mut self, now: Instant) -> DriveMode {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), idling drivetrain", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            DriveMode::Idle
        } else if let Some(ref cmd) = self.latest_cmd {
            self.health = RuntimeHealth::Ok;
            DriveMode::from(cmd)
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            DriveMode::Idle
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }
}

pub async fn run(
    config: DriveConfig,
    alliance: Alliance,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing drivetrain on simulated bus...");
    let mut bus = SimBus::calibrated(&config);
    let mut drivetrain = Drivetrain::new(&config, &mut bus)?;
    for (corner, warning) in drivetrain.commissioning_warnings() {
        warn!("{} module needs recommissioning: {}", corner.label(), warning);
    }
    let mut controller = DriveController::from_config(&config);

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let sub_vision = session.declare_subscriber(TOPIC_VISION).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE_DRIVE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(Instant::now());
    let period = Duration::from_millis(1000 / LOOP_HZ);
    let mut tick = interval(period);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout, {:?} alliance",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis(),
        alliance
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_DRIVE, TOPIC_VISION);
    info!("Publishing to: {}, {}", TOPIC_STATE_DRIVE, TOPIC_HEALTH);

    loop {
        tick.tick().await;
        let now = Instant::now();

        // 1. Drain all pending commands and vision readings (non-blocking)
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd, now),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_vision.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<VisionReading>(&payload) {
                Ok(reading) => runtime.on_vision(reading, now),
                Err(e) => warn!("Failed to parse vision reading: {}", e),
            }
        }

        // 2. Integrate odometry from the last cycle
        drivetrain.update_pose();

        // 3. Select mode (includes watchdog logic) and resolve it
        let mode = runtime.compute_mode(now);
        let offset = mode
            .vision_sensor()
            .and_then(|sensor| runtime.vision_offset(sensor, now));
        let output = controller.update(&mode, drivetrain.heading(), offset);
        output.apply(&mut drivetrain);

        // 4. Publish telemetry and health
        let telemetry = DriveTelemetry::capture(&drivetrain, alliance, controller.status());
        pub_state.put(serde_json::to_string(&telemetry)?).await?;
        pub_health.put(serde_json::to_string(&runtime.health())?).await?;

        // 5. Advance the simulated devices by one period
        bus.step(period.as_secs_f64(), drivetrain.measured_chassis_speeds().omega);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teleop() -> DriveCommand {
        DriveCommand::Teleop {
            vx: 1.0,
            vy: 0.0,
            omega_deg: 0.0,
            field_relative: true,
            open_loop: true,
        }
    }

    #[test]
    fn test_starts_stale() {
        let t0 = Instant::now();
        let mut runtime = Runtime::new(t0);
        assert_eq!(runtime.compute_mode(t0), DriveMode::Idle);
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_fresh_command_drives() {
        let t0 = Instant::now();
        let mut runtime = Runtime::new(t0);
        runtime.on_command(teleop(), t0);

        let mode = runtime.compute_mode(t0 + Duration::from_millis(100));
        assert_eq!(mode, DriveMode::from(&teleop()));
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_watchdog_idles_stale_command() {
        let t0 = Instant::now();
        let mut runtime = Runtime::new(t0);
        runtime.on_command(teleop(), t0);

        let mode = runtime.compute_mode(t0 + CMD_TIMEOUT + Duration::from_millis(1));
        assert_eq!(mode, DriveMode::Idle);
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);

        // A new command recovers
        let t1 = t0 + Duration::from_secs(1);
        runtime.on_command(teleop(), t1);
        assert_eq!(runtime.compute_mode(t1), DriveMode::from(&teleop()));
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_vision_staleness() {
        let t0 = Instant::now();
        let mut runtime = Runtime::new(t0);
        runtime.on_vision(
            VisionReading {
                sensor: "limelight".to_string(),
                tx_deg: 3.5,
            },
            t0,
        );

        assert_eq!(runtime.vision_offset("limelight", t0), Some(3.5));
        assert_eq!(runtime.vision_offset("other", t0), None);
        assert_eq!(
            runtime.vision_offset("limelight", t0 + VISION_TIMEOUT + Duration::from_millis(1)),
            None
        );
    }

    #[test]
    fn test_vision_rejects_non_finite() {
        let t0 = Instant::now();
        let mut runtime = Runtime::new(t0);
        runtime.on_vision(
            VisionReading {
                sensor: "limelight".to_string(),
                tx_deg: f64::NAN,
            },
            t0,
        );
        assert_eq!(runtime.vision_offset("limelight", t0), None);
    }

    #[test]
    fn test_stale_lock_reading_does_not_turn() {
        let t0 = Instant::now();
        let config = DriveConfig::default();
        let mut runtime = Runtime::new(t0);
        let mut controller = DriveController::from_config(&config);

        runtime.on_vision(
            VisionReading {
                sensor: "limelight".to_string(),
                tx_deg: 10.0,
            },
            t0,
        );
        let later = t0 + Duration::from_millis(240);
        runtime.on_command(
            DriveCommand::TargetLock {
                vx: 0.0,
                vy: 0.0,
                sensor: "limelight".to_string(),
                field_relative: true,
                open_loop: true,
            },
            later,
        );

        let mode = runtime.compute_mode(later);
        let offset = mode.vision_sensor().and_then(|s| runtime.vision_offset(s, later));
        assert_eq!(offset, None);
        let output = controller.update(&mode, crate::swerve::WrappedAngle::ZERO, offset);
        assert_eq!(output.omega(), 0.0);
    }

    #[test]
    fn test_closed_loop_cycle_on_sim() {
        let config = DriveConfig::default();
        let mut bus = SimBus::calibrated(&config);
        let mut drivetrain = Drivetrain::new(&config, &mut bus).expect("drivetrain should initialize");
        let mut controller = DriveController::from_config(&config);
        let t0 = Instant::now();
        let mut runtime = Runtime::new(t0);
        runtime.on_command(teleop(), t0);

        let dt = config.loop_period_s();
        for _ in 0..50 {
            drivetrain.update_pose();
            let mode = runtime.compute_mode(t0);
            let output = controller.update(&mode, drivetrain.heading(), None);
            output.apply(&mut drivetrain);
            bus.step(dt, drivetrain.measured_chassis_speeds().omega);
        }
        drivetrain.update_pose();

        // 1 m/s forward for one second
        let pose = drivetrain.pose();
        assert!((pose.x - 1.0).abs() < 0.05, "x {}", pose.x);
        assert!(pose.y.abs() < 1e-6, "y {}", pose.y);
    }
}
