// Keyboard teleop: WASD move, Z/X rotate, R/F speed, 1/2/3 hold heading,
// P target lock, L lock wheels, H idle, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use swerve_zenoh_runtime::config::{DEFAULT_VISION_SENSOR, TOPIC_CMD_DRIVE};
use swerve_zenoh_runtime::messages::DriveCommand;

const SPEEDS: [f64; 3] = [0.5, 1.5, 3.0]; // m/s
const THETA_SPEEDS: [f64; 3] = [45.0, 90.0, 180.0]; // deg/s
const HEADING_PRESETS: [f64; 3] = [170.0, 120.0, 90.0]; // deg
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocities after this much time with no input

/// What the operator has selected; translation is layered on top each cycle
#[derive(Debug, Clone, Copy, PartialEq)]
enum Selection {
    Idle,
    Drive,
    HoldHeading(f64),
    TargetLock,
    LockX,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_DRIVE).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, 1/2/3=hold heading, P=target lock, L=lock X, H=idle, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut selection = Selection::Drive;

    // Persistent velocity state
    let mut vx = 0.0;
    let mut vy = 0.0;
    let mut omega_deg = 0.0;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Movement - update velocity and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        vx = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        vx = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        vy = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        vy = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Rotation hands control back to the driver
                    KeyCode::Char('z') if pressed => {
                        omega_deg = THETA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                        select(&mut selection, Selection::Drive);
                    }
                    KeyCode::Char('x') if pressed => {
                        omega_deg = -THETA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                        select(&mut selection, Selection::Drive);
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Assisted modes
                    KeyCode::Char(c @ '1'..='3') if pressed => {
                        let preset = HEADING_PRESETS[c as usize - '1' as usize];
                        select(&mut selection, Selection::HoldHeading(preset));
                    }
                    KeyCode::Char('p') if pressed => select(&mut selection, Selection::TargetLock),
                    KeyCode::Char('l') if pressed => select(&mut selection, Selection::LockX),
                    KeyCode::Char('h') | KeyCode::Char('0') if pressed => {
                        select(&mut selection, Selection::Idle)
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset velocities if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            vx = 0.0;
            vy = 0.0;
            omega_deg = 0.0;
        }

        // Any translation leaves idle/lock
        if (vx != 0.0 || vy != 0.0)
            && matches!(selection, Selection::Idle | Selection::LockX)
        {
            select(&mut selection, Selection::Drive);
        }

        // Always publish at ~50Hz
        let cmd = build_command(selection, vx, vy, omega_deg);
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn build_command(selection: Selection, vx: f64, vy: f64, omega_deg: f64) -> DriveCommand {
    match selection {
        Selection::Idle => DriveCommand::Idle,
        Selection::Drive => DriveCommand::Teleop {
            vx,
            vy,
            omega_deg,
            field_relative: true,
            open_loop: true,
        },
        Selection::HoldHeading(heading_deg) => DriveCommand::HoldHeading {
            vx,
            vy,
            heading_deg,
            field_relative: true,
            open_loop: true,
        },
        Selection::TargetLock => DriveCommand::TargetLock {
            vx,
            vy,
            sensor: DEFAULT_VISION_SENSOR.to_string(),
            field_relative: true,
            open_loop: true,
        },
        Selection::LockX => DriveCommand::LockX,
    }
}

fn select(selection: &mut Selection, next: Selection) {
    if *selection != next {
        info!("Mode: {:?}", next);
        *selection = next;
    }
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
