use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::DriveConfig;
use swerve_zenoh_runtime::swerve::Alliance;

/// Swerve drive runtime: zenoh commands in, module outputs and telemetry out
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Drive configuration file (JSON); commissioned defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Alliance used for the alliance-relative pose
    #[arg(long, value_enum, default_value_t = Alliance::Blue)]
    alliance: Alliance,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DriveConfig::load(path),
        None => Ok(DriveConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = swerve_zenoh_runtime::runtime::run(config, args.alliance).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
