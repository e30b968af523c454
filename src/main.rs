// SPDX-License-Identifier: GPL-3.0-only

use clap::Parser;
use sensor_loopback::bridge;
use sensor_loopback::errors::{AppError, EXIT_CLEAN};
use std::process::ExitCode;
use tracing::{error, info};

mod cli;

use cli::Cli;

fn main() -> ExitCode {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=sensor_loopback=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let list_only = cli.list_sensors;

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => return fail(e.into()),
    };

    if list_only {
        return match cli::list_sensors(&config) {
            Ok(()) => ExitCode::from(EXIT_CLEAN),
            Err(e) => fail(e),
        };
    }

    info!(version = env!("GIT_VERSION"), "Starting sensor-loopback");
    match bridge::run(config) {
        Ok(outcome) => {
            info!(outcome = ?outcome, "Exiting");
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => fail(e),
    }
}

fn fail(e: AppError) -> ExitCode {
    error!(error = %e, "Fatal error");
    ExitCode::from(e.exit_code())
}
