// SPDX-License-Identifier: GPL-3.0-only

//! Command line interface
//!
//! Arguments override the configuration file, which overrides the defaults.

use clap::Parser;
use sensor_loopback::Config;
use sensor_loopback::config::{PresenceStrategy, StreamKind};
use sensor_loopback::errors::ConfigError;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sensor-loopback")]
#[command(about = "Expose a depth sensor's IR or color stream as a v4l2loopback camera")]
#[command(version = env!("GIT_VERSION"))]
pub struct Cli {
    /// v4l2loopback device to write frames to (e.g. /dev/video10)
    #[arg(required_unless_present = "list_sensors")]
    pub sink: Option<PathBuf>,

    /// Capture device used when the sensor is missing or stops responding
    pub backup: Option<PathBuf>,

    /// Convert sensor frames on the GPU
    #[arg(long)]
    pub hw_accel: bool,

    /// Sensor stream that feeds the sink
    #[arg(long, value_enum)]
    pub stream: Option<StreamKind>,

    /// Sensor video node to use instead of discovery
    #[arg(long, value_name = "PATH")]
    pub sensor: Option<PathBuf>,

    /// How consumers of the sink are detected
    #[arg(long, value_enum)]
    pub presence: Option<PresenceStrategy>,

    /// Configuration file (default: ~/.config/sensor-loopback/config.json)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Seconds without a delivered frame before capture stops
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// List discovered sensors and exit
    #[arg(long)]
    pub list_sensors: bool,
}

impl Cli {
    /// Load the configuration file and apply the arguments on top
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(self, config: &mut Config) {
        if let Some(sink) = self.sink {
            config.sink_path = sink;
        }
        if let Some(backup) = self.backup {
            config.backup_path = Some(backup);
        }
        if self.hw_accel {
            config.hw_accel = true;
        }
        if let Some(stream) = self.stream {
            config.stream = stream;
        }
        if let Some(sensor) = self.sensor {
            config.sensor_path = Some(sensor);
        }
        if let Some(presence) = self.presence {
            config.presence = presence;
        }
        if let Some(secs) = self.idle_timeout {
            config.timing.idle_timeout_secs = secs;
        }
    }
}

/// Print discovered sensors
pub fn list_sensors(config: &Config) -> Result<(), sensor_loopback::errors::AppError> {
    let sensors = sensor_loopback::bridge::list_sensors(config)?;
    if sensors.is_empty() {
        println!("No sensors found.");
        return Ok(());
    }

    println!("Available sensors:");
    for (index, (name, id)) in sensors.iter().enumerate() {
        println!("  [{}] {} ({})", index, name, id);
    }
    Ok(())
}
