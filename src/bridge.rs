// SPDX-License-Identifier: GPL-3.0-only

//! Process wiring
//!
//! Opens the sink before anything else so a missing or misconfigured device
//! fails without spawning threads, then starts presence monitoring and runs
//! one capture session.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backends::backup::V4l2BackupSource;
use crate::backends::sensor::{SensorProvider, V4l2SensorProvider};
use crate::backends::sink::{FrameSink, LoopbackSink};
use crate::config::Config;
use crate::constants::{OUTPUT_HEIGHT, OUTPUT_WIDTH};
use crate::errors::{AppError, AppResult};
use crate::media::{self, Yuv420Buffer};
use crate::presence;
use crate::session::{CaptureMachine, MachineSettings, SessionGate, SessionOutcome, SinkWriter};
use crate::watchdog::{SessionControl, ShutdownWatchdog};

/// Nodes discovery must never open
fn reserved_paths(config: &Config) -> Vec<&Path> {
    std::iter::once(config.sink_path.as_path())
        .chain(config.backup_path.as_deref())
        .collect()
}

/// Open the sink and show a blank frame until capture starts
pub fn open_sink(config: &Config) -> AppResult<LoopbackSink> {
    let mut sink = LoopbackSink::open(&config.sink_path, OUTPUT_WIDTH, OUTPUT_HEIGHT)?;
    let blank = Yuv420Buffer::new(OUTPUT_WIDTH, OUTPUT_HEIGHT, config.blank_chroma);
    match sink.write_frame(blank.as_bytes()) {
        Ok(outcome) => debug!(outcome = ?outcome, "Initial blank frame written"),
        Err(e) => warn!(error = %e, "Failed to write initial blank frame"),
    }
    Ok(sink)
}

fn install_signal_handler(control: SessionControl) -> AppResult<()> {
    ctrlc::set_handler(move || control.request_shutdown("signal received"))
        .map_err(|e| AppError::Other(format!("Failed to install signal handler: {}", e)))
}

/// Run the bridge until the session ends
pub fn run(config: Config) -> AppResult<SessionOutcome> {
    config.validate()?;
    let sink = open_sink(&config)?;

    let monitor = presence::monitor_for(
        config.presence,
        &config.sink_path,
        config.timing.presence_poll_interval(),
    )?;

    let gate = Arc::new(SessionGate::new());
    let watchdog = Arc::new(ShutdownWatchdog::new(config.timing.watchdog_grace()));
    let control = SessionControl::new(gate, watchdog);

    install_signal_handler(control.clone())?;
    let monitor_name = monitor.name();
    presence::spawn_monitor(monitor, Arc::new(control.clone()))?;
    info!(
        sink = %config.sink_path.display(),
        backup = ?config.backup_path,
        monitor = monitor_name,
        "Waiting for a consumer"
    );

    let provider = V4l2SensorProvider::new(config.sensor_path.clone(), &reserved_paths(&config));
    let backup = config.backup_path.clone().map(|path| {
        V4l2BackupSource::new(
            path,
            config.timing.backup_buffer_count,
            config.timing.backup_wait(),
        )
    });
    let converter = media::sensor_converter(config.hw_accel);
    debug!(converter = converter.name(), "Frame converter selected");

    let writer = SinkWriter::new(sink, config.timing.idle_timeout());
    let mut machine = CaptureMachine::new(
        provider,
        backup,
        writer,
        converter,
        control,
        MachineSettings::from_config(&config),
    );
    Ok(machine.run())
}

/// Sensors visible to this process, for `--list-sensors`
pub fn list_sensors(config: &Config) -> AppResult<Vec<(String, String)>> {
    let mut provider =
        V4l2SensorProvider::new(config.sensor_path.clone(), &reserved_paths(config));
    Ok(provider
        .enumerate()?
        .into_iter()
        .map(|s| (s.name, s.id))
        .collect())
}
