// SPDX-License-Identifier: GPL-3.0-only

//! Capture state machine
//!
//! ```text
//! Idle -> WaitingForConsumer -> StreamingPrimary -> Draining -> Stopped
//!                  |                   |                ^
//!                  |                   v (sensor lost)  |
//!                  +------------> StreamingBackup ------+
//! ```
//!
//! The sensor is only powered while a consumer is present. Every session ends
//! in Draining, which writes a blank frame, releases the hardware under the
//! shutdown watchdog, and marks cleanup complete.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{CaptureState, GateEvent, SinkWriter};
use crate::backends::backup::{BackupContext, BackupExit, BackupSource};
use crate::backends::sensor::{SensorDevice, SensorProvider, StreamSelection};
use crate::backends::sink::FrameSink;
use crate::config::Config;
use crate::constants::{OUTPUT_HEIGHT, OUTPUT_WIDTH};
use crate::errors::{AppError, EXIT_CLEAN, PresenceError, SensorError, SensorResult};
use crate::media::{FrameConverter, Yuv420Buffer};
use crate::watchdog::SessionControl;

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// A stop was requested (signal or last consumer gone)
    Stopped,
    /// Nothing reached a reader within the idle threshold
    Idle,
    /// Capture failed with no usable fallback
    Failed(AppError),
}

impl SessionOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Stopped | Self::Idle => EXIT_CLEAN,
            Self::Failed(e) => e.exit_code(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub streams: StreamSelection,
    /// Bound on each frame wait, so stop requests are seen promptly
    pub frame_timeout: Duration,
    /// Consecutive misses that count as losing the sensor
    pub max_missed_frames: u32,
    pub blank_chroma: u8,
    pub output_width: u32,
    pub output_height: u32,
}

impl MachineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            streams: config.stream.into(),
            frame_timeout: config.frame_timeout(),
            max_missed_frames: config.timing.max_missed_frames,
            blank_chroma: config.blank_chroma,
            output_width: OUTPUT_WIDTH,
            output_height: OUTPUT_HEIGHT,
        }
    }
}

enum PrimaryExit {
    Finished(SessionOutcome),
    SensorLost,
}

pub struct CaptureMachine<P: SensorProvider, S: FrameSink, B: BackupSource> {
    provider: P,
    backup: Option<B>,
    writer: SinkWriter<S>,
    converter: Box<dyn FrameConverter>,
    output: Yuv420Buffer,
    control: SessionControl,
    settings: MachineSettings,
    state: CaptureState,
    history: Vec<CaptureState>,
}

impl<P: SensorProvider, S: FrameSink, B: BackupSource> CaptureMachine<P, S, B> {
    pub fn new(
        provider: P,
        backup: Option<B>,
        writer: SinkWriter<S>,
        converter: Box<dyn FrameConverter>,
        control: SessionControl,
        settings: MachineSettings,
    ) -> Self {
        let output = Yuv420Buffer::new(
            settings.output_width,
            settings.output_height,
            settings.blank_chroma,
        );
        Self {
            provider,
            backup,
            writer,
            converter,
            output,
            control,
            settings,
            state: CaptureState::Idle,
            history: vec![CaptureState::Idle],
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[CaptureState] {
        &self.history
    }

    pub fn writer(&self) -> &SinkWriter<S> {
        &self.writer
    }

    fn enter(&mut self, state: CaptureState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "Capture state changed");
            self.state = state;
            self.history.push(state);
        }
    }

    /// Run one session to completion
    pub fn run(&mut self) -> SessionOutcome {
        self.enter(CaptureState::WaitingForConsumer);
        if self.control.gate().wait_for_consumer() == GateEvent::StopRequested {
            info!("Stop requested before any consumer arrived");
            return self.drain(None, SessionOutcome::Stopped);
        }
        self.writer.reset_idle();

        let (device, outcome) = match self.acquire() {
            Ok(mut device) => {
                self.enter(CaptureState::StreamingPrimary);
                match self.stream_primary(&mut device) {
                    PrimaryExit::Finished(outcome) => (Some(device), outcome),
                    PrimaryExit::SensorLost => {
                        if let Err(e) = device.stop() {
                            warn!(error = %e, "Failed to stop lost sensor");
                        }
                        (Some(device), self.stream_backup())
                    }
                }
            }
            Err(e) if self.backup.is_some() => {
                warn!(error = %e, "Sensor unavailable, using backup device");
                (None, self.stream_backup())
            }
            Err(e) => {
                error!(error = %e, "Sensor unavailable and no backup configured");
                (None, SessionOutcome::Failed(e.into()))
            }
        };

        self.drain(device, outcome)
    }

    fn acquire(&mut self) -> SensorResult<P::Device> {
        info!("Starting sensor capture");
        let sensors = self.provider.enumerate()?;
        if sensors.is_empty() {
            return Err(SensorError::NotFound);
        }
        for sensor in &sensors {
            debug!(name = %sensor.name, id = %sensor.id, "Sensor available");
        }

        let mut device = self.provider.open_default()?;
        if let Err(e) = device.start(self.settings.streams) {
            if let Err(close_err) = device.close() {
                warn!(error = %close_err, "Failed to close sensor after start failure");
            }
            return Err(e);
        }
        Ok(device)
    }

    fn stream_primary(&mut self, device: &mut P::Device) -> PrimaryExit {
        let timeout = self.settings.frame_timeout;
        let max_missed = self.settings.max_missed_frames;
        let has_backup = self.backup.is_some();
        let mut missed = 0u32;
        let mut errors = 0u32;

        loop {
            if self.control.gate().stop_requested() {
                info!("Stop requested, leaving sensor stream");
                return PrimaryExit::Finished(SessionOutcome::Stopped);
            }
            if self.writer.idle_expired() {
                info!(
                    idle_secs = self.writer.idle_elapsed().as_secs(),
                    "No active reader, stopping sensor stream"
                );
                return PrimaryExit::Finished(SessionOutcome::Idle);
            }

            match device.wait_for_frame(timeout) {
                Ok(Some(frame)) => {
                    missed = 0;
                    errors = 0;
                    self.converter.convert(&frame, &mut self.output);
                    if let Err(e) = self.writer.write(self.output.as_bytes()) {
                        error!(error = %e, "Sink write failed");
                        return PrimaryExit::Finished(SessionOutcome::Failed(e.into()));
                    }
                    continue;
                }
                Ok(None) => {
                    missed += 1;
                    errors = 0;
                    debug!(missed, "Frame wait timed out");
                }
                Err(e) => {
                    missed += 1;
                    errors += 1;
                    warn!(error = %e, missed, "Frame wait failed");
                }
            }

            if has_backup && missed >= max_missed {
                warn!(missed, "Sensor not responding, switching to backup");
                return PrimaryExit::SensorLost;
            }
            if !has_backup && errors >= max_missed {
                error!(errors, "Sensor stream keeps failing");
                return PrimaryExit::Finished(SessionOutcome::Failed(
                    SensorError::StreamFailed(format!("{} consecutive frame errors", errors))
                        .into(),
                ));
            }
        }
    }

    fn stream_backup(&mut self) -> SessionOutcome {
        self.enter(CaptureState::StreamingBackup);
        let Some(backup) = self.backup.as_mut() else {
            return SessionOutcome::Failed(AppError::Other("no backup device configured".into()));
        };

        let result = backup.run(BackupContext {
            writer: &mut self.writer,
            output: &mut self.output,
            gate: self.control.gate(),
        });

        match result {
            Ok(BackupExit::Stopped) => SessionOutcome::Stopped,
            Ok(BackupExit::Idle) => SessionOutcome::Idle,
            Err(e) => {
                error!(error = %e, "Backup stream failed");
                SessionOutcome::Failed(e.into())
            }
        }
    }

    /// Blank the sink, release the hardware, and finish the session
    ///
    /// A session that lost its presence monitor cannot end cleanly: the
    /// process must exit non-zero so it is restarted with a fresh watch.
    fn drain(&mut self, device: Option<P::Device>, outcome: SessionOutcome) -> SessionOutcome {
        self.enter(CaptureState::Draining);
        let outcome = match (outcome, self.control.presence_failure()) {
            (SessionOutcome::Failed(e), _) => SessionOutcome::Failed(e),
            (_, Some(reason)) => {
                SessionOutcome::Failed(PresenceError::MonitorLost(reason.to_string()).into())
            }
            (outcome, None) => outcome,
        };
        self.control.request_shutdown(match &outcome {
            SessionOutcome::Stopped => "stop requested",
            SessionOutcome::Idle => "idle timeout",
            SessionOutcome::Failed(_) => "capture failure",
        });

        self.output.fill_blank();
        match self.writer.write(self.output.as_bytes()) {
            Ok(written) => debug!(outcome = ?written, "Blank frame written"),
            Err(e) => warn!(error = %e, "Failed to write blank frame"),
        }

        // stop/close can block on a disconnected sensor; the watchdog covers it
        if let Some(mut device) = device {
            if let Err(e) = device.stop() {
                warn!(error = %e, "Failed to stop sensor");
            }
            if let Err(e) = device.close() {
                warn!(error = %e, "Failed to close sensor");
            }
        }
        self.control.watchdog().mark_complete();

        self.enter(CaptureState::Stopped);
        info!(exit_code = outcome.exit_code(), "Capture session finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::SensorInfo;
    use crate::backends::sink::WriteOutcome;
    use crate::errors::{BackupResult, EXIT_CAPTURE_FAILURE, SinkError, SinkResult};
    use crate::media::{CpuConverter, Frame, FrameData, PixelLayout, SourceFormat, SourceKind};
    use crate::presence::PresenceListener;
    use crate::session::SessionGate;
    use crate::watchdog::{ShutdownWatchdog, Verdict};
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, mpsc};
    use std::thread;
    use std::time::Instant;

    const OUT_W: u32 = 16;
    const OUT_H: u32 = 8;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Frame,
        Timeout,
        Error,
    }

    #[derive(Default)]
    struct SensorCalls {
        waits: AtomicUsize,
        stopped: AtomicBool,
        closed: AtomicBool,
    }

    struct FakeSensor {
        script: VecDeque<Step>,
        samples: Vec<f32>,
        calls: Arc<SensorCalls>,
        /// close() blocks until the sender is dropped, like a release on an
        /// unplugged device
        hang_on_close: Option<mpsc::Receiver<()>>,
    }

    impl SensorDevice for FakeSensor {
        fn start(&mut self, _streams: StreamSelection) -> SensorResult<()> {
            Ok(())
        }

        fn wait_for_frame(&mut self, _timeout: Duration) -> SensorResult<Option<Frame<'_>>> {
            self.calls.waits.fetch_add(1, Ordering::SeqCst);
            match self.script.pop_front().unwrap_or(Step::Timeout) {
                Step::Frame => Ok(Some(Frame::new(
                    SourceKind::Infrared,
                    PixelLayout::packed(SourceFormat::GrayF32, 4, 2),
                    FrameData::Float(&self.samples),
                    0,
                ))),
                Step::Timeout => Ok(None),
                Step::Error => Err(SensorError::StreamFailed("usb error".into())),
            }
        }

        fn stop(&mut self) -> SensorResult<()> {
            self.calls.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) -> SensorResult<()> {
            if let Some(release) = &self.hang_on_close {
                let _ = release.recv();
            }
            self.calls.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeProvider(Option<FakeSensor>);

    impl SensorProvider for FakeProvider {
        type Device = FakeSensor;

        fn enumerate(&mut self) -> SensorResult<Vec<SensorInfo>> {
            Ok(self
                .0
                .iter()
                .map(|_| SensorInfo {
                    name: "fake".into(),
                    id: "usb-1".into(),
                })
                .collect())
        }

        fn open_default(&mut self) -> SensorResult<FakeSensor> {
            self.0.take().ok_or(SensorError::NotFound)
        }
    }

    struct FakeBackup {
        runs: Arc<AtomicUsize>,
        exit: BackupExit,
    }

    impl BackupSource for FakeBackup {
        fn path(&self) -> &Path {
            Path::new("/dev/fake-backup")
        }

        fn run<S: FrameSink>(&mut self, _ctx: BackupContext<'_, S>) -> BackupResult<BackupExit> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(self.exit)
        }
    }

    /// Records every frame; optionally requests a stop after `stop_after` writes
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        outcome: WriteOutcome,
        fail: bool,
        stop_after: Option<(usize, Arc<SessionGate>)>,
    }

    impl FrameSink for RecordingSink {
        fn write_frame(&mut self, frame: &[u8]) -> SinkResult<WriteOutcome> {
            let mut frames = self.frames.lock().unwrap();
            frames.push(frame.to_vec());
            if let Some((n, gate)) = &self.stop_after {
                if frames.len() >= *n {
                    gate.request_stop();
                }
            }
            if self.fail {
                return Err(SinkError::WriteFailed(std::io::Error::from_raw_os_error(
                    libc::ENODEV,
                )));
            }
            Ok(self.outcome)
        }
    }

    struct Harness {
        gate: Arc<SessionGate>,
        watchdog: Arc<ShutdownWatchdog>,
        control: SessionControl,
        kills: Arc<AtomicUsize>,
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        calls: Arc<SensorCalls>,
        backup_runs: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_grace(Duration::from_secs(5))
        }

        fn with_grace(grace: Duration) -> Self {
            let kills = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&kills);
            let gate = Arc::new(SessionGate::new());
            let watchdog = Arc::new(ShutdownWatchdog::with_terminator(
                grace,
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            ));
            Self {
                control: SessionControl::new(Arc::clone(&gate), Arc::clone(&watchdog)),
                gate,
                watchdog,
                kills,
                frames: Arc::new(Mutex::new(Vec::new())),
                calls: Arc::new(SensorCalls::default()),
                backup_runs: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn sensor(&self, script: &[Step]) -> FakeSensor {
            FakeSensor {
                script: script.iter().copied().collect(),
                samples: vec![65535.0; 8],
                calls: Arc::clone(&self.calls),
                hang_on_close: None,
            }
        }

        fn sink(&self) -> RecordingSink {
            RecordingSink {
                frames: Arc::clone(&self.frames),
                outcome: WriteOutcome::Delivered,
                fail: false,
                stop_after: None,
            }
        }

        fn backup(&self, exit: BackupExit) -> FakeBackup {
            FakeBackup {
                runs: Arc::clone(&self.backup_runs),
                exit,
            }
        }

        fn machine(
            &self,
            sensor: Option<FakeSensor>,
            backup: Option<FakeBackup>,
            sink: RecordingSink,
            idle: Duration,
        ) -> CaptureMachine<FakeProvider, RecordingSink, FakeBackup> {
            let settings = MachineSettings {
                streams: StreamSelection {
                    color: false,
                    infrared: true,
                },
                frame_timeout: Duration::from_millis(1),
                max_missed_frames: 5,
                blank_chroma: 0x80,
                output_width: OUT_W,
                output_height: OUT_H,
            };
            CaptureMachine::new(
                FakeProvider(sensor),
                backup,
                SinkWriter::new(sink, idle),
                Box::new(CpuConverter::new()),
                self.control.clone(),
                settings,
            )
        }

        fn finish(&self) {
            self.watchdog.join();
            assert_eq!(self.kills.load(Ordering::SeqCst), 0, "watchdog must not fire");
        }
    }

    fn assert_blank(frame: &[u8]) {
        let luma = (OUT_W * OUT_H) as usize;
        assert_eq!(frame.len(), luma * 3 / 2);
        assert!(frame[..luma].iter().all(|&y| y == 0x10));
        assert!(frame[luma..].iter().all(|&c| c == 0x80));
    }

    #[test]
    fn test_stop_mid_stream_drains_with_blank_frame() {
        let h = Harness::new();
        h.gate.set_consumer_present(true);
        let mut sink = h.sink();
        sink.stop_after = Some((3, Arc::clone(&h.gate)));
        let sensor = h.sensor(&[Step::Frame; 10]);
        let mut machine = h.machine(Some(sensor), None, sink, Duration::from_secs(30));

        let outcome = machine.run();

        assert!(matches!(outcome, SessionOutcome::Stopped));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(
            machine.history(),
            &[
                CaptureState::Idle,
                CaptureState::WaitingForConsumer,
                CaptureState::StreamingPrimary,
                CaptureState::Draining,
                CaptureState::Stopped
            ]
        );

        let frames = h.frames.lock().unwrap();
        assert_eq!(frames.len(), 4, "three streamed frames plus the blank frame");
        assert!(frames[0][..(OUT_W * OUT_H) as usize].iter().all(|&y| y == 235));
        assert_blank(frames.last().unwrap());
        assert!(h.calls.stopped.load(Ordering::SeqCst));
        assert!(h.calls.closed.load(Ordering::SeqCst));
        assert!(h.watchdog.is_complete());
        drop(frames);
        h.finish();
    }

    #[test]
    fn test_failover_on_fifth_missed_frame() {
        let h = Harness::new();
        h.gate.set_consumer_present(true);
        let sensor = h.sensor(&[Step::Frame, Step::Timeout, Step::Timeout, Step::Error]);
        let backup = h.backup(BackupExit::Stopped);
        let mut machine = h.machine(Some(sensor), Some(backup), h.sink(), Duration::from_secs(30));

        let outcome = machine.run();

        assert!(matches!(outcome, SessionOutcome::Stopped));
        assert_eq!(h.calls.waits.load(Ordering::SeqCst), 6, "one frame, then five misses");
        assert_eq!(h.backup_runs.load(Ordering::SeqCst), 1);
        assert!(machine.history().contains(&CaptureState::StreamingBackup));
        assert!(h.calls.closed.load(Ordering::SeqCst));
        h.finish();
    }

    #[test]
    fn test_missing_sensor_goes_straight_to_backup() {
        let h = Harness::new();
        h.gate.set_consumer_present(true);
        let backup = h.backup(BackupExit::Idle);
        let mut machine = h.machine(None, Some(backup), h.sink(), Duration::from_secs(30));

        let outcome = machine.run();

        assert!(matches!(outcome, SessionOutcome::Idle));
        assert_eq!(
            machine.history(),
            &[
                CaptureState::Idle,
                CaptureState::WaitingForConsumer,
                CaptureState::StreamingBackup,
                CaptureState::Draining,
                CaptureState::Stopped
            ]
        );
        assert_eq!(h.calls.waits.load(Ordering::SeqCst), 0);
        h.finish();
    }

    #[test]
    fn test_missing_sensor_without_backup_fails() {
        let h = Harness::new();
        h.gate.set_consumer_present(true);
        let mut machine = h.machine(None, None, h.sink(), Duration::from_secs(30));

        let outcome = machine.run();

        assert!(matches!(
            outcome,
            SessionOutcome::Failed(AppError::Sensor(SensorError::NotFound))
        ));
        assert_eq!(outcome.exit_code(), EXIT_CAPTURE_FAILURE);
        assert_blank(h.frames.lock().unwrap().last().unwrap());
        h.finish();
    }

    #[test]
    fn test_timeouts_without_backup_do_not_fail() {
        let h = Harness::new();
        h.gate.set_consumer_present(true);
        let sensor = h.sensor(&[]);
        let mut machine =
            h.machine(Some(sensor), None, h.sink(), Duration::from_millis(50));

        let outcome = machine.run();

        assert!(matches!(outcome, SessionOutcome::Idle));
        assert!(h.calls.waits.load(Ordering::SeqCst) > 5);
        h.finish();
    }

    #[test]
    fn test_passive_consumer_still_idles_out() {
        let h = Harness::new();
        h.gate.set_consumer_present(true);
        let mut sink = h.sink();
        sink.outcome = WriteOutcome::NoReaderYet;
        let sensor = h.sensor(&[Step::Frame; 10_000]);
        let mut machine = h.machine(Some(sensor), None, sink, Duration::from_millis(30));

        let outcome = machine.run();

        assert!(matches!(outcome, SessionOutcome::Idle));
        assert!(h.gate.consumer_present(), "consumer never left");
        assert_eq!(machine.writer().delivered(), 0);
        h.finish();
    }

    #[test]
    fn test_repeated_errors_without_backup_fail() {
        let h = Harness::new();
        h.gate.set_consumer_present(true);
        let sensor = h.sensor(&[Step::Error; 5]);
        let mut machine = h.machine(Some(sensor), None, h.sink(), Duration::from_secs(30));

        let outcome = machine.run();

        assert!(matches!(
            outcome,
            SessionOutcome::Failed(AppError::Sensor(SensorError::StreamFailed(_)))
        ));
        assert_eq!(h.calls.waits.load(Ordering::SeqCst), 5);
        h.finish();
    }

    #[test]
    fn test_fatal_sink_write_fails_session() {
        let h = Harness::new();
        h.gate.set_consumer_present(true);
        let mut sink = h.sink();
        sink.fail = true;
        let sensor = h.sensor(&[Step::Frame]);
        let mut machine = h.machine(Some(sensor), None, sink, Duration::from_secs(30));

        let outcome = machine.run();

        assert!(matches!(
            outcome,
            SessionOutcome::Failed(AppError::Sink(SinkError::WriteFailed(_)))
        ));
        assert_eq!(outcome.exit_code(), EXIT_CAPTURE_FAILURE);
        assert!(h.calls.closed.load(Ordering::SeqCst));
        h.finish();
    }

    #[test]
    fn test_stop_before_consumer_never_opens_sensor() {
        let h = Harness::new();
        h.gate.request_stop();
        let sensor = h.sensor(&[]);
        let mut machine = h.machine(Some(sensor), None, h.sink(), Duration::from_secs(30));

        let outcome = machine.run();

        assert!(matches!(outcome, SessionOutcome::Stopped));
        assert!(!machine.history().contains(&CaptureState::StreamingPrimary));
        assert_eq!(h.calls.waits.load(Ordering::SeqCst), 0);
        assert_eq!(h.frames.lock().unwrap().len(), 1, "only the blank frame");
        h.finish();
    }

    #[test]
    fn test_hung_release_after_stop_is_terminated_within_grace() {
        let grace = Duration::from_millis(100);
        let h = Harness::with_grace(grace);
        h.gate.set_consumer_present(true);
        let (release, hang) = mpsc::channel::<()>();
        let mut sensor = h.sensor(&[]);
        sensor.hang_on_close = Some(hang);
        let mut machine = h.machine(Some(sensor), None, h.sink(), Duration::from_secs(30));
        let session = thread::spawn(move || machine.run());

        while h.calls.waits.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let requested = Instant::now();
        h.control.request_shutdown("signal received");

        assert_eq!(h.watchdog.join(), Some(Verdict::GraceExpired));
        let elapsed = requested.elapsed();
        assert_eq!(h.kills.load(Ordering::SeqCst), 1);
        assert!(elapsed >= grace);
        assert!(elapsed < grace + Duration::from_secs(1), "took {:?}", elapsed);
        assert!(h.calls.stopped.load(Ordering::SeqCst), "stop runs before the hung close");
        assert!(!h.calls.closed.load(Ordering::SeqCst));
        assert!(!h.watchdog.is_complete());

        drop(release);
        let outcome = session.join().unwrap();
        assert!(matches!(outcome, SessionOutcome::Stopped));
    }

    #[test]
    fn test_drain_arms_watchdog_before_release() {
        let h = Harness::with_grace(Duration::from_millis(50));
        h.gate.set_consumer_present(true);
        let (release, hang) = mpsc::channel::<()>();
        let mut sensor = h.sensor(&[]);
        sensor.hang_on_close = Some(hang);
        let mut machine = h.machine(Some(sensor), None, h.sink(), Duration::from_millis(20));
        let session = thread::spawn(move || machine.run());

        // Nothing requests a shutdown from outside; the idle drain must arm it
        let deadline = Instant::now() + Duration::from_secs(5);
        while h.kills.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(h.kills.load(Ordering::SeqCst), 1, "hung release must be killed");
        assert!(h.gate.stop_requested());

        drop(release);
        assert!(matches!(session.join().unwrap(), SessionOutcome::Idle));
    }

    #[test]
    fn test_lost_presence_monitor_fails_session() {
        let h = Harness::new();
        let sensor = h.sensor(&[]);
        let mut machine = h.machine(Some(sensor), None, h.sink(), Duration::from_secs(30));
        let session = thread::spawn(move || machine.run());

        thread::sleep(Duration::from_millis(10));
        let lost = PresenceError::ReadFailed(std::io::Error::from_raw_os_error(libc::EBADF));
        h.control.monitor_failed(&lost);
        let outcome = session.join().unwrap();

        assert!(matches!(
            outcome,
            SessionOutcome::Failed(AppError::Presence(PresenceError::MonitorLost(_)))
        ));
        assert_ne!(outcome.exit_code(), 0);
        assert_eq!(h.calls.waits.load(Ordering::SeqCst), 0);
        assert_blank(h.frames.lock().unwrap().last().unwrap());
        h.finish();
    }

    #[test]
    fn test_settings_follow_backup_configuration() {
        let mut config = Config {
            sink_path: PathBuf::from("/dev/video10"),
            ..Config::default()
        };
        assert_eq!(
            MachineSettings::from_config(&config).frame_timeout,
            Duration::from_millis(1000)
        );
        config.backup_path = Some(PathBuf::from("/dev/video0"));
        assert_eq!(
            MachineSettings::from_config(&config).frame_timeout,
            Duration::from_millis(100)
        );
    }
}
