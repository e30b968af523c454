// SPDX-License-Identifier: GPL-3.0-only

//! Backup capture source
//!
//! A generic V4L2 webcam that keeps the sink fed when the depth sensor is
//! missing or stops responding. The device is asked for YUYV; when the driver
//! refuses, whatever it grants is used as long as the converter knows the
//! layout.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

use super::sink::FrameSink;
use super::v4l2_utils;
use crate::errors::{BackupError, BackupResult};
use crate::media::{
    CpuConverter, Frame, FrameConverter, FrameData, PixelLayout, SourceFormat, SourceKind,
    Yuv420Buffer,
};
use crate::session::{SessionGate, SinkWriter};

const PREFERRED_FORMAT: &[u8; 4] = b"YUYV";

/// Why a backup session ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupExit {
    /// A stop was requested
    Stopped,
    /// Nothing was delivered to a reader within the idle threshold
    Idle,
}

/// Everything a backup session shares with the capture state machine
pub struct BackupContext<'a, S: FrameSink> {
    pub writer: &'a mut SinkWriter<S>,
    pub output: &'a mut Yuv420Buffer,
    pub gate: &'a SessionGate,
}

/// A secondary source that produces frames until stopped
pub trait BackupSource: Send {
    fn path(&self) -> &Path;

    /// Stream into the sink until a stop, an idle timeout, or an error
    ///
    /// Every resource acquired here is released before returning.
    fn run<S: FrameSink>(&mut self, ctx: BackupContext<'_, S>) -> BackupResult<BackupExit>;
}

/// Source of filled capture buffers
///
/// `capture` hands one filled buffer to `f` and returns `Ok(false)` when none
/// arrived within `timeout`.
pub trait CaptureBuffers {
    fn capture(&mut self, timeout: Duration, f: &mut dyn FnMut(&[u8], u64)) -> io::Result<bool>;
}

impl CaptureBuffers for MmapStream<'_> {
    fn capture(&mut self, timeout: Duration, f: &mut dyn FnMut(&[u8], u64)) -> io::Result<bool> {
        self.set_timeout(timeout);
        match v4l2_utils::next_frame(self)? {
            Some((data, meta)) => {
                f(data, meta.sequence as u64);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Map a granted V4L2 format onto a layout the converter understands
pub fn backup_layout(
    fourcc: &str,
    width: u32,
    height: u32,
    bytes_per_line: u32,
) -> BackupResult<PixelLayout> {
    let format = SourceFormat::from_fourcc(fourcc)
        .ok_or_else(|| BackupError::UnsupportedFormat(fourcc.to_string()))?;
    Ok(PixelLayout::with_stride(format, width, height, bytes_per_line))
}

/// Pull frames from `buffers`, convert them and write them to the sink
///
/// The frame is copied into `output` by the conversion, so the sink write
/// never reads from a capture buffer.
pub fn pump_frames<C, S>(
    buffers: &mut C,
    layout: PixelLayout,
    wait: Duration,
    converter: &mut dyn FrameConverter,
    ctx: BackupContext<'_, S>,
) -> BackupResult<BackupExit>
where
    C: CaptureBuffers,
    S: FrameSink,
{
    let BackupContext { writer, output, gate } = ctx;

    loop {
        if gate.stop_requested() {
            info!("Stop requested, leaving backup stream");
            return Ok(BackupExit::Stopped);
        }
        if writer.idle_expired() {
            info!(
                idle_secs = writer.idle_elapsed().as_secs(),
                "No active reader, stopping backup stream"
            );
            return Ok(BackupExit::Idle);
        }

        let converted = buffers
            .capture(wait, &mut |data: &[u8], sequence: u64| {
                let frame =
                    Frame::new(SourceKind::Backup, layout, FrameData::Bytes(data), sequence);
                converter.convert(&frame, output);
            })
            .map_err(|e| BackupError::Stream(e.to_string()))?;

        if !converted {
            continue;
        }
        writer.write(output.as_bytes())?;
    }
}

/// Backup source on a V4L2 capture node
pub struct V4l2BackupSource {
    path: PathBuf,
    buffer_count: u32,
    wait: Duration,
    converter: CpuConverter,
}

impl V4l2BackupSource {
    pub fn new(path: PathBuf, buffer_count: u32, wait: Duration) -> Self {
        Self {
            path,
            buffer_count,
            wait,
            converter: CpuConverter::new(),
        }
    }

    fn open(&self) -> BackupResult<Device> {
        Device::with_path(&self.path).map_err(|e| BackupError::OpenFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Ask for YUYV at the native size and report what was actually granted
    fn negotiate(&self, device: &Device) -> BackupResult<Format> {
        let native = device
            .format()
            .map_err(|e| BackupError::FormatQuery(e.to_string()))?;
        debug!(
            width = native.width,
            height = native.height,
            fourcc = %native.fourcc,
            "Backup native format"
        );

        let preferred = Format::new(native.width, native.height, FourCC::new(PREFERRED_FORMAT));
        if let Err(e) = device.set_format(&preferred) {
            warn!(error = %e, "Backup device refused YUYV, using its native format");
        }

        device
            .format()
            .map_err(|e| BackupError::FormatQuery(e.to_string()))
    }
}

impl BackupSource for V4l2BackupSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn run<S: FrameSink>(&mut self, ctx: BackupContext<'_, S>) -> BackupResult<BackupExit> {
        info!(path = %self.path.display(), "Switching to backup device");

        let device = self.open()?;
        let granted = self.negotiate(&device)?;
        let layout = backup_layout(
            &granted.fourcc.to_string(),
            granted.width,
            granted.height,
            granted.stride,
        )?;

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, self.buffer_count)
            .map_err(|e| BackupError::Buffers(e.to_string()))?;

        info!(
            width = granted.width,
            height = granted.height,
            format = %layout.format,
            buffers = self.buffer_count,
            "Backup stream started"
        );

        let result = pump_frames(&mut stream, layout, self.wait, &mut self.converter, ctx);

        // Stops streaming and unmaps the buffers on every exit path
        drop(stream);
        drop(device);
        match &result {
            Ok(exit) => info!(exit = ?exit, "Backup device released"),
            Err(e) => warn!(error = %e, "Backup device released after failure"),
        }
        result
    }
}
