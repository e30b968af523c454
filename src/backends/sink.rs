// SPDX-License-Identifier: GPL-3.0-only

//! Virtual sink (v4l2loopback output device)
//!
//! The sink is opened non-blocking (`v4l` always opens that way). A write
//! that would block means no consumer is actively reading yet; it is not an
//! error.

use crate::constants::{FRAME_LOG_INTERVAL, yuv420_frame_len};
use crate::errors::{SinkError, SinkResult};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use v4l::format::{Colorspace, FieldOrder};
use v4l::prelude::*;
use v4l::video::Output;
use v4l::{Format, FourCC};

/// Planar YUV 4:2:0, Y then U then V
const OUTPUT_FOURCC: &[u8; 4] = b"YU12";

/// Result of a successful write call
///
/// Fatal failures are reported as `Err(SinkError)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A reader received the frame
    Delivered,
    /// Nobody is reading yet (the write would have blocked)
    NoReaderYet,
}

/// Destination for converted output frames
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &[u8]) -> SinkResult<WriteOutcome>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn write_frame(&mut self, frame: &[u8]) -> SinkResult<WriteOutcome> {
        (**self).write_frame(frame)
    }
}

/// Classify the result of one write of `expected` bytes
pub fn classify_write(result: io::Result<usize>, expected: usize) -> SinkResult<WriteOutcome> {
    match result {
        Ok(0) if expected > 0 => Err(SinkError::ShortWrite {
            written: 0,
            expected,
        }),
        Ok(written) => {
            if written < expected {
                debug!(written, expected, "Partial frame write");
            }
            Ok(WriteOutcome::Delivered)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::NoReaderYet),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(WriteOutcome::NoReaderYet),
        Err(e) => Err(SinkError::WriteFailed(e)),
    }
}

/// Output format requested from the loopback device
pub fn output_format(width: u32, height: u32) -> Format {
    let mut format = Format::new(width, height, FourCC::new(OUTPUT_FOURCC));
    format.field_order = FieldOrder::Progressive;
    format.stride = width;
    format.size = yuv420_frame_len(width, height) as u32;
    format.colorspace = Colorspace::SRGB;
    format
}

/// v4l2loopback output device configured for planar YUV 4:2:0
pub struct LoopbackSink {
    device: Device,
    path: PathBuf,
    frame_len: usize,
    delivered: u64,
}

impl LoopbackSink {
    /// Open the device and set its output format
    pub fn open(path: &Path, width: u32, height: u32) -> SinkResult<Self> {
        let device = Device::with_path(path).map_err(|source| SinkError::OpenFailed {
            path: path.display().to_string(),
            source,
        })?;

        let granted = Output::set_format(&device, &output_format(width, height)).map_err(
            |source| SinkError::FormatRejected {
                path: path.display().to_string(),
                source,
            },
        )?;

        info!(
            path = %path.display(),
            width = granted.width,
            height = granted.height,
            fourcc = %granted.fourcc,
            sizeimage = granted.size,
            "Sink configured for YUV420"
        );

        Ok(Self {
            device,
            path: path.to_path_buf(),
            frame_len: yuv420_frame_len(width, height),
            delivered: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Frames a reader has received from this sink
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl FrameSink for LoopbackSink {
    fn write_frame(&mut self, frame: &[u8]) -> SinkResult<WriteOutcome> {
        let outcome = classify_write(self.device.write(frame), frame.len())?;
        if outcome == WriteOutcome::Delivered {
            if self.delivered % FRAME_LOG_INTERVAL == 0 {
                debug!(frame = self.delivered, "Frames delivered to sink");
            }
            self.delivered += 1;
        }
        Ok(outcome)
    }
}
