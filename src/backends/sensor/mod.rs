// SPDX-License-Identifier: GPL-3.0-only

//! Primary depth/IR sensor capability surface
//!
//! The capture state machine only sees these two traits. [`v4l2`] provides
//! the implementation for sensors exposed by a kernel V4L2 driver.

pub mod format_converters;
pub mod v4l2;

pub use v4l2::{SensorNodes, V4l2Sensor, V4l2SensorProvider, find_sensor_nodes};

use crate::config::StreamKind;
use crate::errors::SensorResult;
use crate::media::Frame;
use std::time::Duration;

/// Which sensor streams to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSelection {
    pub color: bool,
    pub infrared: bool,
}

impl From<StreamKind> for StreamSelection {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Infrared => Self {
                color: false,
                infrared: true,
            },
            StreamKind::Color => Self {
                color: true,
                infrared: false,
            },
        }
    }
}

/// A sensor found during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub name: String,
    /// Stable identifier (bus info for V4L2 sensors)
    pub id: String,
}

/// Finds and opens sensors
pub trait SensorProvider: Send {
    type Device: SensorDevice;

    fn enumerate(&mut self) -> SensorResult<Vec<SensorInfo>>;

    /// Open the first available sensor
    fn open_default(&mut self) -> SensorResult<Self::Device>;
}

/// An opened sensor
///
/// `stop` and `close` may block for a long time on a disconnected device.
pub trait SensorDevice: Send {
    fn start(&mut self, streams: StreamSelection) -> SensorResult<()>;

    /// Wait up to `timeout` for the next frame
    ///
    /// `Ok(None)` means the wait timed out. The frame borrows the device's
    /// buffers and is valid until the next call.
    fn wait_for_frame(&mut self, timeout: Duration) -> SensorResult<Option<Frame<'_>>>;

    fn stop(&mut self) -> SensorResult<()>;

    fn close(&mut self) -> SensorResult<()>;
}
