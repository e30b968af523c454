// SPDX-License-Identifier: GPL-3.0-only

//! Shared V4L2 utility functions
//!
//! Device identification during discovery, and the bounded frame wait used by
//! both the sensor and the backup source on top of `v4l`'s mmap stream.

use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};

use tracing::debug;
use v4l::buffer::Metadata;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;

/// VIDIOC_QUERYCAP ioctl number
const VIDIOC_QUERYCAP: libc::c_ulong = 0x80685600;

/// V4L2 capability flag for single-planar video capture
pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;

/// V4L2 capability structure for VIDIOC_QUERYCAP ioctl
#[repr(C)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

fn query_v4l2_cap(fd: RawFd) -> Option<V4l2Capability> {
    // SAFETY: all-zero is a valid bit pattern for this plain C struct
    let mut cap: V4l2Capability = unsafe { std::mem::zeroed() };
    // SAFETY: VIDIOC_QUERYCAP writes exactly one V4l2Capability
    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCAP as _, &mut cap as *mut V4l2Capability) };
    if result < 0 { None } else { Some(cap) }
}

/// Identity reported by VIDIOC_QUERYCAP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V4l2DeviceInfo {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub capabilities: u32,
}

impl V4l2DeviceInfo {
    pub fn can_capture(&self) -> bool {
        self.capabilities & V4L2_CAP_VIDEO_CAPTURE != 0
    }
}

fn c_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).to_string()
}

/// Query driver, card, and bus info of a device node
///
/// Opens the node read-only, so a capture device is not claimed by the query.
pub fn query_device_info(device_path: &str) -> Option<V4l2DeviceInfo> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(device_path)
        .ok()?;
    let cap = query_v4l2_cap(file.as_raw_fd())?;

    // Use device_caps if available, otherwise capabilities
    let capabilities = if cap.device_caps != 0 {
        cap.device_caps
    } else {
        cap.capabilities
    };

    let info = V4l2DeviceInfo {
        driver: c_string(&cap.driver),
        card: c_string(&cap.card),
        bus_info: c_string(&cap.bus_info),
        capabilities,
    };
    debug!(device_path, driver = %info.driver, bus_info = %info.bus_info, "Queried V4L2 device");
    Some(info)
}

/// Bytes of a dequeued buffer that hold frame data
///
/// Drivers that leave `bytesused` at zero fill the whole buffer.
pub fn used_bytes<'b>(buf: &'b [u8], meta: &Metadata) -> &'b [u8] {
    match meta.bytesused as usize {
        0 => buf,
        used => &buf[..used.min(buf.len())],
    }
}

/// Whether a stream error only means no buffer was filled in time
pub fn is_frame_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Wait for the next filled buffer of a capture stream
///
/// The stream's timeout bounds the wait; `Ok(None)` means it elapsed. The
/// previous buffer is requeued by this call, so the returned slice is only
/// valid until the next one.
pub fn next_frame<'s>(
    stream: &'s mut MmapStream<'_>,
) -> io::Result<Option<(&'s [u8], &'s Metadata)>> {
    match CaptureStream::next(stream) {
        Ok((buf, meta)) => Ok(Some((used_bytes(buf, meta), meta))),
        Err(e) if is_frame_timeout(&e) => Ok(None),
        Err(e) => Err(e),
    }
}
