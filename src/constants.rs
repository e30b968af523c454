// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants
//!
//! The output geometry is fixed: every frame written to the sink is planar
//! YUV 4:2:0 at [`OUTPUT_WIDTH`] x [`OUTPUT_HEIGHT`], Y plane followed by U
//! then V, with tightly packed rows.

use std::time::Duration;

/// Width of every frame written to the sink
pub const OUTPUT_WIDTH: u32 = 512;

/// Height of every frame written to the sink
pub const OUTPUT_HEIGHT: u32 = 424;

/// Largest value an infrared sample can take before normalization
pub const IR_MAX_VALUE: f32 = 65535.0;

/// Luma value of the blank frame (video black in limited range)
pub const BLANK_LUMA: u8 = 0x10;

/// Chroma value of the blank frame (neutral, no color cast)
pub const BLANK_CHROMA: u8 = 0x80;

/// Frame wait timeout when no backup source is configured
pub const FRAME_TIMEOUT: Duration = Duration::from_millis(1000);

/// Frame wait timeout when a backup source is configured
///
/// Short enough that [`MAX_MISSED_FRAMES`] timeouts detect a USB disconnect
/// in about half a second.
pub const FRAME_TIMEOUT_WITH_BACKUP: Duration = Duration::from_millis(100);

/// Consecutive missed frames that count as sensor loss
pub const MAX_MISSED_FRAMES: u32 = 5;

/// Session ends when nothing was delivered to a reader for this long
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for graceful teardown before the process is killed
pub const WATCHDOG_GRACE: Duration = Duration::from_secs(2);

/// Sampling interval of the `/proc` presence scan
pub const PRESENCE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded wait for a filled buffer from the backup device
pub const BACKUP_WAIT: Duration = Duration::from_secs(1);

/// Memory-mapped buffers requested from the backup device
pub const CAPTURE_BUFFER_COUNT: u32 = 2;

/// Memory-mapped buffers requested from each sensor node
pub const SENSOR_BUFFER_COUNT: u32 = 4;

/// Size in bytes of one planar YUV 4:2:0 frame
pub const fn yuv420_frame_len(width: u32, height: u32) -> usize {
    let luma = (width * height) as usize;
    let chroma = ((width / 2) * (height / 2)) as usize;
    luma + chroma * 2
}

/// Size in bytes of one output frame
pub const OUTPUT_FRAME_LEN: usize = yuv420_frame_len(OUTPUT_WIDTH, OUTPUT_HEIGHT);

/// Delivered frames between two progress log lines
pub const FRAME_LOG_INTERVAL: u64 = 100;

/// Name of the per-user configuration directory
pub const CONFIG_DIR_NAME: &str = "sensor-loopback";

/// Name of the optional JSON configuration file
pub const CONFIG_FILE_NAME: &str = "config.json";
