// SPDX-License-Identifier: MPL-2.0

//! Hardware access for the sensor bridge
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐
//! │    Sensor    │     │    Backup    │
//! │ (V4L2 nodes) │     │ (V4L2 webcam)│
//! └──────┬───────┘     └──────┬───────┘
//!        │  frames            │  frames
//!        └─────────┬──────────┘
//!                  ▼
//!        ┌──────────────────┐
//!        │  Sink (loopback) │
//!        └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`sensor`]: Primary depth/IR sensor capability surface and its V4L2 driver
//! - [`backup`]: Secondary capture device used when the sensor is unavailable
//! - [`sink`]: v4l2loopback output device
//! - [`v4l2_utils`]: Device identification and the bounded frame wait

pub mod backup;
pub mod sensor;
pub mod sink;
pub mod v4l2_utils;
