// SPDX-License-Identifier: MPL-2.0

//! Sensor Loopback - expose a depth sensor as an ordinary camera
//!
//! Frames from a depth sensor's infrared or color stream are converted to
//! planar YUV 4:2:0 and written to a v4l2loopback device. The sensor is only
//! powered while a consumer is actually reading the loopback device.
//!
//! # Architecture
//!
//! - [`presence`]: Detects consumers opening and closing the sink
//! - [`session`]: Capture state machine, shared session flags, idle tracking
//! - [`backends`]: Sensor, backup device, and sink I/O
//! - [`media`]: Frame layouts and YUV 4:2:0 conversion
//! - [`watchdog`]: Bounded shutdown for drivers that hang on release
//! - [`bridge`]: Wires everything together for the binary
//! - [`config`]: Configuration file and defaults
//!
//! # Example
//!
//! ```ignore
//! // sensor-loopback /dev/video10 /dev/video0
//! let config = Config::load(None)?;
//! let outcome = bridge::run(config)?;
//! std::process::exit(outcome.exit_code().into());
//! ```

pub mod backends;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod presence;
pub mod session;
pub mod watchdog;

// Re-export commonly used types
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use session::{CaptureState, SessionOutcome};
