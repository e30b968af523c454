// SPDX-License-Identifier: GPL-3.0-only

//! Capture session lifecycle
//!
//! - [`gate`]: Flags shared between the presence monitor, signal handling and
//!   the streaming loop
//! - [`writer`]: Sink writes that keep the idle deadline
//! - [`machine`]: The capture state machine

pub mod gate;
pub mod machine;
pub mod writer;

pub use gate::{GateEvent, SessionGate};
pub use machine::{CaptureMachine, MachineSettings, SessionOutcome};
pub use writer::{IdleDeadline, SinkWriter};

use std::fmt;

/// State of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    WaitingForConsumer,
    StreamingPrimary,
    StreamingBackup,
    /// Blank frame written, hardware being released
    Draining,
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::WaitingForConsumer => "waiting for consumer",
            Self::StreamingPrimary => "streaming sensor",
            Self::StreamingBackup => "streaming backup",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}
