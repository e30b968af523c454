// SPDX-License-Identifier: GPL-3.0-only

//! Sink writes and the idle deadline
//!
//! A consumer can hold the sink open without ever streaming from it. Only
//! writes a reader actually received count as activity.

use std::time::{Duration, Instant};

use crate::backends::sink::{FrameSink, WriteOutcome};
use crate::errors::SinkResult;

/// Time since the last frame delivered to a reader
#[derive(Debug, Clone, Copy)]
pub struct IdleDeadline {
    last_delivery: Instant,
    threshold: Duration,
}

impl IdleDeadline {
    pub fn new(threshold: Duration) -> Self {
        Self {
            last_delivery: Instant::now(),
            threshold,
        }
    }

    pub fn record_delivery(&mut self) {
        self.last_delivery = Instant::now();
    }

    pub fn last_delivery(&self) -> Instant {
        self.last_delivery
    }

    pub fn elapsed(&self) -> Duration {
        self.last_delivery.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_delivery) >= self.threshold
    }
}

/// A sink plus the idle deadline its deliveries refresh
pub struct SinkWriter<S> {
    sink: S,
    idle: IdleDeadline,
    delivered: u64,
}

impl<S: FrameSink> SinkWriter<S> {
    pub fn new(sink: S, idle_threshold: Duration) -> Self {
        Self {
            sink,
            idle: IdleDeadline::new(idle_threshold),
            delivered: 0,
        }
    }

    /// Write one frame; `Delivered` refreshes the idle deadline
    pub fn write(&mut self, frame: &[u8]) -> SinkResult<WriteOutcome> {
        let outcome = self.sink.write_frame(frame)?;
        if outcome == WriteOutcome::Delivered {
            self.idle.record_delivery();
            self.delivered += 1;
        }
        Ok(outcome)
    }

    /// Start a fresh idle period, as when a session begins
    pub fn reset_idle(&mut self) {
        self.idle.record_delivery();
    }

    pub fn idle_expired(&self) -> bool {
        self.idle.is_expired()
    }

    pub fn idle_elapsed(&self) -> Duration {
        self.idle.elapsed()
    }

    pub fn idle(&self) -> &IdleDeadline {
        &self.idle
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
