// SPDX-License-Identifier: GPL-3.0-only

//! Consumer presence detection
//!
//! Two strategies observe who holds the sink open:
//! - [`inotify`]: open/close notifications on the sink path
//! - [`procfs`]: a periodic scan of every process's descriptor table
//!
//! Both feed a [`PresenceTracker`], which turns counts into exactly one edge
//! per transition, and report edges to a [`PresenceListener`]. Monitors never
//! touch the sensor.

pub mod inotify;
pub mod procfs;

pub use inotify::InotifyMonitor;
pub use procfs::ProcfsMonitor;

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::PresenceStrategy;
use crate::errors::{PresenceError, PresenceResult};

/// Receives presence edges
pub trait PresenceListener: Send + Sync {
    /// Consumer count went from zero to at least one
    fn consumer_arrived(&self);
    /// Consumer count went back to zero
    fn consumers_gone(&self);
    /// Monitoring ended with an error; no further edges will arrive
    fn monitor_failed(&self, error: &PresenceError);
}

/// A presence detection strategy
pub trait PresenceMonitor: Send {
    fn name(&self) -> &'static str;

    /// Observe the sink until the last consumer leaves or observation fails
    fn run(self: Box<Self>, listener: &dyn PresenceListener) -> PresenceResult<()>;
}

/// A transition of the consumer count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEdge {
    Arrived,
    Gone,
}

/// Consumer count with edge detection
#[derive(Debug, Default)]
pub struct PresenceTracker {
    count: usize,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_present(&self) -> bool {
        self.count > 0
    }

    pub fn opened(&mut self) -> Option<PresenceEdge> {
        self.observe(self.count.saturating_add(1))
    }

    /// Closes without a matching open (opened before the watch) are ignored
    pub fn closed(&mut self) -> Option<PresenceEdge> {
        self.observe(self.count.saturating_sub(1))
    }

    /// Replace the count with an observed total
    pub fn observe(&mut self, count: usize) -> Option<PresenceEdge> {
        let was_present = self.is_present();
        self.count = count;
        match (was_present, self.is_present()) {
            (false, true) => Some(PresenceEdge::Arrived),
            (true, false) => Some(PresenceEdge::Gone),
            _ => None,
        }
    }
}

/// Forward `edge` to `listener`; returns `true` when monitoring should end
pub fn dispatch(edge: Option<PresenceEdge>, listener: &dyn PresenceListener) -> bool {
    match edge {
        Some(PresenceEdge::Arrived) => {
            listener.consumer_arrived();
            false
        }
        Some(PresenceEdge::Gone) => {
            listener.consumers_gone();
            true
        }
        None => false,
    }
}

/// Build the monitor for `strategy`
///
/// Watch setup happens here so a bad sink path fails before any thread exists.
pub fn monitor_for(
    strategy: PresenceStrategy,
    sink: &Path,
    poll_interval: Duration,
) -> PresenceResult<Box<dyn PresenceMonitor>> {
    Ok(match strategy {
        PresenceStrategy::Events => Box::new(InotifyMonitor::new(sink)?),
        PresenceStrategy::Poll => Box::new(ProcfsMonitor::new(sink, poll_interval)),
    })
}

/// Run `monitor` on its own thread
///
/// A monitor that fails is reported to `listener`, since the session can no
/// longer learn that its consumers left.
pub fn spawn_monitor(
    monitor: Box<dyn PresenceMonitor>,
    listener: Arc<dyn PresenceListener>,
) -> PresenceResult<JoinHandle<()>> {
    let name = monitor.name();
    thread::Builder::new()
        .name(format!("presence-{}", name))
        .spawn(move || {
            debug!(monitor = name, "Presence monitor started");
            match monitor.run(listener.as_ref()) {
                Ok(()) => debug!(monitor = name, "Presence monitor finished"),
                Err(e) => {
                    warn!(monitor = name, error = %e, "Presence monitor failed");
                    listener.monitor_failed(&e);
                }
            }
        })
        .map_err(PresenceError::SpawnFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingListener(Mutex<Vec<PresenceEdge>>, Mutex<Vec<String>>);

    impl PresenceListener for RecordingListener {
        fn consumer_arrived(&self) {
            self.0.lock().unwrap().push(PresenceEdge::Arrived);
        }
        fn consumers_gone(&self) {
            self.0.lock().unwrap().push(PresenceEdge::Gone);
        }
        fn monitor_failed(&self, error: &PresenceError) {
            self.1.lock().unwrap().push(error.to_string());
        }
    }

    struct FailingMonitor;

    impl PresenceMonitor for FailingMonitor {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn run(self: Box<Self>, listener: &dyn PresenceListener) -> PresenceResult<()> {
            listener.consumer_arrived();
            Err(PresenceError::ReadFailed(std::io::Error::from_raw_os_error(libc::EBADF)))
        }
    }

    #[test]
    fn test_one_edge_per_transition() {
        let mut tracker = PresenceTracker::new();
        let edges: Vec<_> = [
            tracker.opened(),
            tracker.opened(),
            tracker.opened(),
            tracker.closed(),
            tracker.closed(),
            tracker.closed(),
            tracker.opened(),
            tracker.closed(),
        ]
        .into_iter()
        .flatten()
        .collect();

        assert_eq!(
            edges,
            vec![
                PresenceEdge::Arrived,
                PresenceEdge::Gone,
                PresenceEdge::Arrived,
                PresenceEdge::Gone
            ]
        );
    }

    #[test]
    fn test_unmatched_close_saturates() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(tracker.closed(), None);
        assert_eq!(tracker.count(), 0);
        assert_eq!(tracker.opened(), Some(PresenceEdge::Arrived));
    }

    #[test]
    fn test_observed_counts_produce_edges() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(tracker.observe(0), None);
        assert_eq!(tracker.observe(2), Some(PresenceEdge::Arrived));
        assert_eq!(tracker.observe(5), None);
        assert_eq!(tracker.observe(0), Some(PresenceEdge::Gone));
        assert_eq!(tracker.observe(0), None);
    }

    #[test]
    fn test_failed_monitor_is_reported() {
        let listener = Arc::new(RecordingListener::default());
        let handle = spawn_monitor(Box::new(FailingMonitor), listener.clone()).unwrap();
        handle.join().unwrap();

        assert_eq!(*listener.0.lock().unwrap(), vec![PresenceEdge::Arrived]);
        let failures = listener.1.lock().unwrap();
        assert_eq!(failures.len(), 1, "the failure must reach the listener once");
        assert!(failures[0].starts_with("Failed to read events"));
    }

    #[test]
    fn test_dispatch_stops_after_gone() {
        let listener = RecordingListener::default();
        assert!(!dispatch(Some(PresenceEdge::Arrived), &listener));
        assert!(!dispatch(None, &listener));
        assert!(dispatch(Some(PresenceEdge::Gone), &listener));
        assert_eq!(
            *listener.0.lock().unwrap(),
            vec![PresenceEdge::Arrived, PresenceEdge::Gone]
        );
    }
}
