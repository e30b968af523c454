// SPDX-License-Identifier: GPL-3.0-only

//! Shared session flags
//!
//! The presence monitor, the signal handler and the streaming loop coordinate
//! through one mutex-guarded pair of flags and a condition variable.

use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Flags {
    consumer_present: bool,
    stop_requested: bool,
}

/// What ended a wait on the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    ConsumerArrived,
    StopRequested,
}

#[derive(Debug, Default)]
pub struct SessionGate {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    // The flags are plain booleans, so a poisoned lock still holds valid data
    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_consumer_present(&self, present: bool) {
        self.lock().consumer_present = present;
        self.changed.notify_all();
    }

    pub fn consumer_present(&self) -> bool {
        self.lock().consumer_present
    }

    /// Request a stop; returns `true` for the first request only
    pub fn request_stop(&self) -> bool {
        let first = {
            let mut flags = self.lock();
            !std::mem::replace(&mut flags.stop_requested, true)
        };
        self.changed.notify_all();
        first
    }

    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Block until a consumer is present or a stop is requested
    ///
    /// A pending stop wins over a present consumer.
    pub fn wait_for_consumer(&self) -> GateEvent {
        let flags = self
            .changed
            .wait_while(self.lock(), |f| !f.consumer_present && !f.stop_requested)
            .unwrap_or_else(|e| e.into_inner());
        Self::event(&flags)
    }

    fn event(flags: &Flags) -> GateEvent {
        if flags.stop_requested {
            GateEvent::StopRequested
        } else {
            GateEvent::ConsumerArrived
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_first_stop_request_only() {
        let gate = SessionGate::new();
        assert!(gate.request_stop());
        assert!(!gate.request_stop());
        assert!(gate.stop_requested());
    }

    #[test]
    fn test_stop_wins_over_consumer() {
        let gate = SessionGate::new();
        gate.set_consumer_present(true);
        gate.request_stop();
        assert_eq!(gate.wait_for_consumer(), GateEvent::StopRequested);
    }

    #[test]
    fn test_wait_wakes_on_consumer_from_other_thread() {
        let gate = Arc::new(SessionGate::new());
        let notifier = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            notifier.set_consumer_present(true);
        });

        assert_eq!(gate.wait_for_consumer(), GateEvent::ConsumerArrived);
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_from_other_thread_ends_wait() {
        let gate = Arc::new(SessionGate::new());
        let stopper = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.request_stop();
        });

        assert_eq!(gate.wait_for_consumer(), GateEvent::StopRequested);
        assert!(!gate.consumer_present());
        handle.join().unwrap();
    }
}
