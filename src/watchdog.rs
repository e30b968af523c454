// SPDX-License-Identifier: GPL-3.0-only

//! Shutdown watchdog
//!
//! Releasing a physically disconnected sensor can block forever. Once a
//! shutdown starts, a timer on its own thread races the teardown: if cleanup
//! is not marked complete within the grace period the process is killed with
//! SIGKILL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::errors::PresenceError;
use crate::presence::PresenceListener;
use crate::session::SessionGate;

/// Action taken when the grace period runs out
pub type Terminator = Arc<dyn Fn() + Send + Sync>;

/// Result of the race between teardown and the grace period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    CleanupCompleted,
    GraceExpired,
}

/// Wait for `completed` for at most `grace`
pub async fn race_cleanup(grace: Duration, completed: &Notify) -> Verdict {
    tokio::select! {
        _ = completed.notified() => Verdict::CleanupCompleted,
        _ = tokio::time::sleep(grace) => Verdict::GraceExpired,
    }
}

fn kill_process() {
    error!("Shutdown did not complete in time, killing process");
    // SAFETY: kill(2) on our own pid has no memory-safety preconditions
    unsafe {
        libc::kill(libc::getpid(), libc::SIGKILL);
    }
}

struct Shared {
    armed: AtomicBool,
    complete: AtomicBool,
    notify: Notify,
}

pub struct ShutdownWatchdog {
    grace: Duration,
    shared: Arc<Shared>,
    terminator: Terminator,
    timer: Mutex<Option<JoinHandle<Verdict>>>,
}

impl ShutdownWatchdog {
    /// Watchdog that sends SIGKILL to this process
    pub fn new(grace: Duration) -> Self {
        Self::with_terminator(grace, Arc::new(kill_process))
    }

    pub fn with_terminator(grace: Duration, terminator: Terminator) -> Self {
        Self {
            grace,
            shared: Arc::new(Shared {
                armed: AtomicBool::new(false),
                complete: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            terminator,
            timer: Mutex::new(None),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.shared.complete.load(Ordering::SeqCst)
    }

    /// Start the grace timer; only the first call has any effect
    ///
    /// Returns `true` when this call armed the watchdog.
    pub fn arm(&self) -> bool {
        if self.shared.armed.swap(true, Ordering::SeqCst) {
            debug!("Watchdog already armed");
            return false;
        }

        let grace = self.grace;
        let shared = Arc::clone(&self.shared);
        let terminator = Arc::clone(&self.terminator);

        let spawned = thread::Builder::new()
            .name("shutdown-watchdog".to_string())
            .spawn(move || {
                let verdict = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(race_cleanup(grace, &shared.notify)),
                    Err(e) => {
                        warn!(error = %e, "Watchdog runtime unavailable, sleeping instead");
                        thread::sleep(grace);
                        Verdict::GraceExpired
                    }
                };

                // Completion may land right at the deadline
                if verdict == Verdict::GraceExpired && !shared.complete.load(Ordering::SeqCst) {
                    terminator();
                    return Verdict::GraceExpired;
                }
                debug!("Cleanup completed before the watchdog deadline");
                Verdict::CleanupCompleted
            });

        match spawned {
            Ok(handle) => {
                info!(grace_ms = grace.as_millis() as u64, "Shutdown watchdog armed");
                *self.timer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
            }
            Err(e) => error!(error = %e, "Failed to spawn shutdown watchdog"),
        }
        true
    }

    /// Record that teardown finished; a pending kill becomes a no-op
    pub fn mark_complete(&self) {
        if !self.shared.complete.swap(true, Ordering::SeqCst) {
            // notify_one keeps a permit if the timer is not waiting yet
            self.shared.notify.notify_one();
            debug!("Cleanup marked complete");
        }
    }

    /// Wait for the timer thread, if one was started
    pub fn join(&self) -> Option<Verdict> {
        let handle = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        handle.join().ok()
    }
}

/// Routes shutdown requests to the session gate and the watchdog
///
/// Signal handlers, the presence monitor and the state machine all stop the
/// session through this handle.
#[derive(Clone)]
pub struct SessionControl {
    gate: Arc<SessionGate>,
    watchdog: Arc<ShutdownWatchdog>,
    presence_failure: Arc<OnceLock<String>>,
}

impl SessionControl {
    pub fn new(gate: Arc<SessionGate>, watchdog: Arc<ShutdownWatchdog>) -> Self {
        Self {
            gate,
            watchdog,
            presence_failure: Arc::new(OnceLock::new()),
        }
    }

    pub fn gate(&self) -> &Arc<SessionGate> {
        &self.gate
    }

    pub fn watchdog(&self) -> &Arc<ShutdownWatchdog> {
        &self.watchdog
    }

    /// Ask the session to drain and start the watchdog
    pub fn request_shutdown(&self, reason: &str) {
        if self.gate.request_stop() {
            info!(reason, "Shutdown requested");
        }
        self.watchdog.arm();
    }

    /// Why presence monitoring stopped, if it failed
    pub fn presence_failure(&self) -> Option<&str> {
        self.presence_failure.get().map(String::as_str)
    }
}

impl PresenceListener for SessionControl {
    fn consumer_arrived(&self) {
        info!("Consumer attached to sink");
        self.gate.set_consumer_present(true);
    }

    fn consumers_gone(&self) {
        self.gate.set_consumer_present(false);
        self.request_shutdown("last consumer gone");
    }

    fn monitor_failed(&self, error: &PresenceError) {
        let _ = self.presence_failure.set(error.to_string());
        self.request_shutdown("presence monitor failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_watchdog(grace: Duration) -> (ShutdownWatchdog, Arc<AtomicUsize>) {
        let kills = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&kills);
        let watchdog = ShutdownWatchdog::with_terminator(
            grace,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (watchdog, kills)
    }

    #[tokio::test]
    async fn test_race_expires_without_completion() {
        let notify = Notify::new();
        let verdict = race_cleanup(Duration::from_millis(10), &notify).await;
        assert_eq!(verdict, Verdict::GraceExpired);
    }

    #[tokio::test]
    async fn test_race_completes_with_stored_permit() {
        let notify = Notify::new();
        notify.notify_one();
        let verdict = race_cleanup(Duration::from_secs(5), &notify).await;
        assert_eq!(verdict, Verdict::CleanupCompleted);
    }

    #[test]
    fn test_stalled_cleanup_is_terminated() {
        let (watchdog, kills) = counting_watchdog(Duration::from_millis(20));
        assert!(watchdog.arm());
        assert_eq!(watchdog.join(), Some(Verdict::GraceExpired));
        assert_eq!(kills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completed_cleanup_is_not_terminated() {
        let (watchdog, kills) = counting_watchdog(Duration::from_secs(5));
        assert!(watchdog.arm());
        watchdog.mark_complete();
        assert_eq!(watchdog.join(), Some(Verdict::CleanupCompleted));
        assert_eq!(kills.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_second_arm_is_a_no_op() {
        let (watchdog, kills) = counting_watchdog(Duration::from_millis(20));
        assert!(watchdog.arm());
        assert!(!watchdog.arm());
        watchdog.join();
        assert_eq!(watchdog.join(), None, "only one timer thread is started");
        assert_eq!(kills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_termination_is_bounded_by_grace() {
        let (watchdog, kills) = counting_watchdog(Duration::from_millis(50));
        let start = std::time::Instant::now();
        watchdog.arm();
        watchdog.join();
        let elapsed = start.elapsed();
        assert_eq!(kills.load(Ordering::SeqCst), 1);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    }

    #[test]
    fn test_last_consumer_gone_requests_shutdown() {
        let gate = Arc::new(SessionGate::new());
        let (watchdog, _kills) = counting_watchdog(Duration::from_secs(5));
        let watchdog = Arc::new(watchdog);
        let control = SessionControl::new(Arc::clone(&gate), Arc::clone(&watchdog));

        control.consumer_arrived();
        assert!(gate.consumer_present());
        assert!(!watchdog.is_armed());

        control.consumers_gone();
        assert!(gate.stop_requested());
        assert!(watchdog.is_armed());
        assert_eq!(control.presence_failure(), None);
        watchdog.mark_complete();
        watchdog.join();
    }

    #[test]
    fn test_monitor_failure_wakes_waiting_session() {
        let gate = Arc::new(SessionGate::new());
        let (watchdog, _kills) = counting_watchdog(Duration::from_secs(5));
        let watchdog = Arc::new(watchdog);
        let control = SessionControl::new(Arc::clone(&gate), Arc::clone(&watchdog));

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_for_consumer())
        };
        let error = PresenceError::MonitorLost("sink node disappeared".into());
        control.monitor_failed(&error);

        assert_eq!(waiter.join().unwrap(), crate::session::GateEvent::StopRequested);
        assert!(watchdog.is_armed());
        assert_eq!(
            control.presence_failure(),
            Some("Presence monitor lost: sink node disappeared")
        );
        watchdog.mark_complete();
        watchdog.join();
    }
}
