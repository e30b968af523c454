// SPDX-License-Identifier: GPL-3.0-only

//! Poll-based presence through `/proc/*/fd`
//!
//! Once per interval every process's descriptor links are resolved and
//! compared with the sink path. This process is skipped since it holds the
//! sink open for writing. Descriptor tables of other users' processes are
//! only visible with enough privileges.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{PresenceListener, PresenceMonitor, PresenceTracker, dispatch};
use crate::errors::PresenceResult;

/// Count descriptors under `proc_root` that point at `target`
///
/// `target` must already be canonical. Processes that vanish or deny access
/// mid-scan are skipped.
pub fn count_openers(proc_root: &Path, target: &Path, own_pid: u32) -> usize {
    let Ok(processes) = fs::read_dir(proc_root) else {
        return 0;
    };

    processes
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
                .is_some_and(|pid| pid != own_pid)
        })
        .filter_map(|entry| fs::read_dir(entry.path().join("fd")).ok())
        .flat_map(|fds| fds.flatten())
        .filter(|fd| fs::read_link(fd.path()).is_ok_and(|link| link == target))
        .count()
}

pub struct ProcfsMonitor {
    target: PathBuf,
    proc_root: PathBuf,
    interval: Duration,
}

impl ProcfsMonitor {
    pub fn new(sink: &Path, interval: Duration) -> Self {
        Self {
            target: fs::canonicalize(sink).unwrap_or_else(|_| sink.to_path_buf()),
            proc_root: PathBuf::from("/proc"),
            interval,
        }
    }

    /// Scan a different proc tree
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }
}

impl PresenceMonitor for ProcfsMonitor {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn run(self: Box<Self>, listener: &dyn PresenceListener) -> PresenceResult<()> {
        let own_pid = std::process::id();
        let mut tracker = PresenceTracker::new();

        loop {
            let count = count_openers(&self.proc_root, &self.target, own_pid);
            if count != tracker.count() {
                debug!(count, "Sink consumer count changed");
            }
            if dispatch(tracker.observe(count), listener) {
                info!("Last consumer closed the sink");
                return Ok(());
            }
            thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PresenceError;
    use crate::presence::PresenceEdge;
    use std::os::unix::fs::symlink;
    use std::sync::{Arc, Mutex};

    struct FakeProc {
        root: PathBuf,
        target: PathBuf,
    }

    impl FakeProc {
        fn new(tag: &str) -> Self {
            let root = std::env::temp_dir()
                .join(format!("fake-proc-{}-{}", tag, std::process::id()));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(&root).unwrap();
            fs::write(root.join("video10"), b"").unwrap();
            let target = fs::canonicalize(root.join("video10")).unwrap();
            Self { root, target }
        }

        fn add_fd(&self, pid: u32, fd: u32, link: &Path) {
            let dir = self.root.join(pid.to_string()).join("fd");
            fs::create_dir_all(&dir).unwrap();
            symlink(link, dir.join(fd.to_string())).unwrap();
        }

        fn remove_pid(&self, pid: u32) {
            fs::remove_dir_all(self.root.join(pid.to_string())).unwrap();
        }
    }

    impl Drop for FakeProc {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn test_counts_links_to_target_only() {
        let proc = FakeProc::new("count");
        proc.add_fd(100, 3, &proc.target);
        proc.add_fd(100, 4, &proc.target);
        proc.add_fd(200, 3, Path::new("/dev/null"));
        proc.add_fd(300, 5, &proc.target);
        fs::create_dir_all(proc.root.join("self-info")).unwrap();

        assert_eq!(count_openers(&proc.root, &proc.target, 1), 3);
    }

    #[test]
    fn test_own_process_is_excluded() {
        let proc = FakeProc::new("own");
        proc.add_fd(42, 3, &proc.target);

        assert_eq!(count_openers(&proc.root, &proc.target, 42), 0);
        assert_eq!(count_openers(&proc.root, &proc.target, 7), 1);
    }

    #[test]
    fn test_missing_root_counts_nothing() {
        let count = count_openers(Path::new("/does-not-exist-proc"), Path::new("/dev/video0"), 1);
        assert_eq!(count, 0);
    }

    #[derive(Default)]
    struct Edges(Mutex<Vec<PresenceEdge>>, Mutex<Vec<String>>);

    impl PresenceListener for Edges {
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

    #[test]
    fn test_monitor_reports_arrival_then_departure() {
        let proc = FakeProc::new("monitor");
        proc.add_fd(500, 3, &proc.target);

        let monitor = Box::new(
            ProcfsMonitor::new(&proc.target, Duration::from_millis(10)).with_proc_root(&proc.root),
        );
        let edges = Arc::new(Edges::default());
        let handle = crate::presence::spawn_monitor(monitor, edges.clone()).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while edges.0.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        proc.remove_pid(500);
        handle.join().unwrap();

        assert_eq!(
            *edges.0.lock().unwrap(),
            vec![PresenceEdge::Arrived, PresenceEdge::Gone]
        );
        assert!(edges.1.lock().unwrap().is_empty());
    }
}
