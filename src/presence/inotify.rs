// SPDX-License-Identifier: GPL-3.0-only

//! Event-based presence through inotify
//!
//! Counts `IN_OPEN` against `IN_CLOSE_WRITE | IN_CLOSE_NOWRITE` on the sink
//! node. Opens that happened before the watch was installed are invisible,
//! which includes this process's own sink handle.

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::FromRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{PresenceListener, PresenceMonitor, PresenceTracker, dispatch};
use crate::errors::{PresenceError, PresenceResult};

/// Size of `struct inotify_event` without the trailing name
const EVENT_HEADER_LEN: usize = 16;

const WATCH_MASK: u32 = libc::IN_OPEN | libc::IN_CLOSE_WRITE | libc::IN_CLOSE_NOWRITE;

/// Open or close seen on the watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEvent {
    Opened,
    Closed,
    /// The watch was removed (node deleted or filesystem unmounted)
    WatchLost,
}

/// Decode every event in one `read` of an inotify descriptor
///
/// A single read can carry several events; all of them are returned in order.
pub fn parse_events(buf: &[u8]) -> Vec<AccessEvent> {
    let mut events = Vec::new();
    let mut offset = 0;

    while let Some(header) = buf.get(offset..offset + EVENT_HEADER_LEN) {
        let field = |i: usize| {
            u32::from_ne_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]])
        };
        let mask = field(4);
        let name_len = field(12) as usize;
        offset += EVENT_HEADER_LEN + name_len;

        if mask & libc::IN_OPEN != 0 {
            events.push(AccessEvent::Opened);
        }
        if mask & (libc::IN_CLOSE_WRITE | libc::IN_CLOSE_NOWRITE) != 0 {
            events.push(AccessEvent::Closed);
        }
        if mask & libc::IN_IGNORED != 0 {
            events.push(AccessEvent::WatchLost);
        }
        if mask & libc::IN_Q_OVERFLOW != 0 {
            warn!("inotify queue overflowed, consumer count may drift");
        }
    }

    events
}

pub struct InotifyMonitor {
    path: PathBuf,
    inotify: File,
}

impl InotifyMonitor {
    /// Install the watch on `path`
    pub fn new(path: &Path) -> PresenceResult<Self> {
        let watch_failed = |source: io::Error| PresenceError::WatchFailed {
            path: path.display().to_string(),
            source,
        };

        // SAFETY: plain syscall, the result is checked below
        let fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(watch_failed(io::Error::last_os_error()));
        }
        // SAFETY: fd is a fresh descriptor owned by nobody else
        let inotify = unsafe { File::from_raw_fd(fd) };

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| watch_failed(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        // SAFETY: c_path is a valid NUL-terminated string
        let wd = unsafe { libc::inotify_add_watch(fd, c_path.as_ptr(), WATCH_MASK) };
        if wd < 0 {
            return Err(watch_failed(io::Error::last_os_error()));
        }

        debug!(path = %path.display(), "Watching sink for opens and closes");
        Ok(Self {
            path: path.to_path_buf(),
            inotify,
        })
    }
}

impl PresenceMonitor for InotifyMonitor {
    fn name(&self) -> &'static str {
        "inotify"
    }

    fn run(mut self: Box<Self>, listener: &dyn PresenceListener) -> PresenceResult<()> {
        let mut tracker = PresenceTracker::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = match self.inotify.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PresenceError::ReadFailed(e)),
            };

            for event in parse_events(&buf[..n]) {
                let edge = match event {
                    AccessEvent::Opened => tracker.opened(),
                    AccessEvent::Closed => tracker.closed(),
                    AccessEvent::WatchLost => {
                        warn!(path = %self.path.display(), "Sink watch removed");
                        return Err(PresenceError::ReadFailed(io::Error::new(
                            io::ErrorKind::NotFound,
                            "sink node disappeared",
                        )));
                    }
                };
                debug!(event = ?event, count = tracker.count(), "Sink access");
                if dispatch(edge, listener) {
                    info!("Last consumer closed the sink");
                    return Ok(());
                }
            }
        }
    }
}
