#![forbid(unsafe_code)]

use crate::error::Error;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent, WatchDescriptor};
use rustc_hash::FxHashMap;
use std::ffi::OsStr;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Poll bound of the event loop, so a stop request is observed promptly.
const POLL_INTERVAL_MS: u16 = 500;

fn watch_mask() -> AddWatchFlags {
    AddWatchFlags::IN_CLOSE_WRITE | AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO
}

/// Watch-descriptor to directory-path mapping plus registration accounting.
/// Touched only from the monitor thread.
#[derive(Debug, Default)]
struct WatchTable {
    dirs: FxHashMap<WatchDescriptor, PathBuf>,
    added: u64,
    failed: u64,
    limit_warned: bool,
}

impl WatchTable {
    fn insert(&mut self, wd: WatchDescriptor, dir: PathBuf) {
        self.added += 1;
        self.dirs.insert(wd, dir);
    }

    fn get(&self, wd: WatchDescriptor) -> Option<&PathBuf> {
        self.dirs.get(&wd)
    }

    fn remove(&mut self, wd: WatchDescriptor) {
        self.dirs.remove(&wd);
    }

    /// Record an ENOSPC registration failure. The operator hint is logged
    /// exactly once per run; the condition is never fatal.
    fn record_exhausted(&mut self, dir: &Path) {
        self.failed += 1;
        if !self.limit_warned {
            self.limit_warned = true;
            warn!(
                "inotify watch limit reached: fs.inotify.max_user_watches is exhausted \
                 and some directories will not be monitored"
            );
            warn!(
                "raise the limit with `sysctl fs.inotify.max_user_watches=524288` \
                 (persist via /etc/sysctl.conf)"
            );
        }
        trace!(dir = %dir.display(), "watch registration skipped (limit)");
    }
}

/// Recursive inotify watcher over a set of root directories.
///
/// Emits absolute paths of regular files that were closed after writing,
/// created, or moved into a watched subtree. Hidden entries are skipped both
/// while walking and in event dispatch.
pub struct Monitor {
    inotify: Inotify,
    table: WatchTable,
    callback: Box<dyn Fn(PathBuf) + Send>,
    running: Arc<AtomicBool>,
}

/// Thread-safe stop switch for a running [`Monitor`].
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Monitor {
    /// Initialise the notification interface and install watches over every
    /// reachable subdirectory of `roots`.
    pub fn new<F>(roots: &[PathBuf], callback: F) -> Result<Self, Error>
    where
        F: Fn(PathBuf) + Send + 'static,
    {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)?;
        let mut monitor = Self {
            inotify,
            table: WatchTable::default(),
            callback: Box::new(callback),
            running: Arc::new(AtomicBool::new(true)),
        };

        for root in roots {
            info!(root = %root.display(), "installing recursive watch");
            monitor.install_tree(root);
        }

        info!(
            added = monitor.table.added,
            failed = monitor.table.failed,
            "inotify watch summary"
        );
        if monitor.table.failed > 0 {
            warn!(
                failed = monitor.table.failed,
                "directories left unmonitored by watch-limit exhaustion"
            );
        }

        Ok(monitor)
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Blocking event loop. Returns when [`MonitorHandle::stop`] is called
    /// or the notification fd fails irrecoverably.
    pub fn run(&mut self) -> Result<(), Error> {
        info!("monitor event loop started");

        while self.running.load(Ordering::Relaxed) {
            let mut fds = [PollFd::new(self.inotify.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(err) => {
                    error!(%err, "poll on notification fd failed");
                    return Err(err.into());
                }
            }

            let events = match self.inotify.read_events() {
                Ok(events) => events,
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
                Err(err) => {
                    error!(%err, "reading notification events failed");
                    return Err(err.into());
                }
            };

            for event in events {
                self.dispatch(event);
            }
        }

        info!("monitor event loop exited");
        Ok(())
    }

    fn dispatch(&mut self, event: InotifyEvent) {
        if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
            warn!("inotify event queue overflowed, events were lost");
            return;
        }
        if event.mask.contains(AddWatchFlags::IN_IGNORED) {
            self.table.remove(event.wd);
            return;
        }

        let Some(name) = event.name else {
            return;
        };
        if is_hidden(&name) {
            return;
        }
        let Some(parent) = self.table.get(event.wd) else {
            return;
        };
        let full = parent.join(&name);

        if event.mask.contains(AddWatchFlags::IN_ISDIR) {
            if event
                .mask
                .intersects(AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO)
            {
                debug!(dir = %full.display(), "new directory, extending watch");
                self.install_tree(&full);
            }
            return;
        }

        // Only dispatch paths that still resolve to a regular file.
        match std::fs::metadata(&full) {
            Ok(meta) if meta.is_file() => {
                trace!(path = %full.display(), "file event");
                (self.callback)(full);
            }
            _ => {}
        }
    }

    /// Walk `root` and install a watch on every reachable subdirectory.
    /// Hidden directories are not descended into.
    fn install_tree(&mut self, root: &Path) {
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            if !self.install_watch(&dir) {
                continue;
            }
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                if is_hidden(&entry.file_name()) {
                    continue;
                }
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    pending.push(entry.path());
                }
            }
        }
    }

    fn install_watch(&mut self, dir: &Path) -> bool {
        match self.inotify.add_watch(dir, watch_mask()) {
            Ok(wd) => {
                self.table.insert(wd, dir.to_path_buf());
                true
            }
            // Unreadable or already gone: skip quietly, keep walking siblings.
            Err(Errno::EACCES) | Err(Errno::ENOENT) => false,
            Err(Errno::ENOSPC) => {
                self.table.record_exhausted(dir);
                false
            }
            Err(err) => {
                error!(dir = %dir.display(), %err, "watch registration failed");
                false
            }
        }
    }
}

fn is_hidden(name: &OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_names() {
        assert!(is_hidden(OsStr::new(".manifest.json")));
        assert!(is_hidden(OsStr::new(".cache")));
        assert!(!is_hidden(OsStr::new("report.pdf")));
        assert!(!is_hidden(OsStr::new("dotless")));
    }

    #[test]
    fn stop_flag_is_shared() {
        let monitor = Monitor::new(&[], |_| {}).expect("inotify init");
        let handle = monitor.handle();
        assert!(monitor.running.load(Ordering::Relaxed));
        handle.stop();
        assert!(!monitor.running.load(Ordering::Relaxed));
    }
}
