#![forbid(unsafe_code)]

use crate::events::{EventKind, EventSink};
use crate::quarantine::QuarantineEngine;
use crate::scanner::{ScanError, ScanVerdict, Scanner};
use crate::util::{chmod, mode_bits};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

enum ScanAttempt {
    Verdict(ScanVerdict),
    Vanished,
    EngineError(String),
    Unreachable,
}

/// Per-candidate scan worker body.
///
/// Fail-closed: once a path enters the pipeline it leaves with its original
/// permissions only when the scanner actively reported it clean. Every
/// other outcome ends with the file quarantined or locked down at mode 000.
pub struct ScanPipeline {
    scanner: Box<dyn Scanner>,
    engine: Arc<QuarantineEngine>,
    events: Arc<dyn EventSink>,
    max_retries: u32,
    retry_delay: Duration,
}

impl ScanPipeline {
    pub fn new(
        scanner: Box<dyn Scanner>,
        engine: Arc<QuarantineEngine>,
        events: Arc<dyn EventSink>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            scanner,
            engine,
            events,
            max_retries,
            retry_delay,
        }
    }

    pub fn process(&self, path: &Path) {
        debug!(path = %path.display(), "scanning");
        let filename = path.to_string_lossy();

        // Fallback 0644 keeps a later restore sane when the stat races a
        // concurrent unlink.
        let original_mode = mode_bits(path).unwrap_or(0o644);

        // Strip execute bits first so the file cannot be launched while it
        // is under analysis.
        let noexec_mode = original_mode & !0o111;
        if noexec_mode != original_mode {
            match chmod(path, noexec_mode) {
                Ok(()) => debug!(path = %path.display(), "stripped execute permission"),
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to strip execute bits, continuing")
                }
            }
        }

        let verdict = match self.scan_with_retry(path, &filename) {
            ScanAttempt::Verdict(verdict) => verdict,
            ScanAttempt::Vanished => {
                debug!(path = %path.display(), "file vanished before retry, skipping");
                return;
            }
            ScanAttempt::EngineError(detail) => {
                error!(path = %path.display(), %detail, "scan error, applying lockdown");
                self.lockdown(path);
                self.events.broadcast(
                    EventKind::Status,
                    &filename,
                    "",
                    "Scan error — file locked down.",
                );
                return;
            }
            ScanAttempt::Unreachable => {
                error!(
                    path = %path.display(),
                    retries = self.max_retries,
                    "scanner offline after retries, applying lockdown"
                );
                self.lockdown(path);
                self.events.broadcast(
                    EventKind::Status,
                    &filename,
                    "",
                    "Scanner offline. File locked down (chmod 0000).",
                );
                return;
            }
        };

        match verdict {
            ScanVerdict::Clean => {
                debug!(path = %path.display(), "file clean");
                if let Err(err) = chmod(path, original_mode) {
                    warn!(path = %path.display(), %err, "failed to restore permissions");
                }
                self.events
                    .broadcast(EventKind::ScanClean, &filename, "", "File is clean");
            }
            ScanVerdict::Infected { signature } => {
                warn!(path = %path.display(), threat = %signature, "threat detected");
                match self.engine.quarantine(path, &signature) {
                    Ok(entry) => {
                        info!(id = %entry.id, "threat isolated");
                        self.events.broadcast(
                            EventKind::ScanThreat,
                            &filename,
                            &signature,
                            "File quarantined",
                        );
                    }
                    Err(err) => {
                        // Last resort when isolation is impossible.
                        error!(path = %path.display(), %err, "quarantine failed, applying lockdown");
                        self.lockdown(path);
                        self.events.broadcast(
                            EventKind::ScanThreat,
                            &filename,
                            &signature,
                            "CRITICAL: quarantine failed — file locked!",
                        );
                    }
                }
            }
        }
    }

    fn scan_with_retry(&self, path: &Path, filename: &str) -> ScanAttempt {
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Transient files often disappear within milliseconds;
                // retrying a dead path only wastes a worker.
                if std::fs::metadata(path).is_err() {
                    return ScanAttempt::Vanished;
                }
                warn!(
                    attempt,
                    max = self.max_retries,
                    path = %path.display(),
                    "scanner unreachable, retrying"
                );
                self.events.broadcast(
                    EventKind::Status,
                    filename,
                    "",
                    "Scanner offline — retrying...",
                );
                std::thread::sleep(self.retry_delay);
            }

            match self.scanner.scan(path) {
                Ok(verdict) => return ScanAttempt::Verdict(verdict),
                Err(ScanError::Engine(detail)) => return ScanAttempt::EngineError(detail),
                Err(ScanError::Transport(err)) => {
                    error!(attempt, %err, path = %path.display(), "scanner transport failure");
                }
            }
        }
        ScanAttempt::Unreachable
    }

    fn lockdown(&self, path: &Path) {
        if let Err(err) = chmod(path, 0o000) {
            error!(path = %path.display(), %err, "CRITICAL: lockdown chmod failed");
        }
    }
}
