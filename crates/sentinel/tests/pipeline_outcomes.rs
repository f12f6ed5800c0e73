#![forbid(unsafe_code)]

use sentinel::{
    EventKind, EventSink, QuarantineEngine, ScanError, ScanPipeline, ScanVerdict, Scanner,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Event {
    kind: &'static str,
    filename: String,
    threat: String,
    details: String,
}

/// Spy sink collecting broadcasts in invocation order.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl EventSink for RecordingSink {
    fn broadcast(&self, kind: EventKind, filename: &str, threat: &str, details: &str) {
        self.events.lock().unwrap().push(Event {
            kind: kind.as_str(),
            filename: filename.to_string(),
            threat: threat.to_string(),
            details: details.to_string(),
        });
    }
}

/// Scanner stub driven by a verdict-producing closure.
struct StubScanner<F>(F);

impl<F> Scanner for StubScanner<F>
where
    F: Fn(&Path) -> Result<ScanVerdict, ScanError> + Send + Sync,
{
    fn scan(&self, path: &Path) -> Result<ScanVerdict, ScanError> {
        (self.0)(path)
    }
}

fn transport_error() -> ScanError {
    ScanError::Transport(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "clamd unreachable",
    ))
}

fn pipeline_with<F>(
    store: &Path,
    scan: F,
    retries: u32,
) -> (ScanPipeline, Arc<RecordingSink>, Arc<QuarantineEngine>)
where
    F: Fn(&Path) -> Result<ScanVerdict, ScanError> + Send + Sync + 'static,
{
    let engine = Arc::new(QuarantineEngine::open(store).unwrap());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = ScanPipeline::new(
        Box::new(StubScanner(scan)),
        Arc::clone(&engine),
        sink.clone() as Arc<dyn EventSink>,
        retries,
        Duration::ZERO,
    );
    (pipeline, sink, engine)
}

#[test]
fn clean_file_keeps_its_permissions() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let file = work.path().join("script.sh");
    fs::write(&file, b"#!/bin/sh\necho ok\n").unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();

    let (pipeline, sink, _engine) =
        pipeline_with(store.path(), |_| Ok(ScanVerdict::Clean), 3);
    pipeline.process(&file);

    // Execute bits come back only after the clean verdict.
    assert_eq!(mode_of(&file), 0o755);

    let events = sink.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "scan_clean");
    assert_eq!(events[0].filename, file.to_string_lossy());
    assert_eq!(events[0].details, "File is clean");
}

#[test]
fn infected_file_is_quarantined() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let file = work.path().join("eicar.com");
    fs::write(&file, b"fake eicar body").unwrap();

    let (pipeline, sink, engine) = pipeline_with(
        store.path(),
        |_| {
            Ok(ScanVerdict::Infected {
                signature: "Eicar-Test-Signature".into(),
            })
        },
        3,
    );
    pipeline.process(&file);

    assert!(fs::metadata(&file).is_err());
    assert_eq!(engine.len(), 1);
    let entry = &engine.list()[0];
    assert_eq!(entry.original_path, file);
    assert_eq!(mode_of(&entry.quarantine_path), 0o000);

    let events = sink.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "scan_threat");
    assert_eq!(events[0].threat, "Eicar-Test-Signature");
    assert_eq!(events[0].details, "File quarantined");
}

#[test]
fn exhausted_transport_locks_down() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let file = work.path().join("probe.bin");
    fs::write(&file, vec![0x41u8; 64]).unwrap();

    let (pipeline, sink, engine) =
        pipeline_with(store.path(), |_| Err(transport_error()), 2);
    pipeline.process(&file);

    assert_eq!(mode_of(&file), 0o000);
    assert!(engine.is_empty());

    // One transient status per retry, then the lockdown announcement.
    let events = sink.take();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].kind, "status");
    assert_eq!(events[0].details, "Scanner offline — retrying...");
    assert_eq!(events[1].details, "Scanner offline — retrying...");
    assert_eq!(
        events[2].details,
        "Scanner offline. File locked down (chmod 0000)."
    );
}

#[test]
fn scan_error_locks_down() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let file = work.path().join("unreadable.bin");
    fs::write(&file, b"payload").unwrap();

    let (pipeline, sink, _engine) = pipeline_with(
        store.path(),
        |_| Err(ScanError::Engine("stream: Unable to read ERROR".into())),
        3,
    );
    pipeline.process(&file);

    assert_eq!(mode_of(&file), 0o000);
    let events = sink.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "status");
    assert_eq!(events[0].details, "Scan error — file locked down.");
}

#[test]
fn vanished_file_is_skipped_quietly() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let file = work.path().join("fleeting.tmp");
    fs::write(&file, b"gone in a moment").unwrap();

    // First attempt fails over transport and deletes the file, as a
    // transient temp file would vanish between attempts.
    let (pipeline, sink, _engine) = pipeline_with(
        store.path(),
        |path| {
            let _ = fs::remove_file(path);
            Err(transport_error())
        },
        3,
    );
    pipeline.process(&file);

    assert!(fs::metadata(&file).is_err());
    assert!(sink.take().is_empty());
}

#[test]
fn quarantine_failure_falls_back_to_lockdown() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let root = store.path().join("vault");
    let file = work.path().join("stuck.bin");
    fs::write(&file, b"cannot be moved").unwrap();

    let engine = Arc::new(QuarantineEngine::open(&root).unwrap());
    let sink = Arc::new(RecordingSink::default());
    let scan: fn(&Path) -> Result<ScanVerdict, ScanError> = |_| {
        Ok(ScanVerdict::Infected {
            signature: "Trojan.Stub".into(),
        })
    };
    let pipeline = ScanPipeline::new(
        Box::new(StubScanner(scan)),
        Arc::clone(&engine),
        sink.clone() as Arc<dyn EventSink>,
        0,
        Duration::ZERO,
    );

    // Replace the vault with a regular file: every relocation into it now
    // fails with ENOTDIR, for root and unprivileged runs alike.
    fs::remove_dir_all(&root).unwrap();
    fs::write(&root, b"not a directory").unwrap();
    pipeline.process(&file);

    assert_eq!(mode_of(&file), 0o000);
    assert!(engine.is_empty());

    let events = sink.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "scan_threat");
    assert_eq!(events[0].threat, "Trojan.Stub");
    assert_eq!(events[0].details, "CRITICAL: quarantine failed — file locked!");
}
