#![forbid(unsafe_code)]

use crate::quarantine::QuarantineEntry;
use serde::Serialize;

/// Discriminants of the records pushed over the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ScanClean,
    ScanThreat,
    Quarantine,
    Restore,
    Delete,
    Status,
    SyncEntry,
    SyncComplete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ScanClean => "scan_clean",
            EventKind::ScanThreat => "scan_threat",
            EventKind::Quarantine => "quarantine",
            EventKind::Restore => "restore",
            EventKind::Delete => "delete",
            EventKind::Status => "status",
            EventKind::SyncEntry => "sync_entry",
            EventKind::SyncComplete => "sync_complete",
        }
    }
}

/// Outbound record broadcast to every connected client.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub event: &'static str,
    pub filename: String,
    pub threat: String,
    pub details: String,
    pub timestamp: String,
}

impl EventRecord {
    /// Compose a record stamped with the current local time.
    pub fn now(kind: EventKind, filename: &str, threat: &str, details: &str) -> Self {
        Self {
            event: kind.as_str(),
            filename: filename.to_string(),
            threat: threat.to_string(),
            details: details.to_string(),
            timestamp: local_timestamp(),
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        frame(self)
    }
}

/// Per-entry record of a state-sync batch. The `timestamp` here is epoch
/// seconds, matching the manifest, not the wall-clock string of broadcasts.
#[derive(Debug, Clone, Serialize)]
pub struct SyncEntryRecord {
    pub event: &'static str,
    pub id: String,
    pub filename: String,
    pub quarantine_path: String,
    pub threat: String,
    pub timestamp: u64,
}

impl SyncEntryRecord {
    pub fn from_entry(entry: &QuarantineEntry) -> Self {
        Self {
            event: EventKind::SyncEntry.as_str(),
            id: entry.id.clone(),
            filename: entry.original_path.to_string_lossy().into_owned(),
            quarantine_path: entry.quarantine_path.to_string_lossy().into_owned(),
            threat: entry.threat_name.clone(),
            timestamp: entry.timestamp,
        }
    }
}

/// Terminator of a state-sync batch.
#[derive(Debug, Clone, Serialize)]
pub struct SyncCompleteRecord {
    pub event: &'static str,
    pub count: usize,
}

impl SyncCompleteRecord {
    pub fn new(count: usize) -> Self {
        Self {
            event: EventKind::SyncComplete.as_str(),
            count,
        }
    }
}

/// Encode a record as one newline-terminated JSON object. Field values with
/// embedded newlines are escaped by the encoder, so the trailing `\n` is the
/// only raw newline in the frame.
pub fn frame<T: Serialize>(record: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

pub fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Capability handed to the scan pipeline for pushing events toward
/// connected clients.
pub trait EventSink: Send + Sync {
    fn broadcast(&self, kind: EventKind, filename: &str, threat: &str, details: &str);
}
