#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

/// Outcome of evaluating a candidate path against the submission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Reject(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Inside the quarantine root; the store never scans its own holdings.
    QuarantinePath,
    HiddenName,
    TransientMarker(String),
    NotRegularFile,
    TooSmall(u64),
    TooLarge(u64),
}

/// Filter applied by the monitor-event glue before a candidate reaches the
/// work queue. Gating happens ahead of submission so pathological bursts of
/// uninteresting paths never occupy queue slots.
#[derive(Debug, Clone)]
pub struct SubmitGate {
    quarantine_root: PathBuf,
    transient_markers: Vec<String>,
    min_size: u64,
    max_size: u64,
}

impl SubmitGate {
    pub fn new(config: &config::Config) -> Self {
        Self {
            quarantine_root: config.quarantine.root.clone(),
            transient_markers: config.gate.transient_markers.clone(),
            min_size: config.gate.min_file_size,
            max_size: config.gate.max_file_size,
        }
    }

    pub fn evaluate(&self, path: &Path) -> GateDecision {
        if path.starts_with(&self.quarantine_root) {
            return GateDecision::Reject(RejectReason::QuarantinePath);
        }

        if path
            .file_name()
            .map(|name| name.as_encoded_bytes().first() == Some(&b'.'))
            .unwrap_or(true)
        {
            return GateDecision::Reject(RejectReason::HiddenName);
        }

        if let Some(marker) = self.matching_marker(path) {
            return GateDecision::Reject(RejectReason::TransientMarker(marker));
        }

        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(_) => return GateDecision::Reject(RejectReason::NotRegularFile),
        };
        if !meta.is_file() {
            return GateDecision::Reject(RejectReason::NotRegularFile);
        }

        let size = meta.len();
        if size < self.min_size {
            return GateDecision::Reject(RejectReason::TooSmall(size));
        }
        if size > self.max_size {
            return GateDecision::Reject(RejectReason::TooLarge(size));
        }

        GateDecision::Admit
    }

    /// First transient marker contained anywhere in the path, if any.
    fn matching_marker(&self, path: &Path) -> Option<String> {
        let text = path.to_string_lossy();
        self.transient_markers
            .iter()
            .find(|marker| text.contains(marker.as_str()))
            .cloned()
    }
}
