#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Gate {
    /// Candidates smaller than this are skipped (bytes).
    pub min_file_size: u64,

    /// Candidates larger than this are skipped (bytes).
    pub max_file_size: u64,

    /// Substring markers of transient files that appear and vanish within
    /// milliseconds; matching candidates never reach the queue.
    pub transient_markers: Vec<String>,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            min_file_size: 4,
            max_file_size: 100 * 1024 * 1024,
            transient_markers: vec![
                "clamav-".into(),
                "-scantemp".into(),
                "chromecrx_".into(),
                ".org.chromium.".into(),
                ".goutputstream".into(),
            ],
        }
    }
}
