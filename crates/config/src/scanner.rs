#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::PathBuf;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Scanner {
    /// Path of the clamd local stream socket.
    pub clamd_socket: PathBuf,

    /// Number of additional scan attempts after a transport failure.
    /// After the retries are exhausted the file is locked down.
    pub max_retries: u32,

    /// Pause between retry attempts. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub retry_delay: Duration,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            clamd_socket: PathBuf::from("/var/run/clamav/clamd.ctl"),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}
