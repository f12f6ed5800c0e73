#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::PathBuf;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Control {
    /// Listening path of the local GUI socket. World-writable (0666): the
    /// socket carries no network exposure and the desktop client runs
    /// unprivileged.
    pub socket_path: PathBuf,

    /// Concurrent client ceiling; surplus connections are closed on accept.
    pub max_clients: usize,

    /// Readiness-wait bound of one service tick. **Measured in
    /// milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub service_timeout: Duration,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/sentinel_gui.sock"),
            max_clients: 8,
            service_timeout: Duration::from_millis(200),
        }
    }
}
