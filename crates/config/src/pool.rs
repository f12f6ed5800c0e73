#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Pool {
    /// Number of scan worker threads.
    pub workers: usize,

    /// Bounded depth of the scan work queue. When the queue is full the
    /// monitor thread blocks on submission rather than dropping candidates.
    pub capacity: usize,
}

impl Default for Pool {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 256,
        }
    }
}
