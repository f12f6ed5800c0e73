#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Monitor {
    /// Directory trees placed under recursive watch.
    pub roots: Vec<PathBuf>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("/home"), PathBuf::from("/tmp")],
        }
    }
}
