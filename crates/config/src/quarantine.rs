#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Quarantine {
    /// Root-owned directory (mode 0700) holding isolated files and the
    /// manifest document.
    pub root: PathBuf,
}

impl Default for Quarantine {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/opt/quarantine"),
        }
    }
}
