#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("kernel notification interface: {0}")]
    Notify(#[from] nix::errno::Errno),

    #[error("manifest document: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("no quarantine entry with id {0}")]
    UnknownEntry(String),

    #[error("restore target already exists: {0}")]
    RestoreCollision(PathBuf),

    #[error("work pool requires nonzero workers and capacity")]
    PoolSizing,

    #[error("work pool is shutting down")]
    PoolShutdown,
}
