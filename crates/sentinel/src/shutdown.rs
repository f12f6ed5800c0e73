#![forbid(unsafe_code)]

use crate::error::Error;
use signal_hook::consts::signal::{SIGINT, SIGPIPE, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, trace, warn};

/// Process-wide shutdown intent, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Handle to the signal listener thread.
pub struct SignalListener {
    handle: signal_hook::iterator::Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalListener {
    /// Stop the listener thread and join it.
    pub fn stop(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("signal listener thread panicked while stopping");
            }
        }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Install the process signal listeners.
///
/// SIGINT and SIGTERM request graceful shutdown through `flag`. SIGPIPE is
/// registered and swallowed: with a handler in place the default disposition
/// no longer kills the process, and writes to dead control clients surface
/// as `EPIPE` I/O errors.
pub fn register_signals(flag: &ShutdownFlag) -> Result<SignalListener, Error> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGPIPE])?;
    let handle = signals.handle();
    let flag = flag.clone();

    let thread = std::thread::Builder::new()
        .name("sentinel-signals".into())
        .spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGINT | SIGTERM => {
                        info!(signal, "termination signal received, shutting down");
                        flag.set();
                    }
                    SIGPIPE => {
                        trace!("SIGPIPE swallowed");
                    }
                    _ => {}
                }
            }
        })?;

    Ok(SignalListener {
        handle,
        thread: Some(thread),
    })
}
