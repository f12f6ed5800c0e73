#![forbid(unsafe_code)]

pub mod control;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gate;
pub mod monitor;
pub mod pipeline;
pub mod quarantine;
pub mod scanner;
pub mod shutdown;
mod util;

pub use control::{
    ClientId, Command, CommandHandler, ControlBroadcaster, ControlServer, EngineCommands,
    Responder, MAX_MESSAGE_LEN,
};
pub use dispatch::WorkerPool;
pub use error::Error;
pub use events::{EventKind, EventRecord, EventSink, SyncCompleteRecord, SyncEntryRecord};
pub use gate::{GateDecision, RejectReason, SubmitGate};
pub use monitor::{Monitor, MonitorHandle};
pub use pipeline::ScanPipeline;
pub use quarantine::{QuarantineEngine, QuarantineEntry, MANIFEST_NAME};
pub use scanner::{ClamdScanner, ScanError, ScanVerdict, Scanner};
pub use shutdown::{register_signals, ShutdownFlag, SignalListener};
