#![forbid(unsafe_code)]

use crate::error::Error;
use crate::events::{frame, EventKind, EventRecord, EventSink, SyncCompleteRecord, SyncEntryRecord};
use crate::quarantine::QuarantineEngine;
use crate::util::lock_or_recover;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Per-client inbound buffer bound. A partial line beyond this is discarded.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Slot index of a connected client. Stable for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientId(pub(crate) usize);

/// Parsed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Restore { id: String },
    Delete { id: String },
    SyncState,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    action: String,
    id: Option<String>,
}

/// Parse one newline-framed inbound record. Malformed input is dropped
/// with a warning, never an error: a misbehaving client must not be able
/// to wedge the daemon.
fn parse_command(line: &str) -> Option<Command> {
    let raw: RawCommand = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%err, line, "dropping unparseable control message");
            return None;
        }
    };
    match raw.action.as_str() {
        "restore" => match raw.id {
            Some(id) => Some(Command::Restore { id }),
            None => {
                warn!("restore command without id, dropped");
                None
            }
        },
        "delete" => match raw.id {
            Some(id) => Some(Command::Delete { id }),
            None => {
                warn!("delete command without id, dropped");
                None
            }
        },
        "sync_state" => Some(Command::SyncState),
        other => {
            warn!(action = other, "unknown control action, dropped");
            None
        }
    }
}

enum WriteOutcome {
    Sent,
    /// Send buffer full: this one message is dropped for this client only.
    Dropped,
    Disconnected,
}

fn write_frame_to(stream: &mut UnixStream, payload: &str) -> WriteOutcome {
    match stream.write_all(payload.as_bytes()) {
        Ok(()) => WriteOutcome::Sent,
        Err(err) if err.kind() == ErrorKind::WouldBlock => WriteOutcome::Dropped,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset
            ) =>
        {
            WriteOutcome::Disconnected
        }
        Err(err) => {
            warn!(%err, "client write failed");
            WriteOutcome::Disconnected
        }
    }
}

struct ClientSlot {
    stream: UnixStream,
    buf: Vec<u8>,
}

pub(crate) struct ClientTable {
    slots: Vec<Option<ClientSlot>>,
}

impl ClientTable {
    fn new(max_clients: usize) -> Self {
        Self {
            slots: (0..max_clients).map(|_| None).collect(),
        }
    }

    fn connected(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn attach(&mut self, stream: UnixStream) -> Option<ClientId> {
        let free = self.slots.iter().position(|slot| slot.is_none())?;
        self.slots[free] = Some(ClientSlot {
            stream,
            buf: Vec::new(),
        });
        Some(ClientId(free))
    }

    fn close(&mut self, id: ClientId) {
        if self.slots[id.0].take().is_some() {
            info!(client = id.0, total = self.connected(), "control client disconnected");
        }
    }

    fn close_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Read everything currently available from one client and append the
    /// complete newline-framed messages to `out`.
    fn drain_client(&mut self, id: ClientId, out: &mut Vec<(ClientId, String)>) {
        let Some(slot) = self.slots[id.0].as_mut() else {
            return;
        };

        let mut chunk = [0u8; 1024];
        let mut disconnect = false;
        loop {
            match slot.stream.read(&mut chunk) {
                Ok(0) => {
                    disconnect = true;
                    break;
                }
                Ok(n) => {
                    slot.buf.extend_from_slice(&chunk[..n]);
                    split_lines(id, &mut slot.buf, out);
                    if slot.buf.len() > MAX_MESSAGE_LEN {
                        warn!(client = id.0, "control read buffer overflow, resetting");
                        slot.buf.clear();
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(client = id.0, %err, "control read failed");
                    disconnect = true;
                    break;
                }
            }
        }

        if disconnect {
            self.close(id);
        }
    }

    fn write_frame(&mut self, id: ClientId, payload: &str) {
        let Some(slot) = self.slots[id.0].as_mut() else {
            return;
        };
        match write_frame_to(&mut slot.stream, payload) {
            WriteOutcome::Sent => {}
            WriteOutcome::Dropped => {
                trace!(client = id.0, "send buffer full, message dropped for client");
            }
            WriteOutcome::Disconnected => self.close(id),
        }
    }

    fn broadcast_frame(&mut self, payload: &str) {
        for index in 0..self.slots.len() {
            let outcome = match self.slots[index].as_mut() {
                Some(slot) => write_frame_to(&mut slot.stream, payload),
                None => continue,
            };
            match outcome {
                WriteOutcome::Sent => {}
                WriteOutcome::Dropped => {
                    trace!(client = index, "send buffer full, message dropped for client");
                }
                WriteOutcome::Disconnected => self.close(ClientId(index)),
            }
        }
    }
}

/// Extract complete newline-terminated messages from `buf` into `out`,
/// keeping any trailing partial line for the next read.
fn split_lines(id: ClientId, buf: &mut Vec<u8>, out: &mut Vec<(ClientId, String)>) {
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let line = &line[..line.len() - 1];
        if line.is_empty() {
            continue;
        }
        match std::str::from_utf8(line) {
            Ok(text) => out.push((id, text.trim().to_string())),
            Err(_) => warn!(client = id.0, "non-UTF-8 control message dropped"),
        }
    }
}

/// Cloneable broadcast handle over the shared client table. Usable from any
/// thread; the scan workers push their events through this.
#[derive(Clone)]
pub struct ControlBroadcaster {
    clients: Arc<Mutex<ClientTable>>,
}

impl ControlBroadcaster {
    pub fn broadcast(&self, kind: EventKind, filename: &str, threat: &str, details: &str) {
        let record = EventRecord::now(kind, filename, threat, details);
        let payload = match record.to_frame() {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, "failed to encode event record");
                return;
            }
        };
        lock_or_recover(&self.clients).broadcast_frame(&payload);
    }

    pub fn client_count(&self) -> usize {
        lock_or_recover(&self.clients).connected()
    }
}

impl EventSink for ControlBroadcaster {
    fn broadcast(&self, kind: EventKind, filename: &str, threat: &str, details: &str) {
        ControlBroadcaster::broadcast(self, kind, filename, threat, details);
    }
}

/// Per-command reply channel pointing at the requesting client.
pub struct Responder<'a> {
    clients: &'a Mutex<ClientTable>,
    client: ClientId,
}

impl Responder<'_> {
    /// Send one record to the requesting client only.
    pub fn send<T: Serialize>(&self, record: &T) {
        match frame(record) {
            Ok(payload) => lock_or_recover(self.clients).write_frame(self.client, &payload),
            Err(err) => error!(%err, "failed to encode targeted record"),
        }
    }
}

/// Typed command capability dispatched by [`ControlServer::service`].
pub trait CommandHandler {
    fn handle(&mut self, command: Command, responder: &mut Responder<'_>);
}

/// Local stream-socket server for the desktop client.
///
/// The listening path is world-accessible (0666): the socket is inherently
/// local and the unprivileged desktop process must be able to connect.
/// Framing is newline-terminated JSON in both directions.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    clients: Arc<Mutex<ClientTable>>,
}

impl ControlServer {
    /// Unlink any stale endpoint, bind, listen non-blocking, open up the
    /// socket permissions.
    pub fn bind(path: &Path, max_clients: usize) -> Result<Self, Error> {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale control socket"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o666))?;

        info!(
            path = %path.display(),
            max_clients,
            "control socket listening"
        );

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            clients: Arc::new(Mutex::new(ClientTable::new(max_clients))),
        })
    }

    /// Broadcast handle sharing this server's client table.
    pub fn broadcaster(&self) -> ControlBroadcaster {
        ControlBroadcaster {
            clients: Arc::clone(&self.clients),
        }
    }

    /// One multiplexing tick: wait up to `timeout` for readiness, accept
    /// new clients, read and dispatch complete inbound commands, reap dead
    /// connections.
    pub fn service<H: CommandHandler>(
        &mut self,
        timeout: Duration,
        handler: &mut H,
    ) -> Result<(), Error> {
        // Mirror the client fds so the table lock is not pinned across the
        // readiness wait; broadcasts from worker threads stay unblocked.
        let mirrors: Vec<(ClientId, UnixStream)> = {
            let table = lock_or_recover(&self.clients);
            table
                .slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    let slot = slot.as_ref()?;
                    let mirror = slot.stream.try_clone().ok()?;
                    Some((ClientId(index), mirror))
                })
                .collect()
        };

        let mut fds = Vec::with_capacity(mirrors.len() + 1);
        fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for (_, mirror) in &mirrors {
            fds.push(PollFd::new(mirror.as_fd(), PollFlags::POLLIN));
        }

        let timeout = PollTimeout::from(timeout.as_millis().min(u128::from(u16::MAX)) as u16);
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        let listener_ready = fds[0].revents().is_some_and(|r| !r.is_empty());
        let ready: Vec<ClientId> = mirrors
            .iter()
            .zip(fds.iter().skip(1))
            .filter(|(_, fd)| fd.revents().is_some_and(|r| !r.is_empty()))
            .map(|((id, _), _)| *id)
            .collect();
        drop(fds);
        drop(mirrors);

        if listener_ready {
            self.accept_pending();
        }

        let inbound = {
            let mut table = lock_or_recover(&self.clients);
            let mut messages = Vec::new();
            for id in ready {
                table.drain_client(id, &mut messages);
            }
            messages
        };

        // Dispatch outside the table lock: handlers broadcast and reply
        // through the same table.
        for (client, line) in inbound {
            if let Some(command) = parse_command(&line) {
                debug!(?command, client = client.0, "control command");
                let mut responder = Responder {
                    clients: &self.clients,
                    client,
                };
                handler.handle(command, &mut responder);
            }
        }

        Ok(())
    }

    fn accept_pending(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!(%err, "failed to mark client non-blocking, dropping");
                        continue;
                    }
                    let mut table = lock_or_recover(&self.clients);
                    match table.attach(stream) {
                        Some(id) => {
                            info!(client = id.0, total = table.connected(), "control client connected");
                        }
                        None => {
                            warn!("control client limit reached, closing surplus connection");
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(%err, "accept on control socket failed");
                    break;
                }
            }
        }
    }

    /// Close every client, the listener, and unlink the socket path.
    pub fn shutdown(self) {
        lock_or_recover(&self.clients).close_all();
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(%err, "failed to unlink control socket");
            }
        }
        info!("control socket closed");
    }
}

/// The daemon's registered command handler: quarantine operations plus the
/// per-client state-sync batch.
pub struct EngineCommands {
    engine: Arc<QuarantineEngine>,
    events: ControlBroadcaster,
}

impl EngineCommands {
    pub fn new(engine: Arc<QuarantineEngine>, events: ControlBroadcaster) -> Self {
        Self { engine, events }
    }
}

impl CommandHandler for EngineCommands {
    fn handle(&mut self, command: Command, responder: &mut Responder<'_>) {
        match command {
            Command::Restore { id } => match self.engine.restore(&id) {
                Ok(entry) => {
                    self.events.broadcast(
                        EventKind::Restore,
                        &entry.original_path.to_string_lossy(),
                        "",
                        "File restored from quarantine",
                    );
                }
                Err(err) => {
                    error!(%err, %id, "restore failed");
                    self.events
                        .broadcast(EventKind::Status, &id, "", "Restore failed");
                }
            },
            Command::Delete { id } => match self.engine.delete(&id) {
                Ok(entry) => {
                    self.events.broadcast(
                        EventKind::Delete,
                        &entry.original_path.to_string_lossy(),
                        "",
                        "File permanently deleted",
                    );
                }
                Err(err) => {
                    error!(%err, %id, "delete failed");
                    self.events
                        .broadcast(EventKind::Status, &id, "", "Delete failed");
                }
            },
            Command::SyncState => {
                let entries = self.engine.list();
                info!(count = entries.len(), "client requested state sync");
                for entry in &entries {
                    responder.send(&SyncEntryRecord::from_entry(entry));
                }
                responder.send(&SyncCompleteRecord::new(entries.len()));
            }
        }
    }
}
