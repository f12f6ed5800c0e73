#![forbid(unsafe_code)]

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Longest signature string retained from a scanner reply.
const MAX_SIGNATURE_LEN: usize = 255;

const STREAM_CHUNK: usize = 8192;

/// Result of a completed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected { signature: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The scanner could not be reached or the exchange broke off; the
    /// attempt may be retried.
    #[error("scanner transport: {0}")]
    Transport(#[from] io::Error),

    /// The scanner answered but rejected the stream; retrying will not help.
    #[error("scanner rejected the stream: {0}")]
    Engine(String),
}

/// On-access scanning seam. The pipeline only depends on this contract;
/// any engine with the same semantics can stand in for clamd.
pub trait Scanner: Send + Sync {
    fn scan(&self, path: &Path) -> Result<ScanVerdict, ScanError>;
}

/// Adapter for the clamd local stream socket.
///
/// Uses the zINSTREAM form: this daemon opens and reads the file itself and
/// streams raw bytes, so clamd never needs filesystem access to the target
/// (home directories are routinely mode 700 and unreadable to the clamav
/// user). Chunks are u32 big-endian length-prefixed and a zero length
/// terminates the stream.
#[derive(Debug, Clone)]
pub struct ClamdScanner {
    socket: PathBuf,
}

impl ClamdScanner {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Liveness probe. Failure is not fatal; clamd may come up later.
    pub fn ping(&self) -> bool {
        let mut conn = match UnixStream::connect(&self.socket) {
            Ok(conn) => conn,
            Err(err) => {
                debug!(%err, socket = %self.socket.display(), "clamd ping connect failed");
                return false;
            }
        };

        let mut reply = String::new();
        let ok = conn
            .write_all(b"PING\n")
            .and_then(|()| conn.shutdown(std::net::Shutdown::Write))
            .and_then(|()| conn.read_to_string(&mut reply))
            .is_ok();
        ok && reply.contains("PONG")
    }
}

impl Scanner for ClamdScanner {
    fn scan(&self, path: &Path) -> Result<ScanVerdict, ScanError> {
        let mut file = std::fs::File::open(path)?;
        let mut conn = UnixStream::connect(&self.socket)?;

        // Null-terminated z-command; the reply is null-terminated too.
        conn.write_all(b"zINSTREAM\0")?;

        let mut buf = [0u8; STREAM_CHUNK];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            conn.write_all(&(n as u32).to_be_bytes())?;
            conn.write_all(&buf[..n])?;
        }
        conn.write_all(&0u32.to_be_bytes())?;

        let mut reply = String::new();
        conn.read_to_string(&mut reply)?;
        if reply.is_empty() {
            return Err(ScanError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "empty reply from clamd",
            )));
        }

        debug!(reply = reply.trim_end_matches(['\0', '\n']), "clamd reply");
        parse_reply(&reply)
    }
}

/// Parse a clamd text reply.
///
/// `stream: OK` is clean, `stream: <signature> FOUND` is infected, and
/// `stream: <reason> ERROR` means the engine refused the stream. Anything
/// else is treated as a transport fault so the attempt can be retried.
///
/// Archive hits prepend the member name (`stream: zip-entry: <signature>
/// FOUND`), so the signature starts after the separator closest to the
/// verdict, not the first one.
fn parse_reply(reply: &str) -> Result<ScanVerdict, ScanError> {
    let reply = reply.trim_end_matches(['\0', '\n', ' ']);

    if let Some(found_at) = reply.find(" FOUND") {
        let start = reply[..found_at].rfind(": ").map(|i| i + 2).unwrap_or(0);
        let mut signature = reply[start..found_at].trim().to_string();
        if signature.len() > MAX_SIGNATURE_LEN {
            warn!(len = signature.len(), "truncating oversized signature");
            signature = signature.chars().take(MAX_SIGNATURE_LEN).collect();
        }
        return Ok(ScanVerdict::Infected { signature });
    }
    if reply.ends_with(" OK") {
        return Ok(ScanVerdict::Clean);
    }
    if reply.contains(" ERROR") {
        return Err(ScanError::Engine(reply.to_string()));
    }

    Err(ScanError::Transport(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unrecognised clamd reply: {reply}"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn parses_clean_reply() {
        assert_eq!(parse_reply("stream: OK\0").unwrap(), ScanVerdict::Clean);
        assert_eq!(parse_reply("stream: OK\n").unwrap(), ScanVerdict::Clean);
    }

    #[test]
    fn parses_infected_reply() {
        let verdict = parse_reply("stream: Eicar-Test-Signature FOUND\0").unwrap();
        assert_eq!(
            verdict,
            ScanVerdict::Infected {
                signature: "Eicar-Test-Signature".into()
            }
        );
    }

    #[test]
    fn nested_archive_reply_yields_innermost_signature() {
        let verdict = parse_reply("stream: zip-entry: Eicar-Test-Signature FOUND\0").unwrap();
        assert_eq!(
            verdict,
            ScanVerdict::Infected {
                signature: "Eicar-Test-Signature".into()
            }
        );
    }

    #[test]
    fn infected_without_colon_still_yields_signature() {
        let verdict = parse_reply("Worm.Generic FOUND").unwrap();
        assert_eq!(
            verdict,
            ScanVerdict::Infected {
                signature: "Worm.Generic".into()
            }
        );
    }

    #[test]
    fn oversized_signature_is_truncated() {
        let long = "A".repeat(400);
        let verdict = parse_reply(&format!("stream: {long} FOUND")).unwrap();
        match verdict {
            ScanVerdict::Infected { signature } => assert_eq!(signature.len(), 255),
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn error_reply_is_not_retryable() {
        match parse_reply("stream: Unable to read file ERROR\0") {
            Err(ScanError::Engine(detail)) => assert!(detail.contains("Unable to read file")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn garbage_reply_is_transport_fault() {
        assert!(matches!(
            parse_reply("???"),
            Err(ScanError::Transport(_))
        ));
    }

    /// Minimal fake clamd: accepts one connection, consumes the zINSTREAM
    /// exchange, replies with a canned verdict, closes.
    fn fake_clamd(socket: std::path::PathBuf, reply: &'static [u8]) -> std::thread::JoinHandle<Vec<u8>> {
        let listener = UnixListener::bind(&socket).unwrap();
        std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut command = [0u8; 10];
            conn.read_exact(&mut command).unwrap();
            assert_eq!(&command, b"zINSTREAM\0");

            let mut payload = Vec::new();
            loop {
                let mut len = [0u8; 4];
                conn.read_exact(&mut len).unwrap();
                let len = u32::from_be_bytes(len) as usize;
                if len == 0 {
                    break;
                }
                let mut chunk = vec![0u8; len];
                conn.read_exact(&mut chunk).unwrap();
                payload.extend_from_slice(&chunk);
            }
            conn.write_all(reply).unwrap();
            payload
        })
    }

    #[test]
    fn streams_file_content_and_reads_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("clamd.ctl");
        let target = dir.path().join("sample.bin");
        std::fs::write(&target, b"sample payload bytes").unwrap();

        let server = fake_clamd(socket.clone(), b"stream: OK\0");
        let scanner = ClamdScanner::new(&socket);
        let verdict = scanner.scan(&target).unwrap();

        assert_eq!(verdict, ScanVerdict::Clean);
        assert_eq!(server.join().unwrap(), b"sample payload bytes");
    }

    #[test]
    fn reports_infected_stream() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("clamd.ctl");
        let target = dir.path().join("eicar.com");
        std::fs::write(&target, b"fake eicar body").unwrap();

        let _server = fake_clamd(socket.clone(), b"stream: Eicar-Test-Signature FOUND\0");
        let scanner = ClamdScanner::new(&socket);
        let verdict = scanner.scan(&target).unwrap();
        assert_eq!(
            verdict,
            ScanVerdict::Infected {
                signature: "Eicar-Test-Signature".into()
            }
        );
    }

    #[test]
    fn unreachable_socket_is_transport_fault() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sample.bin");
        std::fs::write(&target, b"body").unwrap();

        let scanner = ClamdScanner::new(dir.path().join("nowhere.ctl"));
        assert!(matches!(
            scanner.scan(&target),
            Err(ScanError::Transport(_))
        ));
    }
}
