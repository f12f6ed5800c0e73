#![forbid(unsafe_code)]

use crate::error::Error;
use crate::util::{chmod, lock_or_recover};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Manifest document inside the quarantine root. Hidden so the monitor glue
/// never treats it as a candidate even without the root-prefix gate.
pub const MANIFEST_NAME: &str = ".manifest.json";

/// Durable record of one isolated file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuarantineEntry {
    pub id: String,
    pub original_path: PathBuf,
    pub quarantine_path: PathBuf,
    pub threat_name: String,
    /// Seconds since epoch at isolation time.
    pub timestamp: u64,
}

/// Store of isolated files under a permission-restricted root, with a
/// durable manifest and reversible restore.
///
/// Every operation serialises on the engine lock; the manifest on disk is
/// rewritten (atomically, via a temp file) before a mutation reports
/// success.
pub struct QuarantineEngine {
    root: PathBuf,
    manifest_path: PathBuf,
    entries: Mutex<Vec<QuarantineEntry>>,
}

impl QuarantineEngine {
    /// Create the quarantine root if missing (mode 0700) and load the
    /// manifest. A corrupt manifest is replaced by an empty one with a
    /// warning; files already in the root stay untouched.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        if fs::metadata(&root).is_err() {
            fs::create_dir_all(&root)?;
            info!(root = %root.display(), "created quarantine directory");
        }
        chmod(&root, 0o700)?;

        let manifest_path = root.join(MANIFEST_NAME);
        let entries = load_manifest(&manifest_path);
        info!(entries = entries.len(), "quarantine store opened");

        Ok(Self {
            root,
            manifest_path,
            entries: Mutex::new(entries),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owned snapshot of the manifest, safe to read outside the lock.
    pub fn list(&self) -> Vec<QuarantineEntry> {
        lock_or_recover(&self.entries).clone()
    }

    /// Isolate `path` into the quarantine root and append a manifest entry.
    ///
    /// The file ends up at `{root}/{id}_{basename}` with mode 000. If the
    /// manifest cannot be flushed after relocation the destination is
    /// unlinked and the entry rolled back: an untracked artifact in the
    /// store would be unreachable from every client.
    pub fn quarantine(&self, path: &Path, threat_name: &str) -> Result<QuarantineEntry, Error> {
        let mut entries = lock_or_recover(&self.entries);

        if let Err(err) = chmod(path, 0o000) {
            // Keep going: relocation does not need the permission strip.
            error!(path = %path.display(), %err, "failed to strip permissions before isolation");
        }

        let id = Uuid::new_v4().to_string();
        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("file"));
        let dest = self.root.join(format!("{id}_{basename}"));

        relocate(path, &dest)?;

        if let Err(err) = chmod(&dest, 0o000) {
            let _ = fs::remove_file(&dest);
            return Err(err.into());
        }

        let entry = QuarantineEntry {
            id,
            original_path: path.to_path_buf(),
            quarantine_path: dest.clone(),
            threat_name: threat_name.to_string(),
            timestamp: epoch_seconds(),
        };
        entries.push(entry.clone());

        if let Err(err) = persist(&self.manifest_path, &entries) {
            entries.pop();
            let _ = fs::remove_file(&dest);
            error!(%err, "manifest flush failed, isolation rolled back");
            return Err(err);
        }

        info!(
            id = %entry.id,
            from = %path.display(),
            to = %dest.display(),
            threat = threat_name,
            "file quarantined"
        );
        Ok(entry)
    }

    /// Return an isolated file to its original location with mode 0644 and
    /// drop its manifest entry.
    ///
    /// Refuses when a file already exists at the original path. On any
    /// failure the quarantined file is re-restricted to mode 000 and the
    /// entry kept.
    pub fn restore(&self, id: &str) -> Result<QuarantineEntry, Error> {
        let mut entries = lock_or_recover(&self.entries);
        let index = entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| Error::UnknownEntry(id.to_string()))?;
        let entry = entries[index].clone();

        if fs::symlink_metadata(&entry.original_path).is_ok() {
            return Err(Error::RestoreCollision(entry.original_path.clone()));
        }

        // Widen for the relocation; rename does not need it but the
        // cross-filesystem copy fallback does.
        chmod(&entry.quarantine_path, 0o400)?;
        if let Err(err) = relocate(&entry.quarantine_path, &entry.original_path) {
            let _ = chmod(&entry.quarantine_path, 0o000);
            return Err(err);
        }
        if let Err(err) = chmod(&entry.original_path, 0o644) {
            warn!(path = %entry.original_path.display(), %err, "restored file permission fixup failed");
        }

        entries.remove(index);
        persist(&self.manifest_path, &entries)?;

        info!(id, path = %entry.original_path.display(), "quarantine entry restored");
        Ok(entry)
    }

    /// Permanently unlink an isolated file and drop its manifest entry.
    /// An unlink failure keeps the entry and leaves the file locked.
    pub fn delete(&self, id: &str) -> Result<QuarantineEntry, Error> {
        let mut entries = lock_or_recover(&self.entries);
        let index = entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| Error::UnknownEntry(id.to_string()))?;
        let entry = entries[index].clone();

        chmod(&entry.quarantine_path, 0o600)?;
        if let Err(err) = fs::remove_file(&entry.quarantine_path) {
            let _ = chmod(&entry.quarantine_path, 0o000);
            return Err(err.into());
        }

        entries.remove(index);
        persist(&self.manifest_path, &entries)?;

        info!(id, path = %entry.quarantine_path.display(), "quarantine entry deleted");
        Ok(entry)
    }

    /// Rewrite the manifest from the current in-memory state.
    pub fn flush(&self) -> Result<(), Error> {
        persist(&self.manifest_path, &lock_or_recover(&self.entries))
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn load_manifest(path: &Path) -> Vec<QuarantineEntry> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(%err, "manifest unreadable, starting with an empty store");
            return Vec::new();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%err, "corrupt manifest, reinitialising as empty");
            Vec::new()
        }
    }
}

/// Flush the manifest: temp file in the same directory, fsync, rename.
fn persist(path: &Path, entries: &[QuarantineEntry]) -> Result<(), Error> {
    let json = serde_json::to_vec_pretty(entries)?;
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    file.write_all(&json)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Move `src` to `dest`, falling back to copy + unlink across mount
/// boundaries. On failure the source is re-restricted to mode 000 and any
/// partial destination removed.
fn relocate(src: &Path, dest: &Path) -> Result<(), Error> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }

    // rename fails across filesystems; copy needs the source readable.
    if let Err(err) = chmod(src, 0o400) {
        warn!(src = %src.display(), %err, "could not widen source for copy fallback");
    }

    let copied = fs::copy(src, dest);
    let finished = match copied {
        Ok(_) => fs::remove_file(src),
        Err(err) => Err(err),
    };

    match finished {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = chmod(src, 0o000);
            let _ = fs::remove_file(dest);
            Err(err.into())
        }
    }
}
