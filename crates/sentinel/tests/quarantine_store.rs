#![forbid(unsafe_code)]

use sentinel::{Error, QuarantineEngine, MANIFEST_NAME};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::tempdir;

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[test]
fn quarantine_then_restore_is_bit_identical() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();

    let file = work.path().join("eicar.com");
    let content = b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";
    fs::write(&file, content).unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();

    let engine = QuarantineEngine::open(store.path()).unwrap();
    let entry = engine.quarantine(&file, "Eicar-Test-Signature").unwrap();

    // The original is gone; the held file is unreadable and tracked.
    assert!(fs::metadata(&file).is_err());
    assert!(entry.quarantine_path.starts_with(store.path()));
    assert_eq!(mode_of(&entry.quarantine_path), 0o000);
    assert_eq!(engine.len(), 1);
    assert_eq!(entry.original_path, file);
    assert_eq!(entry.threat_name, "Eicar-Test-Signature");
    assert!(entry.timestamp > 0);

    let restored = engine.restore(&entry.id).unwrap();
    assert_eq!(restored.id, entry.id);
    assert_eq!(fs::read(&file).unwrap(), content);
    assert_eq!(mode_of(&file), 0o644);
    assert!(fs::metadata(&entry.quarantine_path).is_err());
    assert!(engine.is_empty());
}

#[test]
fn destination_names_carry_id_and_basename() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let file = work.path().join("payload.exe");
    fs::write(&file, b"MZ....").unwrap();

    let engine = QuarantineEngine::open(store.path()).unwrap();
    let entry = engine.quarantine(&file, "Trojan.Agent").unwrap();

    let name = entry
        .quarantine_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert_eq!(name, format!("{}_payload.exe", entry.id));

    // Grouped 8-4-4-4-12 hex id.
    let lens: Vec<usize> = entry.id.split('-').map(str::len).collect();
    assert_eq!(lens, vec![8, 4, 4, 4, 12]);
}

#[test]
fn restore_refuses_collision_and_keeps_entry_locked() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let file = work.path().join("invoice.pdf");
    fs::write(&file, b"malicious invoice").unwrap();

    let engine = QuarantineEngine::open(store.path()).unwrap();
    let entry = engine.quarantine(&file, "Pdf.Exploit").unwrap();

    // Something reappears at the original path.
    fs::write(&file, b"innocent replacement").unwrap();

    match engine.restore(&entry.id) {
        Err(Error::RestoreCollision(path)) => assert_eq!(path, file),
        other => panic!("expected collision refusal, got {other:?}"),
    }

    assert_eq!(engine.len(), 1);
    assert_eq!(mode_of(&entry.quarantine_path), 0o000);
    assert_eq!(fs::read(&file).unwrap(), b"innocent replacement");
}

#[test]
fn delete_unlinks_and_forgets() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    let file = work.path().join("dropper.bin");
    fs::write(&file, b"\x7fELF....").unwrap();

    let engine = QuarantineEngine::open(store.path()).unwrap();
    let entry = engine.quarantine(&file, "Linux.Dropper").unwrap();

    let deleted = engine.delete(&entry.id).unwrap();
    assert_eq!(deleted.id, entry.id);
    assert!(fs::metadata(&entry.quarantine_path).is_err());
    assert!(engine.is_empty());

    assert!(matches!(
        engine.delete(&entry.id),
        Err(Error::UnknownEntry(_))
    ));
}

#[test]
fn unknown_ids_error() {
    let store = tempdir().unwrap();
    let engine = QuarantineEngine::open(store.path()).unwrap();
    assert!(matches!(
        engine.restore("no-such-id"),
        Err(Error::UnknownEntry(_))
    ));
    assert!(matches!(
        engine.delete("no-such-id"),
        Err(Error::UnknownEntry(_))
    ));
}

#[test]
fn manifest_survives_reopen() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();

    let ids: Vec<String> = (0..2)
        .map(|i| {
            let file = work.path().join(format!("sample-{i}.bin"));
            fs::write(&file, format!("payload {i}")).unwrap();
            let engine = QuarantineEngine::open(store.path()).unwrap();
            engine.quarantine(&file, "Test.Sig").unwrap().id
        })
        .collect();

    let engine = QuarantineEngine::open(store.path()).unwrap();
    let listed: Vec<String> = engine.list().into_iter().map(|entry| entry.id).collect();
    assert_eq!(listed, ids);
}

#[test]
fn corrupt_manifest_recovers_empty_and_rewrites() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();
    fs::write(store.path().join(MANIFEST_NAME), b"][ not json").unwrap();

    let engine = QuarantineEngine::open(store.path()).unwrap();
    assert!(engine.is_empty());

    let file = work.path().join("fresh.bin");
    fs::write(&file, b"fresh payload").unwrap();
    engine.quarantine(&file, "Test.Sig").unwrap();

    // The document on disk is well-formed again.
    let bytes = fs::read(store.path().join(MANIFEST_NAME)).unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
}

#[test]
fn manifest_agrees_with_directory_contents() {
    let store = tempdir().unwrap();
    let work = tempdir().unwrap();

    let engine = QuarantineEngine::open(store.path()).unwrap();
    for i in 0..3 {
        let file = work.path().join(format!("held-{i}.bin"));
        fs::write(&file, format!("body {i}")).unwrap();
        engine.quarantine(&file, "Test.Sig").unwrap();
    }

    // Every entry points at a mode-000 file in the root.
    for entry in engine.list() {
        assert_eq!(mode_of(&entry.quarantine_path), 0o000);
    }

    // Every file in the root other than the manifest has an entry.
    let tracked: Vec<_> = engine
        .list()
        .into_iter()
        .map(|entry| entry.quarantine_path)
        .collect();
    for dirent in fs::read_dir(store.path()).unwrap() {
        let path = dirent.unwrap().path();
        if path.file_name().unwrap().to_string_lossy() == MANIFEST_NAME {
            continue;
        }
        assert!(tracked.contains(&path), "untracked file {path:?} in store");
    }
}

#[test]
fn quarantine_root_is_private() {
    let store = tempdir().unwrap();
    let root = store.path().join("vault");
    let engine = QuarantineEngine::open(&root).unwrap();
    assert_eq!(engine.root(), root.as_path());
    assert_eq!(mode_of(&root), 0o700);
}
