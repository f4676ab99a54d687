//! Integration tests for the persistent backends.

use sediment::store::disk::DiskStore;
use sediment::store::file::FileStore;
use sediment::store::DataStore;
use tempfile::TempDir;

/// A context's data survives a shutdown/reopen cycle through the index file.
#[test]
fn test_disk_store_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let store = DiskStore::new(dir.path(), 1024 * 1024).unwrap();
        store.save("s1", 1, b"persisted across restart", None).unwrap();
        store.save("s1", 2, b"second unit", None).unwrap();
        store.destroy();
    }

    let reopened = DiskStore::new(dir.path(), 1024 * 1024).unwrap();
    assert_eq!(
        reopened.load("s1", 1).unwrap(),
        b"persisted across restart"
    );
    assert_eq!(reopened.load("s1", 2).unwrap(), b"second unit");
}

/// Without a clean shutdown the index is gone and loads degrade to None.
#[test]
fn test_disk_store_unclean_shutdown_expires_everything() {
    let dir = TempDir::new().unwrap();

    {
        let store = DiskStore::new(dir.path(), 1024 * 1024).unwrap();
        store.save("s1", 1, b"never indexed", None).unwrap();
        // No destroy(): the index file is never written.
    }

    let reopened = DiskStore::new(dir.path(), 1024 * 1024).unwrap();
    assert!(reopened.load("s1", 1).is_none());
}

/// The blob cap holds under sustained writes: old windows are reused, the
/// most recent units stay readable.
#[test]
fn test_disk_store_circular_reuse_bounds_blob() {
    let dir = TempDir::new().unwrap();
    let store = DiskStore::new(dir.path(), 4096).unwrap();

    let payload = vec![7u8; 512];
    for id in 0..64 {
        store.save("s1", id, &payload, None).unwrap();
    }

    assert!(store.total_size("s1") <= 4096 + payload.len() as u64);
    // The most recently written unit is always intact.
    assert_eq!(store.load("s1", 63).unwrap(), payload);
}

/// File store restart path, including the type tag sidecar.
#[test]
fn test_file_store_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let store = FileStore::new(dir.path(), 0).unwrap();
        store.save("s1", 1, b"file backed", Some("Profile")).unwrap();
        store.destroy();
    }

    let reopened = FileStore::new(dir.path(), 0).unwrap();
    assert_eq!(reopened.load("s1", 1).unwrap(), b"file backed");
    let listing = reopened.list("s1");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].type_tag.as_deref(), Some("Profile"));
}

/// Contexts are fully isolated: removing one leaves the other intact.
#[test]
fn test_context_isolation_across_removal() {
    let dir = TempDir::new().unwrap();
    let store = DiskStore::new(dir.path(), 1024 * 1024).unwrap();

    store.save("s1", 1, b"mine", None).unwrap();
    store.save("s2", 1, b"yours", None).unwrap();

    store.remove_context("s1");
    assert!(store.load("s1", 1).is_none());
    assert_eq!(store.load("s2", 1).unwrap(), b"yours");
    assert_eq!(store.total_size("s1"), 0);
}

/// Both backends agree on the degrade-to-None contract for unknown keys.
#[test]
fn test_unknown_keys_degrade_to_none() {
    let dir = TempDir::new().unwrap();
    let disk = DiskStore::new(dir.path().join("disk"), 1024).unwrap();
    let file = FileStore::new(dir.path().join("file"), 0).unwrap();

    assert!(disk.load("nope", 1).is_none());
    assert!(file.load("nope", 1).is_none());
    assert!(disk.list("nope").is_empty());
    assert!(file.list("nope").is_empty());
    assert_eq!(disk.total_size("nope"), 0);
    assert_eq!(file.total_size("nope"), 0);
}
